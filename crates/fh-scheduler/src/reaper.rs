//! Crash recovery for RUNNING jobs.
//!
//! A process that dies mid-job leaves it RUNNING with nobody left to settle
//! it. Every `interval` the reaper fails RUNNING jobs whose `updated_at` is
//! older than their class's stale threshold, through the completion guard,
//! then tells the scheduler to release the slot. Thresholds must exceed
//! the longest legitimate gap between heartbeats.

use fh_config::{ReaperSection, SchedulerSection};
use fh_core::{JobClass, JobStatus, RunnerResult};
use fh_store::JobFilter;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::guard::Terminal;
use crate::scheduler::Scheduler;

/// Reason recorded on reaped jobs.
pub const STALE_REASON: &str = "stale";

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub stale_thresholds: BTreeMap<JobClass, Duration>,
}

impl ReaperConfig {
    pub fn from_sections(reaper: &ReaperSection, scheduler: &SchedulerSection) -> Self {
        Self {
            interval: reaper.interval(),
            stale_thresholds: JobClass::ALL
                .into_iter()
                .map(|c| (c, scheduler.stale_threshold(c)))
                .collect(),
        }
    }

    pub fn threshold(&self, class: JobClass) -> Duration {
        self.stale_thresholds
            .get(&class)
            .copied()
            .unwrap_or(Duration::from_secs(15 * 60))
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self::from_sections(&ReaperSection::default(), &SchedulerSection::default())
    }
}

#[derive(Debug, Clone)]
pub struct StaleJobReaper {
    scheduler: Scheduler,
    config: ReaperConfig,
}

impl StaleJobReaper {
    pub fn new(scheduler: Scheduler, config: ReaperConfig) -> Self {
        Self { scheduler, config }
    }

    /// One scan. Returns the ids this pass failed.
    ///
    /// Only listing the store can fail the scan; a job that cannot be
    /// written is skipped so the rest are still reaped.
    pub async fn reap_once(&self) -> RunnerResult<Vec<String>> {
        let now = self.scheduler.clock().now();
        let running = self
            .scheduler
            .store()
            .list(&JobFilter::status(JobStatus::Running))
            .await?;

        let mut reaped = Vec::new();
        for job in running {
            let silent = (now - job.updated_at).to_std().unwrap_or(Duration::ZERO);
            let threshold = self.config.threshold(job.class);
            if silent <= threshold {
                continue;
            }
            let won = self
                .scheduler
                .guard()
                .try_set_terminal(&job.id, JobStatus::Running, Terminal::failed(STALE_REASON))
                .await;
            match won {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    warn!(job = %job.id, error = %e, "could not fail stale job, skipping");
                    continue;
                }
            }
            warn!(
                job = %job.id,
                class = %job.class,
                silent_secs = silent.as_secs(),
                threshold_secs = threshold.as_secs(),
                "reaped stale job"
            );
            self.scheduler.on_job_reaped(&job.id);
            reaped.push(job.id);
        }
        if !reaped.is_empty() {
            info!(count = reaped.len(), "stale job sweep finished");
        }
        Ok(reaped)
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = self.reap_once().await {
                    warn!(error = %e, "stale job sweep failed");
                }
            }
            debug!("reaper stopped");
        })
    }
}
