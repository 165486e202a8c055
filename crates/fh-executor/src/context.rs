use fh_core::{Clock, Job, RunnerResult};
use fh_store::{JobStore, ProgressUpdate};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything an executor gets for one run.
pub struct JobContext {
    pub job: Job,
    /// Cooperative cancellation; poll at safe boundaries.
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}

impl JobContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Writes heartbeats for one job. Each report refreshes `updated_at`,
/// which keeps the reaper away from jobs that are still alive.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: String,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl ProgressReporter {
    pub fn new(
        job_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            store,
            clock,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Record a progress message. Returns false once the job left RUNNING.
    pub async fn report(&self, message: impl Into<String>) -> RunnerResult<bool> {
        self.write(Some(message.into())).await
    }

    /// Refresh `updated_at` without changing the message.
    pub async fn heartbeat(&self) -> RunnerResult<bool> {
        self.write(None).await
    }

    async fn write(&self, message: Option<String>) -> RunnerResult<bool> {
        let update = ProgressUpdate {
            message,
            at: self.clock.now(),
        };
        self.store.update_progress(&self.job_id, update).await
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fh_core::{JobClass, JobStatus, ManualClock, NewJob};
    use fh_store::{MemoryJobStore, StatusChange};
    use std::time::Duration;

    #[tokio::test]
    async fn test_report_refreshes_running_job() {
        let store = Arc::new(MemoryJobStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let job = NewJob {
            class: JobClass::Slow,
            providers: vec![],
            priority: 0,
            payload: String::new(),
        }
        .into_job(clock.now());
        store.insert(job.clone()).await.unwrap();
        store
            .compare_and_set_status(
                &job.id,
                JobStatus::Queued,
                StatusChange::new(JobStatus::Running, clock.now()),
            )
            .await
            .unwrap();

        let reporter = ProgressReporter::new(&job.id, store.clone(), clock.clone());
        clock.advance(Duration::from_secs(120));
        assert!(reporter.report("searching evidence").await.unwrap());

        let stored = store.get(&job.id).await.unwrap();
        assert_eq!(stored.updated_at, clock.now());
        assert_eq!(stored.progress.as_deref(), Some("searching evidence"));

        store
            .compare_and_set_status(
                &job.id,
                JobStatus::Running,
                StatusChange::new(JobStatus::Failed, clock.now()),
            )
            .await
            .unwrap();
        assert!(!reporter.heartbeat().await.unwrap());
    }
}
