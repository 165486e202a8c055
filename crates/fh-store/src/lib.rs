//! Job persistence for the runner.
//!
//! The scheduler only relies on one hard guarantee from a store:
//! [`JobStore::compare_and_set_status`] is atomic. Both implementations
//! here perform the read and the write under a single lock.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fh_core::{ErrorCategory, Job, JobClass, JobStatus, RunnerResult};

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

/// Selection criteria for [`JobStore::list`]. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub class: Option<JobClass>,
}

impl JobFilter {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            class: None,
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| s == job.status) && self.class.is_none_or(|c| c == job.class)
    }
}

/// Fields written alongside a status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: JobStatus,
    pub reason: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub at: DateTime<Utc>,
}

impl StatusChange {
    pub fn new(status: JobStatus, at: DateTime<Utc>) -> Self {
        Self {
            status,
            reason: None,
            error_category: None,
            at,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.error_category = Some(category);
        self
    }

    pub(crate) fn apply(&self, job: &mut Job) {
        job.status = self.status;
        job.updated_at = self.at;
        if self.reason.is_some() {
            job.reason.clone_from(&self.reason);
        }
        if self.error_category.is_some() {
            job.error_category = self.error_category;
        }
    }
}

/// Heartbeat written by a running executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub message: Option<String>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Fails with `DuplicateJob` if the id exists.
    async fn insert(&self, job: Job) -> RunnerResult<()>;

    /// Fetch one job. Fails with `JobNotFound` if absent.
    async fn get(&self, id: &str) -> RunnerResult<Job>;

    /// Jobs matching `filter`, ordered by `(enqueued_at, priority desc, id)`.
    async fn list(&self, filter: &JobFilter) -> RunnerResult<Vec<Job>>;

    /// Refresh `updated_at` (and optionally the progress message) of a
    /// RUNNING job. Returns false without writing if the job is not RUNNING.
    async fn update_progress(&self, id: &str, update: ProgressUpdate) -> RunnerResult<bool>;

    /// Atomically move `id` from `expected` to `change.status`.
    ///
    /// Returns `Ok(false)` and writes nothing when the current status is not
    /// `expected`.
    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: JobStatus,
        change: StatusChange,
    ) -> RunnerResult<bool>;
}

pub(crate) fn sort_jobs(jobs: &mut [Job]) {
    jobs.sort_by(|a, b| {
        a.enqueued_at
            .cmp(&b.enqueued_at)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn apply_progress(job: &mut Job, update: ProgressUpdate) -> bool {
    if job.status != JobStatus::Running {
        return false;
    }
    job.updated_at = update.at;
    if update.message.is_some() {
        job.progress = update.message;
    }
    true
}

#[cfg(test)]
pub(crate) mod conformance;
