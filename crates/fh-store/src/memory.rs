use async_trait::async_trait;
use fh_core::{Job, JobStatus, RunnerError, RunnerResult};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::{JobFilter, JobStore, ProgressUpdate, StatusChange, apply_progress, sort_jobs};

/// Process-local store. Used by tests and by `serve --ephemeral`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: Job) -> RunnerResult<()> {
        let mut jobs = self.jobs();
        if jobs.contains_key(&job.id) {
            return Err(RunnerError::DuplicateJob(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &str) -> RunnerResult<Job> {
        self.jobs()
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::JobNotFound(id.to_string()))
    }

    async fn list(&self, filter: &JobFilter) -> RunnerResult<Vec<Job>> {
        let mut out: Vec<Job> = self
            .jobs()
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        sort_jobs(&mut out);
        Ok(out)
    }

    async fn update_progress(&self, id: &str, update: ProgressUpdate) -> RunnerResult<bool> {
        let mut jobs = self.jobs();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RunnerError::JobNotFound(id.to_string()))?;
        Ok(apply_progress(job, update))
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: JobStatus,
        change: StatusChange,
    ) -> RunnerResult<bool> {
        let mut jobs = self.jobs();
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| RunnerError::JobNotFound(id.to_string()))?;
        if job.status != expected {
            return Ok(false);
        }
        change.apply(job);
        Ok(true)
    }
}
