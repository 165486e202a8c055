//! Terminal status writes.
//!
//! Both the scheduler (normal completion) and the reaper (crash recovery)
//! finish jobs. Each write is a single compare-and-set on the store, so
//! whichever writer lands second observes `false` and backs off. Losing is
//! the expected outcome of that race and is logged at debug level only.

use fh_core::{Clock, ErrorCategory, JobStatus, RunnerError, RunnerResult};
use fh_store::{JobStore, StatusChange};
use std::sync::Arc;
use tracing::debug;

/// Terminal status plus the detail recorded with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminal {
    pub status: JobStatus,
    pub reason: Option<String>,
    pub category: Option<ErrorCategory>,
}

impl Terminal {
    pub fn succeeded() -> Self {
        Self {
            status: JobStatus::Succeeded,
            reason: None,
            category: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            reason: Some(reason.into()),
            category: None,
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Cancelled,
            reason: Some(reason.into()),
            category: None,
        }
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }
}

#[derive(Clone)]
pub struct CompletionGuard {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
}

impl CompletionGuard {
    pub fn new(store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Move `id` from `expected` to a terminal status.
    ///
    /// Returns `Ok(false)` without writing when the job is no longer in
    /// `expected`. Rejects non-terminal targets and terminal `expected`
    /// states, since a terminal status is never rewritten.
    pub async fn try_set_terminal(
        &self,
        id: &str,
        expected: JobStatus,
        terminal: Terminal,
    ) -> RunnerResult<bool> {
        if !terminal.status.is_terminal() || expected.is_terminal() {
            return Err(RunnerError::InvalidTransition {
                id: id.to_string(),
                from: expected,
                to: terminal.status,
            });
        }

        let mut change = StatusChange::new(terminal.status, self.clock.now());
        if let Some(reason) = terminal.reason {
            change = change.with_reason(reason);
        }
        if let Some(category) = terminal.category {
            change = change.with_category(category);
        }

        let won = self
            .store
            .compare_and_set_status(id, expected, change)
            .await?;
        if !won {
            debug!(job = %id, %expected, to = %terminal.status, "terminal write lost the race");
        }
        Ok(won)
    }
}

impl std::fmt::Debug for CompletionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionGuard").finish_non_exhaustive()
    }
}
