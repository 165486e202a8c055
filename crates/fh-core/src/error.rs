use crate::types::JobStatus;

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Job '{0}' already exists")]
    DuplicateJob(String),

    #[error("Invalid status transition for job '{id}': {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job store is corrupt: {0}")]
    Corrupt(String),

    #[error("Job store lock poisoned")]
    Poisoned,
}

pub type RunnerResult<T> = std::result::Result<T, RunnerError>;
