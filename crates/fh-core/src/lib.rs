//! Shared types for the FactHarbor job runner: jobs, outcomes, provider
//! health records, the injectable clock, and the error taxonomy.

pub mod clock;
pub mod error;
pub mod events;
pub mod outcome;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RunnerError, RunnerResult};
pub use events::{BreakerTransition, TransitionListener};
pub use outcome::{
    Classification, ErrorCategory, NetworkFailure, OVERLOAD_PATTERNS, Outcome, QUOTA_PATTERNS,
    TaskError, mentions_capacity,
};
pub use types::{
    Job, JobClass, JobStatus, NewJob, ProviderHealthRecord, ProviderState, SystemHealth,
};
