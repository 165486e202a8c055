//! Admission control for analysis jobs.
//!
//! - [`classifier`]: normalised error -> category.
//! - [`breaker`]: per-provider circuit breaker and the global pause flag.
//! - [`guard`]: race-free terminal status writes.
//! - [`scheduler`]: queue, per-class concurrency partitioning, dispatch.
//! - [`reaper`]: fails RUNNING jobs whose heartbeat went stale.

pub mod breaker;
pub mod classifier;
pub mod guard;
pub mod reaper;
pub mod scheduler;

pub use breaker::{BreakerConfig, CircuitBreaker};
pub use classifier::classify;
pub use guard::{CompletionGuard, Terminal};
pub use reaper::{ReaperConfig, StaleJobReaper};
pub use scheduler::{CancelOutcome, QueueSnapshot, QueuedJobView, Scheduler, SchedulerConfig};
