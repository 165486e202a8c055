use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::outcome::ErrorCategory;

/// Scheduling class of a job, used for concurrency partitioning.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum JobClass {
    /// Short analyses (seconds to a few minutes).
    Fast,
    /// Long analyses (5-15+ minutes).
    Slow,
}

impl JobClass {
    pub const ALL: [JobClass; 2] = [JobClass::Fast, JobClass::Slow];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Slow => "slow",
        }
    }
}

impl std::fmt::Display for JobClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(Self::Fast),
            "slow" => Ok(Self::Slow),
            other => Err(format!(
                "Invalid job class '{other}'. Valid values: fast, slow"
            )),
        }
    }
}

/// Lifecycle status of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses are immutable once written.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of analysis work as persisted in the job store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// ULID assigned at submission.
    pub id: String,
    pub class: JobClass,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    /// Refreshed by every progress or status write.
    pub updated_at: DateTime<Utc>,
    /// FIFO tie-break only: higher wins between jobs enqueued at the same instant.
    #[serde(default)]
    pub priority: i32,
    /// Providers this job's analysis depends on (e.g. `llm:opus`, `search`).
    #[serde(default)]
    pub providers: Vec<String>,
    /// Opaque analysis input handed to the executor.
    #[serde(default)]
    pub payload: String,
    /// Why the job reached its terminal status, if not plain success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    /// Last progress message reported by the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

/// Submission request for a new job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewJob {
    pub class: JobClass,
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub payload: String,
}

impl NewJob {
    /// Materialize a QUEUED job with a fresh ULID.
    pub fn into_job(self, now: DateTime<Utc>) -> Job {
        Job {
            id: Ulid::new().to_string(),
            class: self.class,
            status: JobStatus::Queued,
            enqueued_at: now,
            updated_at: now,
            priority: self.priority,
            providers: self.providers,
            payload: self.payload,
            reason: None,
            error_category: None,
            progress: None,
        }
    }
}

/// Circuit state of a single provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Health bookkeeping for one named provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealthRecord {
    pub provider: String,
    pub consecutive_failures: u32,
    pub state: ProviderState,
    pub opened_at: Option<DateTime<Utc>>,
    pub cooldown_deadline: Option<DateTime<Utc>>,
    /// Consecutive openings without an intervening close; drives backoff.
    pub trips: u32,
    /// A HALF_OPEN probe job is currently running.
    pub probe_in_flight: bool,
}

impl ProviderHealthRecord {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            consecutive_failures: 0,
            state: ProviderState::Closed,
            opened_at: None,
            cooldown_deadline: None,
            trips: 0,
            probe_in_flight: false,
        }
    }
}

/// Derived admission view served by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub providers: Vec<ProviderHealthRecord>,
    /// True when dispatch is halted (admin pause or a critical provider open).
    pub paused: bool,
    pub admin_paused: bool,
}
