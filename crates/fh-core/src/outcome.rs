//! Job outcomes and the closed set of error shapes an executor may raise.
//!
//! Provider SDKs fail in many ad-hoc ways. Executors normalise those
//! failures into [`TaskError`] at their boundary so the classifier only
//! ever matches on this enum.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network-level failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkFailure {
    Dns,
    Tls,
    Connect,
}

impl std::fmt::Display for NetworkFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dns => write!(f, "DNS"),
            Self::Tls => write!(f, "TLS"),
            Self::Connect => write!(f, "connect"),
        }
    }
}

/// Normalised executor failure.
///
/// `provider` is `None` when the executor could not tell which upstream
/// failed; the scheduler then charges every provider the job lists.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("{} returned HTTP {status}: {body}", describe(.provider))]
    Http {
        provider: Option<String>,
        status: u16,
        body: String,
    },

    #[error("Timed out after {}s", .elapsed.as_secs())]
    Timeout {
        provider: Option<String>,
        elapsed: Duration,
    },

    #[error("{kind} failure talking to {}: {message}", describe(.provider))]
    Network {
        provider: Option<String>,
        kind: NetworkFailure,
        message: String,
    },

    /// Provider-reported failure without an HTTP status (SDK message only).
    #[error("{} failed: {message}", describe(.provider))]
    Provider {
        provider: Option<String>,
        message: String,
    },

    #[error("{message}")]
    Other { message: String },
}

fn describe(provider: &Option<String>) -> String {
    match provider {
        Some(name) => format!("Provider '{name}'"),
        None => "Provider".to_string(),
    }
}

impl TaskError {
    /// Provider this failure is attributable to, if the executor knew it.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Http { provider, .. }
            | Self::Network { provider, .. }
            | Self::Provider { provider, .. }
            | Self::Timeout { provider, .. } => provider.as_deref(),
            Self::Other { .. } => None,
        }
    }
}

/// Final result of one executor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(TaskError),
    /// The executor observed the job's cancellation signal and stopped.
    Cancelled,
}

/// Error category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    ProviderOutage,
    Timeout,
    AuthError,
    NetworkError,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::ProviderOutage => "provider_outage",
            Self::Timeout => "timeout",
            Self::AuthError => "auth_error",
            Self::NetworkError => "network_error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifier verdict for a [`TaskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: ErrorCategory,
    /// Transient failure. Retry is not automatic; this only informs reporting.
    pub retryable: bool,
    pub counts_as_provider_failure: bool,
}

/// Provider wording for an exhausted quota or rate limit. Lowercase.
pub const QUOTA_PATTERNS: &[&str] = &[
    "quota",
    "rate limit",
    "rate_limit",
    "too many requests",
    "resource exhausted",
    "resource_exhausted",
];

/// Provider wording for an overloaded service. Lowercase.
pub const OVERLOAD_PATTERNS: &[&str] = &["overloaded", "over capacity"];

/// Whether lowercased `text` reports a quota or overload condition.
pub fn mentions_capacity(text: &str) -> bool {
    QUOTA_PATTERNS
        .iter()
        .chain(OVERLOAD_PATTERNS)
        .any(|p| text.contains(p))
}
