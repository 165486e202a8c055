//! Error classification.
//!
//! Rules are evaluated top to bottom, first match wins:
//!
//! | Condition                                   | Category          | Retryable | Provider failure |
//! |---------------------------------------------|-------------------|-----------|------------------|
//! | HTTP 429, or quota-exhaustion wording       | `rate_limit`      | yes       | yes              |
//! | HTTP 500/502/503/529, or "overloaded"       | `provider_outage` | yes       | yes              |
//! | Deadline exceeded                           | `timeout`         | yes       | yes              |
//! | HTTP 401/403                                | `auth_error`      | no        | no               |
//! | DNS / TLS / connect failure                 | `network_error`   | yes       | yes              |
//! | anything else                               | `unknown`         | no        | no               |
//!
//! Timeouts must count: repeated timeouts are how an overloaded provider
//! usually shows up.

use fh_core::{Classification, ErrorCategory, OVERLOAD_PATTERNS, QUOTA_PATTERNS, TaskError};

const OUTAGE_STATUSES: &[u16] = &[500, 502, 503, 529];

fn verdict(category: ErrorCategory) -> Classification {
    let (retryable, counts_as_provider_failure) = match category {
        ErrorCategory::RateLimit
        | ErrorCategory::ProviderOutage
        | ErrorCategory::Timeout
        | ErrorCategory::NetworkError => (true, true),
        ErrorCategory::AuthError | ErrorCategory::Unknown => (false, false),
    };
    Classification {
        category,
        retryable,
        counts_as_provider_failure,
    }
}

/// Text the provider sent back, if this error shape carries any.
fn provider_text(err: &TaskError) -> Option<String> {
    match err {
        TaskError::Http { body, .. } => Some(body.to_ascii_lowercase()),
        TaskError::Provider { message, .. } => Some(message.to_ascii_lowercase()),
        _ => None,
    }
}

fn mentions(text: Option<&str>, patterns: &[&str]) -> bool {
    text.is_some_and(|t| patterns.iter().any(|p| t.contains(p)))
}

pub fn classify(err: &TaskError) -> Classification {
    let text = provider_text(err);
    let text = text.as_deref();
    let status = match err {
        TaskError::Http { status, .. } => Some(*status),
        _ => None,
    };

    let category = if status == Some(429) || mentions(text, QUOTA_PATTERNS) {
        ErrorCategory::RateLimit
    } else if status.is_some_and(|s| OUTAGE_STATUSES.contains(&s))
        || mentions(text, OVERLOAD_PATTERNS)
    {
        ErrorCategory::ProviderOutage
    } else if matches!(err, TaskError::Timeout { .. }) {
        ErrorCategory::Timeout
    } else if matches!(status, Some(401 | 403)) {
        ErrorCategory::AuthError
    } else if matches!(err, TaskError::Network { .. }) {
        ErrorCategory::NetworkError
    } else {
        ErrorCategory::Unknown
    };
    verdict(category)
}
