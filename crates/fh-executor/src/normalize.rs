//! Turn raw provider failures into [`TaskError`].
//!
//! Executors call these at their boundary so the classifier never sees an
//! SDK-specific error shape.

use fh_core::{NetworkFailure, TaskError, mentions_capacity};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

/// Longest body or message kept on a normalised error.
const MAX_DETAIL_CHARS: usize = 500;

/// `HTTP 503`, `status: 429`, `status code 502`, `HTTP/1.1 401`.
static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:http(?:/[0-9.]+)?|status(?:\s+code)?)\s*[:=]?\s*([1-5][0-9]{2})\b")
        .expect("status regex is valid")
});

const TIMEOUT_PATTERNS: &[&str] = &["timed out", "deadline exceeded", "timeout"];
const DNS_PATTERNS: &[&str] = &[
    "could not resolve",
    "name or service not known",
    "nodename nor servname",
    "no such host",
    "dns error",
];
const TLS_PATTERNS: &[&str] = &["certificate", "tls handshake", "ssl"];
const CONNECT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "failed to connect",
];

fn truncate(detail: &str) -> String {
    let trimmed = detail.trim();
    match trimmed.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn matches_any(haystack: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| haystack.contains(p))
}

/// Non-2xx HTTP response from a provider.
pub fn from_http(provider: Option<&str>, status: u16, body: &str) -> TaskError {
    TaskError::Http {
        provider: provider.map(str::to_string),
        status,
        body: truncate(body),
    }
}

/// Transport or status error raised by `reqwest`.
pub fn from_reqwest(provider: Option<&str>, err: &reqwest::Error, elapsed: Duration) -> TaskError {
    let provider_owned = provider.map(str::to_string);
    if err.is_timeout() {
        return TaskError::Timeout {
            provider: provider_owned,
            elapsed,
        };
    }
    if let Some(status) = err.status() {
        return from_http(provider, status.as_u16(), &err.to_string());
    }

    let chain = error_chain(err);
    let lower = chain.to_ascii_lowercase();
    if err.is_connect() || matches_any(&lower, DNS_PATTERNS) || matches_any(&lower, TLS_PATTERNS)
    {
        let kind = if matches_any(&lower, DNS_PATTERNS) {
            NetworkFailure::Dns
        } else if matches_any(&lower, TLS_PATTERNS) {
            NetworkFailure::Tls
        } else {
            NetworkFailure::Connect
        };
        return TaskError::Network {
            provider: provider_owned,
            kind,
            message: truncate(&chain),
        };
    }

    TaskError::Provider {
        provider: provider_owned,
        message: truncate(&chain),
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}

/// Non-zero exit of an analysis process, judged from its stderr.
///
/// Checks, in order: an HTTP status mention, timeout wording, DNS / TLS /
/// connect wording. Anything else becomes a `Provider` error when the
/// provider is known and `Other` when it is not; quota and overload
/// wording is kept verbatim in the message for the classifier.
pub fn from_process_output(
    provider: Option<&str>,
    exit_code: i32,
    stderr: &str,
    elapsed: Duration,
) -> TaskError {
    let detail = last_lines(stderr, 5);
    let lower = stderr.to_ascii_lowercase();
    let provider_owned = provider.map(str::to_string);

    if let Some(status) = STATUS_RE
        .captures(stderr)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u16>().ok())
    {
        return from_http(provider, status, &detail);
    }
    if matches_any(&lower, TIMEOUT_PATTERNS) {
        return TaskError::Timeout {
            provider: provider_owned,
            elapsed,
        };
    }
    for (patterns, kind) in [
        (DNS_PATTERNS, NetworkFailure::Dns),
        (TLS_PATTERNS, NetworkFailure::Tls),
        (CONNECT_PATTERNS, NetworkFailure::Connect),
    ] {
        if matches_any(&lower, patterns) {
            return TaskError::Network {
                provider: provider_owned,
                kind,
                message: truncate(&detail),
            };
        }
    }

    let message = if detail.is_empty() {
        format!("analysis exited with code {exit_code}")
    } else {
        truncate(&detail)
    };
    if provider_owned.is_some() || mentions_capacity(&lower) {
        TaskError::Provider {
            provider: provider_owned,
            message,
        }
    } else {
        TaskError::Other { message }
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO: Duration = Duration::ZERO;

    #[test]
    fn test_status_code_in_stderr_becomes_http() {
        let err = from_process_output(
            Some("llm:opus"),
            1,
            "calling model...\nError: HTTP 429 Too Many Requests",
            ZERO,
        );
        match err {
            TaskError::Http {
                provider, status, ..
            } => {
                assert_eq!(provider.as_deref(), Some("llm:opus"));
                assert_eq!(status, 429);
            }
            other => panic!("expected Http, got {other:?}"),
        }
    }

    #[test]
    fn test_status_code_variants() {
        for (stderr, expected) in [
            ("status: 503", 503),
            ("upstream status code 502 from gateway", 502),
            ("HTTP/1.1 401 Unauthorized", 401),
        ] {
            let err = from_process_output(None, 1, stderr, ZERO);
            assert!(
                matches!(err, TaskError::Http { status, .. } if status == expected),
                "{stderr} -> {err:?}"
            );
        }
    }

    #[test]
    fn test_bare_numbers_are_not_statuses() {
        let err = from_process_output(None, 2, "processed 429 claims then crashed", ZERO);
        assert!(matches!(err, TaskError::Other { .. }), "got {err:?}");
    }

    #[test]
    fn test_timeout_wording() {
        let err = from_process_output(
            Some("search"),
            1,
            "request timed out",
            Duration::from_secs(7),
        );
        assert_eq!(
            err,
            TaskError::Timeout {
                provider: Some("search".into()),
                elapsed: Duration::from_secs(7),
            }
        );
    }

    #[test]
    fn test_network_wording() {
        let err = from_process_output(None, 1, "curl: (6) Could not resolve host: api", ZERO);
        assert!(matches!(
            err,
            TaskError::Network {
                kind: NetworkFailure::Dns,
                ..
            }
        ));

        let err = from_process_output(None, 1, "SSL certificate problem", ZERO);
        assert!(matches!(
            err,
            TaskError::Network {
                kind: NetworkFailure::Tls,
                ..
            }
        ));

        let err = from_process_output(None, 1, "Connection refused (os error 111)", ZERO);
        assert!(matches!(
            err,
            TaskError::Network {
                kind: NetworkFailure::Connect,
                ..
            }
        ));
    }

    #[test]
    fn test_quota_wording_without_provider_is_provider_error() {
        let err = from_process_output(None, 1, "quota exceeded for this key", ZERO);
        match err {
            TaskError::Provider { provider, message } => {
                assert!(provider.is_none());
                assert!(message.contains("quota exceeded"));
            }
            other => panic!("expected Provider, got {other:?}"),
        }
    }

    #[test]
    fn test_overload_wording_without_provider_is_provider_error() {
        for stderr in ["model is over capacity", "Too Many Requests, slow down"] {
            let err = from_process_output(None, 1, stderr, ZERO);
            assert!(
                matches!(err, TaskError::Provider { provider: None, .. }),
                "{stderr}: got {err:?}"
            );
        }
    }

    #[test]
    fn test_empty_stderr_reports_exit_code() {
        let err = from_process_output(None, 3, "\n\n", ZERO);
        assert_eq!(
            err,
            TaskError::Other {
                message: "analysis exited with code 3".into()
            }
        );
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let body = "x".repeat(2_000);
        let TaskError::Http { body, .. } = from_http(Some("search"), 500, &body) else {
            panic!("expected Http");
        };
        assert_eq!(body.len(), MAX_DETAIL_CHARS + 3);
        assert!(body.ends_with("..."));
    }

    #[tokio::test]
    async fn test_reqwest_connect_error_is_network() {
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:1/")
            .send()
            .await
            .unwrap_err();
        let normalised = from_reqwest(Some("search"), &err, ZERO);
        assert!(
            matches!(normalised, TaskError::Network { ref provider, .. } if provider.as_deref() == Some("search")),
            "got {normalised:?}"
        );
    }
}
