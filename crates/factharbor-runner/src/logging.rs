//! Tracing setup for the `fhr` binary.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Create a non-blocking writer for `{log_dir}/serve-{timestamp}.log`.
///
/// The returned guard flushes on drop and must outlive all logging.
pub fn create_serve_log_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;

    let file_name = format!("serve-{}.log", Utc::now().format("%Y%m%d-%H%M%S"));
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    Ok(tracing_appender::non_blocking(file_appender))
}

/// Install the global subscriber: stderr always, plus `file` when given.
/// `RUST_LOG` controls the filter, defaulting to `info`.
pub fn init(file: Option<NonBlocking>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = file.map(|writer| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .ok();
}
