use anyhow::{Context, Result};
use fh_admin::{AdminServer, AdminState};
use fh_config::{RunnerConfig, validate_serve_ready};
use fh_core::SystemClock;
use fh_executor::{CommandExecutor, HttpExecutor, TaskExecutor};
use fh_notify::WebhookNotifier;
use fh_scheduler::{BreakerConfig, ReaperConfig, Scheduler, SchedulerConfig, StaleJobReaper};
use fh_store::{FileJobStore, JobStore, MemoryJobStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long shutdown waits for cancelled jobs to settle.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub(crate) async fn handle_serve(config: RunnerConfig, ephemeral: bool) -> Result<()> {
    validate_serve_ready(&config)?;

    let store: Arc<dyn JobStore> = if ephemeral {
        info!("using in-memory job store; jobs are lost on exit");
        Arc::new(MemoryJobStore::new())
    } else {
        let path = config.store.resolve_path();
        info!(path = %path.display(), "using job store file");
        Arc::new(FileJobStore::open(path))
    };

    let executor = build_executor(&config)?;
    let mut scheduler = Scheduler::new(
        SchedulerConfig::from_section(&config.scheduler),
        BreakerConfig::from_section(&config.breaker),
        store,
        executor,
        Arc::new(SystemClock),
    );
    if let Some(webhook) = &config.webhook {
        let notifier = WebhookNotifier::from_section(webhook)?;
        info!(url = %notifier.url(), "breaker webhook enabled");
        scheduler = scheduler.with_listener(Arc::new(notifier));
    }

    let recovered = scheduler
        .recover()
        .await
        .context("failed to load queued jobs from store")?;
    if recovered > 0 {
        info!(recovered, "resuming queued jobs");
    }

    let shutdown = CancellationToken::new();
    let driver = scheduler.spawn_driver(shutdown.clone());
    let reaper = StaleJobReaper::new(
        scheduler.clone(),
        ReaperConfig::from_sections(&config.reaper, &config.scheduler),
    )
    .spawn(shutdown.clone());
    let admin = AdminServer::start(
        &config.admin.bind,
        config.admin.port,
        AdminState::new(scheduler.clone(), config.admin.token()),
    )
    .await?;

    println!("fhr serving on http://{}", admin.addr());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutting down");

    shutdown.cancel();
    admin.shutdown().await;
    for (name, task) in [("driver", driver), ("reaper", reaper)] {
        if let Err(error) = task.await {
            warn!(task = name, error = %error, "background task join failed");
        }
    }

    let cancelled = scheduler.cancel_running();
    if cancelled > 0 {
        info!(cancelled, "cancelling running jobs");
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while scheduler.running_total() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let left = scheduler.running_total();
        if left > 0 {
            warn!(left, "jobs still running at exit; the reaper will fail them");
        }
    }
    Ok(())
}

fn build_executor(config: &RunnerConfig) -> Result<Arc<dyn TaskExecutor>> {
    let executor = &config.executor;
    let command = executor
        .command
        .as_deref()
        .filter(|cmd| !cmd.trim().is_empty());
    match (command, executor.url.as_deref()) {
        (Some(command), None) => {
            info!(command, "running analyses as local commands");
            Ok(Arc::new(CommandExecutor::new(command, executor.env.clone())))
        }
        (None, Some(url)) => {
            info!(url, "running analyses over HTTP");
            Ok(Arc::new(HttpExecutor::new(url)))
        }
        _ => anyhow::bail!("exactly one of executor.command or executor.url must be set"),
    }
}
