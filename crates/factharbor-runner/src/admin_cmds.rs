use anyhow::Result;
use fh_admin::{AdminClient, HealthReport};
use fh_config::RunnerConfig;
use fh_core::{Job, JobClass, NewJob, ProviderState, SystemHealth};
use fh_scheduler::CancelOutcome;

use crate::cli::OutputFormat;

fn client(config: &RunnerConfig) -> AdminClient {
    AdminClient::new(config.admin.base_url(), config.admin.token())
}

pub(crate) async fn handle_submit(
    config: &RunnerConfig,
    request: NewJob,
    format: OutputFormat,
) -> Result<()> {
    let job = client(config).submit(&request).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
        OutputFormat::Text => println!("{}", job.id),
    }
    Ok(())
}

pub(crate) async fn handle_cancel(
    config: &RunnerConfig,
    id: &str,
    format: OutputFormat,
) -> Result<()> {
    let outcome = client(config).cancel(id).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text => match outcome {
            CancelOutcome::Dequeued => println!("{id}: removed from queue"),
            CancelOutcome::Signalled => println!("{id}: cancellation signalled"),
            CancelOutcome::NotCancellable(status) => println!("{id}: already {status}"),
        },
    }
    Ok(())
}

pub(crate) async fn handle_job(config: &RunnerConfig, id: &str, format: OutputFormat) -> Result<()> {
    let job = client(config).job(id).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&job)?),
        OutputFormat::Text => print_job(&job),
    }
    Ok(())
}

pub(crate) async fn handle_health(config: &RunnerConfig, format: OutputFormat) -> Result<()> {
    let report = client(config).health().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_health(&report),
    }
    Ok(())
}

pub(crate) async fn handle_pause(config: &RunnerConfig, format: OutputFormat) -> Result<()> {
    let health = client(config).pause().await?;
    print_dispatch_state(&health, format)
}

pub(crate) async fn handle_resume(config: &RunnerConfig, format: OutputFormat) -> Result<()> {
    let health = client(config).resume().await?;
    print_dispatch_state(&health, format)
}

fn print_dispatch_state(health: &SystemHealth, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(health)?),
        OutputFormat::Text => println!("{}", dispatch_line(health)),
    }
    Ok(())
}

fn dispatch_line(health: &SystemHealth) -> String {
    match (health.paused, health.admin_paused) {
        (false, _) => "dispatch: running".to_string(),
        (true, true) => "dispatch: paused (operator)".to_string(),
        (true, false) => "dispatch: paused (critical provider open)".to_string(),
    }
}

fn print_health(report: &HealthReport) {
    println!("{}", dispatch_line(&report.health));
    println!(
        "slots: {}/{} running",
        report.queue.running_total, report.queue.total_slots
    );
    for class in JobClass::ALL {
        let running = report.queue.running.get(&class).copied().unwrap_or(0);
        let queued = report
            .queue
            .queued
            .iter()
            .filter(|job| job.class == class)
            .count();
        println!("  {:<4}  running {running}  queued {queued}", class.as_str());
    }
    if report.health.providers.is_empty() {
        println!("providers: none seen yet");
        return;
    }
    println!("providers:");
    for record in &report.health.providers {
        let detail = match (record.state, record.cooldown_deadline) {
            (ProviderState::Open, Some(deadline)) => {
                format!(" until {}", deadline.format("%H:%M:%S"))
            }
            (ProviderState::HalfOpen, _) if record.probe_in_flight => " (probing)".to_string(),
            _ => String::new(),
        };
        println!(
            "  {:<20} {:<9} failures {}{detail}",
            record.provider,
            record.state.to_string(),
            record.consecutive_failures
        );
    }
}

pub(crate) fn print_job(job: &Job) {
    println!("{}  {}  {}", job.id, job.class, job.status);
    if !job.providers.is_empty() {
        println!("  providers: {}", job.providers.join(", "));
    }
    println!("  enqueued:  {}", job.enqueued_at.to_rfc3339());
    println!("  updated:   {}", job.updated_at.to_rfc3339());
    if let Some(progress) = &job.progress {
        println!("  progress:  {progress}");
    }
    if let Some(reason) = &job.reason {
        match job.error_category {
            Some(category) => println!("  reason:    {reason} [{category}]"),
            None => println!("  reason:    {reason}"),
        }
    }
}
