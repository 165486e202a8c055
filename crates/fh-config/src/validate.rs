use anyhow::{Result, bail};
use fh_core::JobClass;

use crate::config::RunnerConfig;

/// Validate a loaded configuration.
/// Returns Ok(()) if valid, or Err with a message naming the offending key.
pub fn validate_config(config: &RunnerConfig) -> Result<()> {
    validate_scheduler(config)?;
    validate_breaker(config)?;
    validate_reaper(config)?;
    validate_webhook(config)?;
    Ok(())
}

/// Additional checks required before `fhr serve` can start.
pub fn validate_serve_ready(config: &RunnerConfig) -> Result<()> {
    validate_config(config)?;
    let has_command = config
        .executor
        .command
        .as_deref()
        .is_some_and(|cmd| !cmd.trim().is_empty());
    match (has_command, config.executor.url.as_deref()) {
        (true, Some(_)) => bail!("executor.command and executor.url are mutually exclusive"),
        (false, None) => bail!("executor.command or executor.url must be set to serve jobs"),
        (false, Some(url)) if !is_http_url(url) => {
            bail!("executor.url must be an http(s) URL (got '{url}')")
        }
        _ => {}
    }
    if config.admin.token().is_none() {
        tracing::warn!(
            token_env = %config.admin.token_env,
            "admin token not set; mutating admin endpoints will reject every request"
        );
    }
    Ok(())
}

fn validate_scheduler(config: &RunnerConfig) -> Result<()> {
    let scheduler = &config.scheduler;
    if scheduler.total_slots == 0 {
        bail!("scheduler.total_slots must be > 0 (got 0)");
    }
    if scheduler.reserved_fast_slots >= scheduler.total_slots {
        bail!(
            "scheduler.reserved_fast_slots ({}) must be less than scheduler.total_slots ({})",
            scheduler.reserved_fast_slots,
            scheduler.total_slots
        );
    }
    if scheduler.drain_interval_secs == 0 {
        bail!("scheduler.drain_interval_secs must be > 0 (got 0)");
    }

    for class in JobClass::ALL {
        let cap = scheduler.max_concurrency(class);
        if cap == 0 || cap > scheduler.total_slots {
            bail!(
                "scheduler.classes.{class}.max_concurrency must be in 1..={} (got {cap})",
                scheduler.total_slots
            );
        }
        let budget = scheduler.budget(class);
        if budget.is_zero() {
            bail!("scheduler.classes.{class}.budget_secs must be > 0 (got 0)");
        }
        let stale = scheduler.stale_threshold(class);
        if stale <= budget {
            bail!(
                "scheduler.classes.{class}.stale_threshold_secs ({}) must exceed budget_secs ({}); \
                 otherwise healthy jobs get reaped",
                stale.as_secs(),
                budget.as_secs()
            );
        }
    }

    let slow_cap = scheduler.max_concurrency(JobClass::Slow);
    if slow_cap + scheduler.reserved_fast_slots > scheduler.total_slots {
        bail!(
            "scheduler.classes.slow.max_concurrency ({slow_cap}) leaves fewer than \
             reserved_fast_slots ({}) of total_slots ({}) for fast jobs",
            scheduler.reserved_fast_slots,
            scheduler.total_slots
        );
    }
    Ok(())
}

fn validate_breaker(config: &RunnerConfig) -> Result<()> {
    let breaker = &config.breaker;
    if breaker.threshold == 0 {
        bail!("breaker.threshold must be > 0 (got 0)");
    }
    if breaker.cooldown_secs == 0 {
        bail!("breaker.cooldown_secs must be > 0 (got 0)");
    }
    if breaker.max_cooldown_secs < breaker.cooldown_secs {
        bail!(
            "breaker.max_cooldown_secs ({}) must be >= breaker.cooldown_secs ({})",
            breaker.max_cooldown_secs,
            breaker.cooldown_secs
        );
    }
    if breaker.backoff_multiplier == 0 {
        bail!("breaker.backoff_multiplier must be >= 1 (got 0)");
    }
    if let Some(empty) = breaker.critical_providers.iter().position(|p| p.trim().is_empty()) {
        bail!("breaker.critical_providers[{empty}] cannot be empty");
    }
    Ok(())
}

fn validate_reaper(config: &RunnerConfig) -> Result<()> {
    if config.reaper.interval_secs == 0 {
        bail!("reaper.interval_secs must be > 0 (got 0)");
    }
    Ok(())
}

fn validate_webhook(config: &RunnerConfig) -> Result<()> {
    let Some(webhook) = &config.webhook else {
        return Ok(());
    };
    if !is_http_url(&webhook.url) {
        bail!("webhook.url must be an http(s) URL (got '{}')", webhook.url);
    }
    if webhook.timeout_secs == 0 {
        bail!("webhook.timeout_secs must be > 0 (got 0)");
    }
    Ok(())
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
