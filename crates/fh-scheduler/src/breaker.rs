//! Per-provider circuit breaker.
//!
//! ```text
//! CLOSED --threshold-th qualifying failure--> OPEN
//! OPEN   --cooldown elapsed (seen by is_open)--> HALF_OPEN
//! HALF_OPEN --probe succeeds--> CLOSED
//! HALF_OPEN --probe fails--> OPEN (longer cooldown)
//! ```
//!
//! Only one probe job runs against a HALF_OPEN provider at a time: once the
//! scheduler dispatches it (`mark_dispatched`), `is_open` answers true
//! until that job settles.
//!
//! The breaker is plain data. The scheduler owns it under its state lock
//! and forwards queued transitions (`take_transitions`) to listeners after
//! releasing the lock.

use chrono::{DateTime, Utc};
use fh_config::BreakerSection;
use fh_core::{
    BreakerTransition, Classification, ProviderHealthRecord, ProviderState, SystemHealth,
};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub cooldown: Duration,
    pub max_cooldown: Duration,
    pub backoff_multiplier: u32,
    /// Providers whose OPEN state pauses every dispatch. Empty = all.
    pub critical_providers: Vec<String>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from_section(&BreakerSection::default())
    }
}

impl BreakerConfig {
    pub fn from_section(section: &BreakerSection) -> Self {
        Self {
            threshold: section.threshold.max(1),
            cooldown: section.cooldown(),
            max_cooldown: section.max_cooldown().max(section.cooldown()),
            backoff_multiplier: section.backoff_multiplier.max(1),
            critical_providers: section.critical_providers.clone(),
        }
    }

    /// Cooldown after the `trips`-th consecutive opening.
    pub fn cooldown_for(&self, trips: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .saturating_pow(trips.saturating_sub(1));
        self.cooldown
            .checked_mul(factor)
            .unwrap_or(self.max_cooldown)
            .min(self.max_cooldown)
    }

    fn is_critical(&self, provider: &str) -> bool {
        self.critical_providers.is_empty() || self.critical_providers.iter().any(|p| p == provider)
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    records: BTreeMap<String, ProviderHealthRecord>,
    admin_paused: bool,
    pending: Vec<BreakerTransition>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        let records = config
            .critical_providers
            .iter()
            .map(|p| (p.clone(), ProviderHealthRecord::new(p.clone())))
            .collect();
        Self {
            config,
            records,
            admin_paused: false,
            pending: Vec::new(),
        }
    }

    pub fn record(&self, provider: &str) -> Option<&ProviderHealthRecord> {
        self.records.get(provider)
    }

    /// Whether work for `provider` must be held back right now.
    ///
    /// An OPEN provider whose cooldown has elapsed moves to HALF_OPEN here
    /// and answers false so a single probe can go out.
    pub fn is_open(&mut self, provider: &str, now: DateTime<Utc>) -> bool {
        let Some(record) = self.records.get_mut(provider) else {
            return false;
        };
        match record.state {
            ProviderState::Closed => false,
            ProviderState::HalfOpen => record.probe_in_flight,
            ProviderState::Open => {
                if record.cooldown_deadline.is_some_and(|deadline| now < deadline) {
                    return true;
                }
                record.state = ProviderState::HalfOpen;
                record.probe_in_flight = false;
                self.pending.push(BreakerTransition {
                    provider: provider.to_string(),
                    from_state: ProviderState::Open,
                    to_state: ProviderState::HalfOpen,
                    timestamp: now,
                });
                false
            }
        }
    }

    /// True when no provider in `providers` is open.
    pub fn admits(&mut self, providers: &[String], now: DateTime<Utc>) -> bool {
        // Evaluate all so every elapsed cooldown is noticed in one pass.
        providers
            .iter()
            .fold(true, |ok, p| !self.is_open(p, now) && ok)
    }

    /// Note a dispatched job. Returns the HALF_OPEN providers it now probes.
    pub fn mark_dispatched(&mut self, providers: &[String]) -> Vec<String> {
        let mut probes = Vec::new();
        for provider in providers {
            if let Some(record) = self.records.get_mut(provider) {
                if record.state == ProviderState::HalfOpen && !record.probe_in_flight {
                    record.probe_in_flight = true;
                    probes.push(provider.clone());
                }
            }
        }
        probes
    }

    /// Release a probe slot without judging the provider.
    pub fn release_probe(&mut self, provider: &str) {
        if let Some(record) = self.records.get_mut(provider) {
            record.probe_in_flight = false;
        }
    }

    /// Feed one job outcome for `provider`. `None` means success.
    ///
    /// `probe` is true only for the job holding the provider's HALF_OPEN
    /// probe slot. Only that job moves a HALF_OPEN provider; other results
    /// adjust the failure count alone. The probe slot itself is released by
    /// `release_probe` when the job leaves the scheduler.
    pub fn record_result(
        &mut self,
        provider: &str,
        classification: Option<&Classification>,
        probe: bool,
        now: DateTime<Utc>,
    ) {
        let record = self
            .records
            .entry(provider.to_string())
            .or_insert_with(|| ProviderHealthRecord::new(provider));

        match classification {
            None => {
                record.consecutive_failures = 0;
                if record.state == ProviderState::HalfOpen && probe {
                    record.state = ProviderState::Closed;
                    record.trips = 0;
                    record.opened_at = None;
                    record.cooldown_deadline = None;
                    self.pending.push(BreakerTransition {
                        provider: provider.to_string(),
                        from_state: ProviderState::HalfOpen,
                        to_state: ProviderState::Closed,
                        timestamp: now,
                    });
                }
            }
            Some(c) if !c.counts_as_provider_failure => {}
            Some(_) => {
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                let trip = match record.state {
                    ProviderState::HalfOpen => probe,
                    ProviderState::Closed => record.consecutive_failures >= self.config.threshold,
                    // Stragglers dispatched before the trip do not extend the cooldown.
                    ProviderState::Open => false,
                };
                if trip {
                    let from = record.state;
                    record.state = ProviderState::Open;
                    record.trips = record.trips.saturating_add(1);
                    record.opened_at = Some(now);
                    record.cooldown_deadline = Some(now + self.config.cooldown_for(record.trips));
                    self.pending.push(BreakerTransition {
                        provider: provider.to_string(),
                        from_state: from,
                        to_state: ProviderState::Open,
                        timestamp: now,
                    });
                }
            }
        }
    }

    pub fn pause(&mut self) {
        self.admin_paused = true;
    }

    /// Clear the operator pause. Provider counters are left alone.
    pub fn resume(&mut self) {
        self.admin_paused = false;
    }

    pub fn is_admin_paused(&self) -> bool {
        self.admin_paused
    }

    /// Dispatch halt: operator pause, or any critical provider open.
    pub fn is_paused(&mut self, now: DateTime<Utc>) -> bool {
        let critical: Vec<String> = self
            .records
            .keys()
            .filter(|p| self.config.is_critical(p))
            .cloned()
            .collect();
        let any_open = critical
            .iter()
            .fold(false, |open, p| self.is_open(p, now) || open);
        self.admin_paused || any_open
    }

    /// Snapshot for the health endpoint. Applies elapsed cooldowns first.
    pub fn health(&mut self, now: DateTime<Utc>) -> SystemHealth {
        let paused = self.is_paused(now);
        SystemHealth {
            providers: self.records.values().cloned().collect(),
            paused,
            admin_paused: self.admin_paused,
        }
    }

    /// Drain queued state changes for delivery to listeners.
    pub fn take_transitions(&mut self) -> Vec<BreakerTransition> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
