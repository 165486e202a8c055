//! Runner configuration (`~/.config/factharbor-runner/config.toml`).
//!
//! Every section is optional; a missing file yields the defaults below.
//! Secrets (admin token, webhook signing key) are never stored in the file,
//! only the names of the environment variables that hold them.

use anyhow::{Context, Result, bail};
use fh_core::JobClass;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;

const DEFAULT_TOTAL_SLOTS: usize = 4;
const DEFAULT_RESERVED_FAST_SLOTS: usize = 1;
const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 5;
const DEFAULT_FAST_BUDGET_SECS: u64 = 5 * 60;
const DEFAULT_SLOW_BUDGET_SECS: u64 = 20 * 60;
const DEFAULT_FAST_STALE_SECS: u64 = 15 * 60;
const DEFAULT_SLOW_STALE_SECS: u64 = 45 * 60;
const DEFAULT_BREAKER_THRESHOLD: u32 = 3;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_MAX_COOLDOWN_SECS: u64 = 10 * 60;
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 30;
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ADMIN_BIND: &str = "127.0.0.1";
const DEFAULT_ADMIN_PORT: u16 = 8787;
const DEFAULT_ADMIN_TOKEN_ENV: &str = "FH_ADMIN_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub breaker: BreakerSection,
    #[serde(default)]
    pub reaper: ReaperSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookSection>,
    #[serde(default)]
    pub admin: AdminSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub store: StoreSection,
}

/// Concurrency partitioning and drain cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_total_slots")]
    pub total_slots: usize,
    /// Slots the slow class may never occupy.
    #[serde(default = "default_reserved_fast_slots")]
    pub reserved_fast_slots: usize,
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    #[serde(default)]
    pub classes: BTreeMap<JobClass, ClassSection>,
}

/// Per-class overrides. `None` = derived default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassSection {
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Wall-clock budget for a single job of this class.
    #[serde(default)]
    pub budget_secs: Option<u64>,
    /// RUNNING jobs silent for longer than this are reaped.
    #[serde(default)]
    pub stale_threshold_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSection {
    #[serde(default = "default_breaker_threshold")]
    pub threshold: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_max_cooldown_secs")]
    pub max_cooldown_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Providers whose OPEN state pauses all dispatch. Empty = all providers.
    #[serde(default)]
    pub critical_providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperSection {
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSection {
    pub url: String,
    /// Environment variable holding the HMAC signing key.
    #[serde(default)]
    pub secret_env: Option<String>,
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSection {
    #[serde(default = "default_admin_bind")]
    pub bind: String,
    #[serde(default = "default_admin_port")]
    pub port: u16,
    /// Environment variable holding the operator bearer token.
    #[serde(default = "default_admin_token_env")]
    pub token_env: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Shell command that performs one analysis.
    #[serde(default)]
    pub command: Option<String>,
    /// Analysis service endpoint. Mutually exclusive with `command`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Environment variables injected into the analysis process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default)]
    pub path: Option<String>,
}

fn default_total_slots() -> usize {
    DEFAULT_TOTAL_SLOTS
}

fn default_reserved_fast_slots() -> usize {
    DEFAULT_RESERVED_FAST_SLOTS
}

fn default_drain_interval_secs() -> u64 {
    DEFAULT_DRAIN_INTERVAL_SECS
}

fn default_breaker_threshold() -> u32 {
    DEFAULT_BREAKER_THRESHOLD
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_max_cooldown_secs() -> u64 {
    DEFAULT_MAX_COOLDOWN_SECS
}

fn default_backoff_multiplier() -> u32 {
    DEFAULT_BACKOFF_MULTIPLIER
}

fn default_reaper_interval_secs() -> u64 {
    DEFAULT_REAPER_INTERVAL_SECS
}

fn default_webhook_timeout_secs() -> u64 {
    DEFAULT_WEBHOOK_TIMEOUT_SECS
}

fn default_admin_bind() -> String {
    DEFAULT_ADMIN_BIND.to_string()
}

fn default_admin_port() -> u16 {
    DEFAULT_ADMIN_PORT
}

fn default_admin_token_env() -> String {
    DEFAULT_ADMIN_TOKEN_ENV.to_string()
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            total_slots: DEFAULT_TOTAL_SLOTS,
            reserved_fast_slots: DEFAULT_RESERVED_FAST_SLOTS,
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL_SECS,
            classes: BTreeMap::new(),
        }
    }
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BREAKER_THRESHOLD,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            max_cooldown_secs: DEFAULT_MAX_COOLDOWN_SECS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            critical_providers: Vec::new(),
        }
    }
}

impl Default for ReaperSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_REAPER_INTERVAL_SECS,
        }
    }
}

impl Default for AdminSection {
    fn default() -> Self {
        Self {
            bind: DEFAULT_ADMIN_BIND.to_string(),
            port: DEFAULT_ADMIN_PORT,
            token_env: DEFAULT_ADMIN_TOKEN_ENV.to_string(),
        }
    }
}

impl SchedulerSection {
    /// Resolved concurrency cap for a class.
    ///
    /// Lookup order: class override -> partition default. The slow class
    /// defaults to `total_slots - reserved_fast_slots`; fast may use every slot.
    pub fn max_concurrency(&self, class: JobClass) -> usize {
        if let Some(cap) = self.classes.get(&class).and_then(|c| c.max_concurrency) {
            return cap;
        }
        match class {
            JobClass::Fast => self.total_slots,
            JobClass::Slow => self.total_slots.saturating_sub(self.reserved_fast_slots),
        }
    }

    pub fn budget(&self, class: JobClass) -> Duration {
        let secs = self
            .classes
            .get(&class)
            .and_then(|c| c.budget_secs)
            .unwrap_or(match class {
                JobClass::Fast => DEFAULT_FAST_BUDGET_SECS,
                JobClass::Slow => DEFAULT_SLOW_BUDGET_SECS,
            });
        Duration::from_secs(secs)
    }

    pub fn stale_threshold(&self, class: JobClass) -> Duration {
        let secs = self
            .classes
            .get(&class)
            .and_then(|c| c.stale_threshold_secs)
            .unwrap_or(match class {
                JobClass::Fast => DEFAULT_FAST_STALE_SECS,
                JobClass::Slow => DEFAULT_SLOW_STALE_SECS,
            });
        Duration::from_secs(secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }
}

impl BreakerSection {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_secs)
    }
}

impl ReaperSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl WebhookSection {
    /// Signing key from the configured environment variable, if set and non-empty.
    pub fn secret(&self) -> Option<String> {
        read_env(self.secret_env.as_deref()?)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AdminSection {
    /// Operator bearer token from the configured environment variable.
    pub fn token(&self) -> Option<String> {
        read_env(&self.token_env)
    }

    /// Base URL clients use to reach the admin endpoint.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.bind, self.port)
    }
}

impl StoreSection {
    pub fn resolve_path(&self) -> PathBuf {
        match self.path.as_deref() {
            Some(raw) => paths::expand_home(raw),
            None => paths::default_store_file(),
        }
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl RunnerConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, the user config file is
    /// read if present and defaults are returned otherwise.
    pub fn load(path_override: Option<&Path>) -> Result<Self> {
        if let Some(path) = path_override {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            return Self::load_from(path);
        }

        match paths::config_file() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                tracing::debug!("no runner config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Commented config template for `fhr config template`.
    pub fn default_template() -> String {
        r#"# FactHarbor runner configuration
# Location: ~/.config/factharbor-runner/config.toml

[scheduler]
total_slots = 4          # Jobs running at once, all classes combined
reserved_fast_slots = 1  # Slots slow jobs may never take
drain_interval_secs = 5  # Periodic admission pass

# Per-class overrides. Uncomment as needed.
#
# [scheduler.classes.fast]
# max_concurrency = 4
# budget_secs = 300
# stale_threshold_secs = 900
#
# [scheduler.classes.slow]
# max_concurrency = 3
# budget_secs = 1200
# stale_threshold_secs = 2700

[breaker]
threshold = 3             # Consecutive job failures before a provider opens
cooldown_secs = 30        # First cooldown; doubles on repeated trips
max_cooldown_secs = 600
backoff_multiplier = 2
critical_providers = []   # Empty: any open provider pauses dispatch

[reaper]
interval_secs = 30

# [webhook]
# url = "https://hooks.example.org/factharbor/breaker"
# secret_env = "FH_WEBHOOK_SECRET"
# timeout_secs = 10

[admin]
bind = "127.0.0.1"
port = 8787
token_env = "FH_ADMIN_TOKEN"

[executor]
# command = "factharbor-analyze"   # or: url = "http://127.0.0.1:5000/analyze"
# [executor.env]
# FH_ANALYSIS_PROFILE = "default"

[store]
# path = "~/.local/state/factharbor-runner/jobs.json"
"#
        .to_string()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
