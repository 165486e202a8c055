//! Runner configuration loading and validation (`config.toml`).

pub mod config;
pub mod paths;
pub mod validate;

pub use config::{
    AdminSection, BreakerSection, ClassSection, ExecutorSection, ReaperSection, RunnerConfig,
    SchedulerSection, StoreSection, WebhookSection,
};
pub use validate::{validate_config, validate_serve_ready};
