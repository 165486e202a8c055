//! The boundary between the scheduler and the analysis pipeline.
//!
//! An executor receives one RUNNING job, reports progress while it works,
//! watches the job's cancellation token, and returns an [`Outcome`]. Any
//! failure it reports must already be normalised into a
//! [`fh_core::TaskError`]; see [`normalize`].

pub mod command;
pub mod context;
pub mod http;
pub mod normalize;

use async_trait::async_trait;
use fh_core::Outcome;

pub use command::CommandExecutor;
pub use context::{JobContext, ProgressReporter};
pub use http::HttpExecutor;

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Run one job to completion. Must return promptly with
    /// [`Outcome::Cancelled`] once `ctx.cancel` fires.
    async fn run(&self, ctx: JobContext) -> Outcome;
}
