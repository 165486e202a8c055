//! Operator HTTP surface for the runner.
//!
//! [`AdminServer`] serves health, pause/resume and job endpoints over a
//! running [`Scheduler`](fh_scheduler::Scheduler); [`AdminClient`] is what
//! the `fhr` subcommands use to talk to it.

mod client;
mod routes;
mod server;

pub use client::AdminClient;
pub use routes::{AdminState, HealthReport, router};
pub use server::AdminServer;
