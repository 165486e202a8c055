//! Hand each job to an HTTP analysis service.
//!
//! `POST {url}` with a JSON body `{jobId, class, providers, payload}`.
//! 2xx is success. Otherwise the response is normalised with
//! [`from_http`]; the service may name the failing upstream in the
//! `X-FactHarbor-Provider` header.

use async_trait::async_trait;
use fh_core::{JobClass, Outcome};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::normalize::{from_http, from_reqwest};
use crate::{JobContext, TaskExecutor};

pub const PROVIDER_HEADER: &str = "x-factharbor-provider";

/// A single request may run for the whole job budget, so the executor
/// heartbeats on the job's behalf while it waits.
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest<'a> {
    job_id: &'a str,
    class: JobClass,
    providers: &'a [String],
    payload: &'a str,
}

#[derive(Debug, Clone)]
pub struct HttpExecutor {
    url: String,
    client: reqwest::Client,
    heartbeat: Duration,
}

impl HttpExecutor {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }

    pub fn with_heartbeat(mut self, every: Duration) -> Self {
        self.heartbeat = every;
        self
    }

    async fn execute(&self, ctx: &JobContext) -> Outcome {
        let started = Instant::now();
        let body = AnalysisRequest {
            job_id: &ctx.job.id,
            class: ctx.job.class,
            providers: &ctx.job.providers,
            payload: &ctx.job.payload,
        };
        let single = match ctx.job.providers.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        };

        let response = match self.client.post(&self.url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return Outcome::Failed(from_reqwest(single, &e, started.elapsed())),
        };
        let status = response.status();
        if status.is_success() {
            return Outcome::Succeeded;
        }

        let named = response
            .headers()
            .get(PROVIDER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.unwrap_or_default();
        let provider = named.as_deref().or(single);
        debug!(job = %ctx.job.id, %status, ?provider, "analysis service rejected job");
        Outcome::Failed(from_http(provider, status.as_u16(), &text))
    }
}

#[async_trait]
impl TaskExecutor for HttpExecutor {
    async fn run(&self, ctx: JobContext) -> Outcome {
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + self.heartbeat,
            self.heartbeat,
        );
        let work = self.execute(&ctx);
        tokio::pin!(work);
        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Outcome::Cancelled,
                outcome = &mut work => return outcome,
                _ = heartbeat.tick() => {
                    if let Err(e) = ctx.progress.heartbeat().await {
                        warn!(job = %ctx.job.id, error = %e, "failed to record heartbeat");
                    }
                }
            }
        }
    }
}
