use anyhow::{Context, Result, bail};
use fh_core::{Job, NewJob, SystemHealth};
use fh_scheduler::CancelOutcome;
use serde::de::DeserializeOwned;

use crate::routes::HealthReport;

/// Thin reqwest wrapper over the admin endpoints.
#[derive(Debug, Clone)]
pub struct AdminClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl AdminClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.send(self.client.get(self.url("/health"))).await
    }

    pub async fn pause(&self) -> Result<SystemHealth> {
        self.send(self.authed(self.client.post(self.url("/pause"))))
            .await
    }

    pub async fn resume(&self) -> Result<SystemHealth> {
        self.send(self.authed(self.client.post(self.url("/resume"))))
            .await
    }

    pub async fn submit(&self, request: &NewJob) -> Result<Job> {
        self.send(self.authed(self.client.post(self.url("/jobs")).json(request)))
            .await
    }

    pub async fn job(&self, id: &str) -> Result<Job> {
        self.send(self.client.get(self.url(&format!("/jobs/{id}"))))
            .await
    }

    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome> {
        let url = self.url(&format!("/jobs/{id}/cancel"));
        self.send(self.authed(self.client.post(url))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach admin endpoint at {}", self.base_url))?;
        let status = response.status();
        if !status.is_success() {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            let message = body
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("no error message");
            bail!("admin API returned HTTP {}: {message}", status.as_u16());
        }
        response
            .json()
            .await
            .context("failed to decode admin API response")
    }
}
