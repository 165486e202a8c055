//! Breaker transition webhooks.
//!
//! Every CLOSED/OPEN/HALF_OPEN change is POSTed as JSON to the configured
//! URL. Delivery runs on a spawned task so the scheduler never waits on
//! the network; failures are logged and dropped.

use anyhow::{Context, Result, anyhow, bail};
use fh_config::WebhookSection;
use fh_core::{BreakerTransition, TransitionListener};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

/// Header carrying `sha256=<hex hmac of body>` when a secret is configured.
pub const SIGNATURE_HEADER: &str = "x-factharbor-signature";

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 of `body` keyed by `secret`, hex encoded.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| anyhow!("invalid webhook signing key"))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, secret: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            url: url.into(),
            secret,
            client,
        })
    }

    pub fn from_section(section: &WebhookSection) -> Result<Self> {
        Self::new(section.url.clone(), section.secret(), section.timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST one transition and wait for the response.
    pub async fn deliver(&self, transition: &BreakerTransition) -> Result<()> {
        let body = serde_json::to_vec(transition).context("failed to encode transition")?;
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, format!("sha256={}", sign(secret, &body)?));
        }
        let response = request
            .body(body)
            .send()
            .await
            .with_context(|| format!("webhook POST to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("webhook {} answered HTTP {}", self.url, status.as_u16());
        }
        debug!(
            provider = %transition.provider,
            to = %transition.to_state,
            "webhook delivered"
        );
        Ok(())
    }
}

impl TransitionListener for WebhookNotifier {
    fn on_transition(&self, transition: &BreakerTransition) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(provider = %transition.provider, "no async runtime; webhook dropped");
            return;
        };
        let notifier = self.clone();
        let transition = transition.clone();
        runtime.spawn(async move {
            if let Err(e) = notifier.deliver(&transition).await {
                warn!(
                    provider = %transition.provider,
                    error = %format!("{e:#}"),
                    "breaker webhook failed"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use fh_core::ProviderState;
    use tokio::sync::mpsc;

    type Received = (HeaderMap, Bytes);

    async fn receiver(status: StatusCode) -> (String, mpsc::UnboundedReceiver<Received>) {
        let (tx, rx) = mpsc::unbounded_channel::<Received>();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(tx): State<mpsc::UnboundedSender<Received>>,
                          headers: HeaderMap,
                          body: Bytes| async move {
                        let _ = tx.send((headers, body));
                        status
                    },
                ),
            )
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), rx)
    }

    fn opened() -> BreakerTransition {
        BreakerTransition {
            provider: "llm:opus".to_string(),
            from_state: ProviderState::Closed,
            to_state: ProviderState::Open,
            timestamp: "2026-03-01T12:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_sign_matches_known_vector() {
        // RFC 4231 test case 2.
        let sig = sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[tokio::test]
    async fn test_deliver_posts_signed_json() {
        let (url, mut rx) = receiver(StatusCode::NO_CONTENT).await;
        let notifier =
            WebhookNotifier::new(url, Some("hook-key".into()), Duration::from_secs(5)).unwrap();
        notifier.deliver(&opened()).await.unwrap();

        let (headers, body) = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["provider"], "llm:opus");
        assert_eq!(value["fromState"], "CLOSED");
        assert_eq!(value["toState"], "OPEN");
        assert_eq!(value["timestamp"], "2026-03-01T12:00:00Z");

        let expected = format!("sha256={}", sign("hook-key", &body).unwrap());
        assert_eq!(headers[SIGNATURE_HEADER].to_str().unwrap(), expected);
        assert_eq!(headers["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_unsigned_without_secret() {
        let (url, mut rx) = receiver(StatusCode::OK).await;
        let notifier = WebhookNotifier::new(url, None, Duration::from_secs(5)).unwrap();
        notifier.deliver(&opened()).await.unwrap();
        let (headers, _) = rx.recv().await.unwrap();
        assert!(headers.get(SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let (url, _rx) = receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
        let notifier = WebhookNotifier::new(url, None, Duration::from_secs(5)).unwrap();
        let err = notifier.deliver(&opened()).await.unwrap_err();
        assert!(err.to_string().contains("HTTP 500"), "{err}");
    }

    #[tokio::test]
    async fn test_listener_delivers_in_background() {
        let (url, mut rx) = receiver(StatusCode::OK).await;
        let notifier = WebhookNotifier::new(url, None, Duration::from_secs(5)).unwrap();
        notifier.on_transition(&opened());
        let (_, body) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["toState"], "OPEN");
    }

    #[tokio::test]
    async fn test_unreachable_url_does_not_panic_listener() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:1/hook", None, Duration::from_millis(500))
                .unwrap();
        notifier.on_transition(&opened());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_listener_outside_runtime_drops_quietly() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:1/hook", None, Duration::from_secs(1)).unwrap();
        notifier.on_transition(&opened());
    }

    #[test]
    fn test_from_section_reads_timeout() {
        let section = WebhookSection {
            url: "https://hooks.example.org/breaker".into(),
            secret_env: None,
            timeout_secs: 3,
        };
        let notifier = WebhookNotifier::from_section(&section).unwrap();
        assert_eq!(notifier.url(), "https://hooks.example.org/breaker");
    }
}
