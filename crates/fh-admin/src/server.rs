use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::routes::{AdminState, router};

/// The admin HTTP listener and its serving task.
#[derive(Debug)]
pub struct AdminServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    server_task: JoinHandle<()>,
}

impl AdminServer {
    pub async fn start(bind: &str, port: u16, state: AdminState) -> Result<Self> {
        let bind_addr = format!("{bind}:{port}")
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid admin bind address '{bind}:{port}'"))?;

        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind admin endpoint at {bind_addr}"))?;
        let addr = listener
            .local_addr()
            .context("failed to resolve local admin address")?;

        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        let app = router(state);
        let server_task = tokio::spawn(async move {
            if let Err(error) = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    server_shutdown.cancelled().await;
                })
                .await
            {
                tracing::warn!(error = %error, "admin HTTP server stopped with error");
            }
        });

        tracing::info!(%addr, "admin endpoint listening");
        Ok(Self {
            addr,
            shutdown,
            server_task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(error) = self.server_task.await {
            tracing::debug!(error = %error, "admin HTTP server join failed");
        }
    }
}
