//! HTTP Server
//!
//! Axum-based HTTP server for the etcdscout REST API.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::service::ScoutService;

use super::handlers::AppState;
use super::routes::create_router;

/// HTTP API server
pub struct HttpServer {
    port: String,
    service: Arc<ScoutService>,
}

impl HttpServer {
    pub fn new(port: String, service: Arc<ScoutService>) -> Self {
        Self { port, service }
    }

    /// Run the HTTP server until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.port)
            .parse()
            .context("invalid HTTP listen port")?;

        let app = create_router(AppState {
            service: self.service.clone(),
        })
        .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(&addr)
            .await
            .context("failed to bind HTTP server")?;

        info!("HTTP API server listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                info!("HTTP server shutting down");
            })
            .await
            .context("HTTP server error")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_parses_from_port() {
        let addr: SocketAddr = format!("0.0.0.0:{}", "9000").parse().unwrap();
        assert_eq!(addr.port(), 9000);
        assert!("0.0.0.0:not-a-port".parse::<SocketAddr>().is_err());
    }
}
