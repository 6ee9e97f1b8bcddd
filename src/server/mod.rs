//! HTTP surface of the relay.
//!
//! [`routes::router`] builds the axum application; [`HttpServer`] binds it
//! and runs it until shut down. Handlers need the TCP peer address, so the
//! server always serves with connect info attached.

pub mod network;
pub mod routes;

pub use routes::{AppState, router};

use std::net::SocketAddr;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ServerError;

/// Configuration for the HTTP server.
pub struct HttpServerConfig {
    /// Address to bind the server to.
    pub addr: SocketAddr,
}

/// A single HTTP server hosting the relay routes.
pub struct HttpServer {
    config: HttpServerConfig,
    app: Option<Router>,
    shutdown: CancellationToken,
    local_addr: Option<SocketAddr>,
    handle: Option<JoinHandle<()>>,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, app: Router) -> Self {
        Self {
            config,
            app: Some(app),
            shutdown: CancellationToken::new(),
            local_addr: None,
            handle: None,
        }
    }

    /// Builder: stop serving when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Address actually bound, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and spawn the server task.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        let app = self.app.take().ok_or_else(|| ServerError::StartupFailed {
            name: "http_server".to_string(),
            reason: "Server already started".to_string(),
        })?;

        let listener = tokio::net::TcpListener::bind(self.config.addr)
            .await
            .map_err(|e| ServerError::StartupFailed {
                name: "http_server".to_string(),
                reason: format!("Failed to bind to {}: {}", self.config.addr, e),
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::StartupFailed {
                name: "http_server".to_string(),
                reason: e.to_string(),
            })?;
        self.local_addr = Some(local_addr);

        tracing::info!("HTTP server listening on {}", local_addr);

        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                tracing::info!("HTTP server shutting down");
            })
            .await
            {
                tracing::error!("HTTP server error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(())
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for the server task without signalling it.
    pub async fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
