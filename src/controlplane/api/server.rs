//! API Server
//!
//! Runs the REST server for the gateway and shuts it down gracefully.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;
use crate::controlplane::Orchestrator;

// =============================================================================
// Server Configuration
// =============================================================================

/// Default REST bind address
pub const DEFAULT_REST_ADDR: &str = "0.0.0.0:8090";

/// Configuration for the API server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
        }
    }
}

impl ApiServerConfig {
    /// Parse a bind address such as `127.0.0.1:8090`
    pub fn with_addr(addr: &str) -> Result<Self> {
        let rest_addr = addr
            .parse()
            .map_err(|e| Error::Configuration(format!("Invalid REST API address '{}': {}", addr, e)))?;
        Ok(Self { rest_addr })
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server over an orchestrator
pub struct ApiServer {
    config: ApiServerConfig,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ApiServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            orchestrator,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ApiServerConfig {
        &self.config
    }

    /// Serve until `signal` resolves or [`ApiServer::shutdown`] is called
    pub async fn run_until<F>(&self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.config.rest_addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind REST server: {}", e)))?;

        let local_addr = listener.local_addr()?;
        info!("REST API listening on {}", local_addr);

        let app = RestRouter::new(self.orchestrator.clone()).build();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = signal => {}
                    _ = shutdown_rx.recv() => {}
                }
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("REST server error: {}", e)))?;

        Ok(())
    }

    /// Serve until [`ApiServer::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
