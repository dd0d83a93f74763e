//! HTTP facade over the probing library.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::resolver::{Resolve, SystemResolver};
use crate::transport::{RawTransport, Transport};

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub transport: Arc<dyn Transport>,
    pub resolver: Arc<dyn Resolve>,
}

impl AppState {
    /// State wired to the real raw transport and system resolver.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            transport: Arc::new(RawTransport),
            resolver: Arc::new(SystemResolver),
        }
    }

    /// State with injected collaborators, for embedding and tests.
    pub fn with_collaborators(
        config: ServerConfig,
        transport: Arc<dyn Transport>,
        resolver: Arc<dyn Resolve>,
    ) -> Self {
        Self {
            config,
            transport,
            resolver,
        }
    }
}

/// Build the API router for the given state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/api/ping/icmp", get(handlers::handle_icmp_ping))
        .route("/api/ping/tcp", get(handlers::handle_tcp_ping))
        .route("/api/ping/udp", get(handlers::handle_udp_ping))
        .route("/api/ping/arp", get(handlers::handle_arp_ping))
        .route("/api/ping/rdns", get(handlers::handle_rdns))
        .route("/api/health", get(handlers::handle_health))
        .layer(cors)
        .with_state(state)
}

/// Web server for the probing API.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = router(self.state.clone());

        tracing::info!("API server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
