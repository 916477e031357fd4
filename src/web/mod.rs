//! Web server module.
//!
//! Serves the peer health protocol and a small read-only target listing.

mod handlers;

pub use handlers::*;

use crate::db::Store;
use crate::federation::Federation;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub federation: Arc<Federation>,
    pub instance_name: String,
    pub notify_key: Option<String>,
}

/// HTTP server for the peer protocol.
pub struct Server {
    state: AppState,
    port: u16,
}

impl Server {
    pub fn new(
        store: Arc<Store>,
        federation: Arc<Federation>,
        instance_name: String,
        notify_key: Option<String>,
        port: u16,
    ) -> Self {
        Self {
            state: AppState {
                store,
                federation,
                instance_name,
                notify_key,
            },
            port,
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/health", get(handlers::handle_health))
            .route("/api/targets", get(handlers::handle_targets))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let router = self.routes();

        tracing::info!("Peer protocol endpoint listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
