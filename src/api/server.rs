//! API server

use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use super::handlers;
use crate::config::ApiConfig;
use crate::node::NodeHandle;

/// Shared state for request handlers
pub struct AppState {
    pub node: NodeHandle,
    pub started: Instant,
}

pub struct ApiServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiConfig, node: NodeHandle) -> Self {
        Self {
            config,
            state: Arc::new(AppState {
                node,
                started: Instant::now(),
            }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route(
                "/api/links",
                get(handlers::get_links).post(handlers::connect_link),
            )
            .route(
                "/api/links/:name",
                get(handlers::get_link).delete(handlers::disconnect_link),
            )
            .route("/api/vote", get(handlers::get_vote))
            .route("/api/messages", post(handlers::send_message))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` completes
    pub async fn serve(self, shutdown: impl Future<Output = ()> + Send + 'static) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("Management API listening on http://{}", listener.local_addr()?);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
    }

    /// Spawn the server on the current runtime
    pub fn start_background(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.serve(shutdown).await {
                tracing::error!("Management API failed: {}", e);
            }
        })
    }
}
