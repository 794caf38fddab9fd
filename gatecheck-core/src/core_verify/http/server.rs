//! HTTP server for the verification endpoint

use super::handlers;
use super::state::AppState;
use crate::shutdown::ShutdownCoordinator;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Path of the verification route, relative to the server root
pub const VERIFY_ROUTE: &str = "/api/v1/orgs/:org_id/events/:event_id/verify";

/// Build the router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(VERIFY_ROUTE, post(handlers::verify))
        .with_state(state)
}

/// Verification HTTP server
pub struct VerificationServer {
    state: Arc<AppState>,
    addr: SocketAddr,
}

impl VerificationServer {
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self { state: Arc::new(state), addr }
    }

    /// Serve until the coordinator signals shutdown
    pub async fn run(self, shutdown: Arc<ShutdownCoordinator>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.run_on(listener, shutdown).await
    }

    /// Serve on an already bound listener
    pub async fn run_on(
        self,
        listener: TcpListener,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> anyhow::Result<()> {
        let router = build_router(self.state);
        info!("Verification server listening on {}", listener.local_addr()?);

        let mut shutdown_rx = shutdown.subscribe();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        info!("Verification server stopped");
        Ok(())
    }
}
