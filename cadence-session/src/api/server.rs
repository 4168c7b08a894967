//! HTTP server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use cadence_common::events::EventBus;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bus::CommandBus;
use crate::controller::SessionController;
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleSupervisor;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub controller: Arc<SessionController>,
    pub bus: CommandBus,
    pub supervisor: Arc<LifecycleSupervisor>,
    pub events: EventBus,
}

impl AppContext {
    pub fn new(controller: Arc<SessionController>, supervisor: Arc<LifecycleSupervisor>) -> Self {
        let events = supervisor.session().events().clone();
        Self {
            bus: CommandBus::new(Arc::clone(&controller)),
            controller,
            supervisor,
            events,
        }
    }
}

/// Build the router with all routes attached
pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))

        // Snapshot
        .route("/snapshot", get(super::handlers::get_snapshot))
        .route("/snapshot/stream", get(super::sse::snapshot_stream))

        // Commands
        .route("/commands", post(super::handlers::post_command))
        .route("/actions/:name", post(super::handlers::post_action))

        // Host lifecycle
        .route("/host/detached", post(super::handlers::host_detached))
        .route("/host/attached", post(super::handlers::host_attached))

        // SSE event stream
        .route("/events", get(super::sse::event_stream))

        .with_state(ctx)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the API on `bind` until `shutdown` resolves
pub async fn run(
    bind: &str,
    ctx: AppContext,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|e| Error::Http(format!("Invalid bind address {}: {}", bind, e)))?;
    let app = build_router(ctx);

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
