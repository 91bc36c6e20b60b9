//! REST API over the orchestrator.

mod error;
mod handlers;

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use relay_core::Orchestrator;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(engine: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        // Tasks
        .route("/tasks", post(handlers::create_task))
        .route("/tasks/{id}", get(handlers::get_task))
        .route("/tasks/{id}/status", patch(handlers::update_status))
        .route("/tasks/{id}/complete", post(handlers::complete_task))
        .route("/tasks/{id}/dispatch", post(handlers::dispatch_task))
        // Roles
        .route("/roles/{role}/tasks", get(handlers::list_role_tasks))
        .route("/roles/{role}/queue", get(handlers::role_queue))
        .route("/roles/{role}/dispatch", post(handlers::dispatch_next))
        // Execution queue
        .route("/queue/status", get(handlers::queue_status))
        .route("/queue/staged", get(handlers::staged))
        .route("/queue/replay", post(handlers::replay))
        // Decisions
        .route(
            "/decisions",
            get(handlers::list_decisions).post(handlers::open_decision),
        )
        .route("/decisions/{id}", get(handlers::get_decision))
        .route("/decisions/{id}/decide", post(handlers::decide))
        .route("/decisions/{id}/defer", post(handlers::defer))
        .route("/decisions/{id}/delegate", post(handlers::delegate))
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Serve until `shutdown` resolves.
pub async fn serve(
    engine: Arc<Orchestrator>,
    listen_addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listener.local_addr()?, "relay server listening");
    axum::serve(listener, router(engine))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
