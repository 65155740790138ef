pub mod audit;
pub mod health;
pub mod retention;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use jejak_audit::{AuditQueryService, AuditRecorder, RetentionPruner};

use crate::pipeline::AuditPipeline;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Ingestion facade.
    pub recorder: Arc<AuditRecorder>,
    /// Read side.
    pub queries: AuditQueryService,
    /// Retention statistics and manual cleanup.
    pub pruner: Arc<RetentionPruner>,
}

impl AppState {
    pub fn from_pipeline(pipeline: &AuditPipeline) -> Self {
        Self {
            recorder: Arc::clone(&pipeline.recorder),
            queries: pipeline.queries.clone(),
            pruner: Arc::clone(&pipeline.pruner),
        }
    }
}

/// Build the Axum router with all API routes and middleware.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        // Ingestion
        .route("/v1/audit/events", post(audit::ingest_event))
        // Read side
        .route("/v1/audit", get(audit::list_audit))
        .route("/v1/audit/records/{id}", get(audit::get_audit_record))
        .route(
            "/v1/audit/entities/{entity_type}/{entity_id}",
            get(audit::entity_history),
        )
        // Operations
        .route("/v1/audit/stats", get(retention::retention_stats))
        .route("/v1/audit/queue", get(health::queue_stats))
        .route("/v1/audit/cleanup", post(retention::run_cleanup))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
