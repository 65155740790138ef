use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use serde::Deserialize;
use tracing::info;

use jejak_audit::{PruneReport, RetentionStats};

use super::AppState;
use crate::error::ServerError;

/// Optional body for `POST /v1/audit/cleanup`.
#[derive(Debug, Default, Deserialize)]
pub struct CleanupRequest {
    /// Override the configured horizon for this run only.
    #[serde(default)]
    pub horizon_days: Option<u32>,
}

/// `GET /v1/audit/stats` -- record counts and pruning eligibility.
pub async fn retention_stats(
    State(state): State<AppState>,
) -> Result<Json<RetentionStats>, ServerError> {
    Ok(Json(state.pruner.stats().await?))
}

/// `POST /v1/audit/cleanup` -- run one pruning sweep now.
///
/// The body is optional; an empty body uses the configured horizon.
pub async fn run_cleanup(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<PruneReport>, ServerError> {
    let request: CleanupRequest = if body.is_empty() {
        CleanupRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ServerError::BadRequest(format!("invalid cleanup request: {e}")))?
    };

    info!(horizon_days = ?request.horizon_days, "manual audit cleanup requested via API");
    let report = state.pruner.run_manual(request.horizon_days).await?;
    Ok(Json(report))
}
