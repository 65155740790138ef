use axum::Json;
use axum::extract::State;
use serde::Serialize;

use jejak_audit::{DirectWriteStats, QueueStats};

use super::AppState;
use crate::error::ServerError;

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// `"queue"` or `"direct"`.
    pub write_mode: &'static str,
    /// Events waiting in the queue (0 in direct mode).
    pub pending: usize,
}

/// Queue statistics together with the recorder's direct-write counters.
#[derive(Debug, Serialize)]
pub struct QueueStatusResponse {
    #[serde(flatten)]
    pub queue: QueueStats,
    #[serde(flatten)]
    pub direct: DirectWriteStats,
}

/// `GET /health` -- liveness plus the current write mode.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let pending = state.recorder.queue_stats().map_or(0, |s| s.pending);
    Json(HealthResponse {
        status: "ok",
        write_mode: if state.recorder.uses_queue() {
            "queue"
        } else {
            "direct"
        },
        pending,
    })
}

/// `GET /v1/audit/queue` -- write-behind queue statistics.
///
/// Returns 503 when the deployment runs in direct-write mode.
pub async fn queue_stats(
    State(state): State<AppState>,
) -> Result<Json<QueueStatusResponse>, ServerError> {
    let queue = state
        .recorder
        .queue_stats()
        .ok_or(ServerError::QueueUnavailable)?;
    Ok(Json(QueueStatusResponse {
        queue,
        direct: state.recorder.direct_stats(),
    }))
}
