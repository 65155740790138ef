use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use serde::Deserialize;

use jejak_audit::{AuditEntry, AuditEntryPage, AuditEvent, AuditQuery, Origin};

use super::AppState;
use crate::error::ServerError;

/// Query parameters for the per-entity timeline.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryParams {
    /// Max entries to return (default 20, max 100).
    pub limit: Option<u32>,
}

/// `POST /v1/audit/events` -- submit one audit event.
///
/// Always answers 202: the event is buffered or written in the background
/// and failures are never reported to the submitter. When the event carries
/// no origin, one is taken from the request headers.
pub async fn ingest_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(mut event): Json<AuditEvent>,
) -> (StatusCode, Json<serde_json::Value>) {
    if event.origin.is_none() {
        event.origin = origin_from_headers(&headers);
    }
    state.recorder.record(event);
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
}

/// `GET /v1/audit` -- list entries with filters and pagination, newest first.
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditEntryPage>, ServerError> {
    Ok(Json(state.queries.list(&query).await?))
}

/// `GET /v1/audit/records/{id}` -- one entry by record id.
pub async fn get_audit_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AuditEntry>, ServerError> {
    state
        .queries
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("no audit record found with id: {id}")))
}

/// `GET /v1/audit/entities/{entity_type}/{entity_id}` -- recent history of one entity.
pub async fn entity_history(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<AuditEntry>>, ServerError> {
    let entries = state
        .queries
        .entity_history(&entity_type, &entity_id, params.limit)
        .await?;
    Ok(Json(entries))
}

/// Derive an origin from proxy and user-agent headers.
fn origin_from_headers(headers: &HeaderMap) -> Option<Origin> {
    let text = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    // The left-most X-Forwarded-For entry is the original client.
    let address = text("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| text("x-real-ip"))
        .map(str::to_owned);
    let client = text(header::USER_AGENT.as_str()).map(str::to_owned);

    if address.is_none() && client.is_none() {
        None
    } else {
        Some(Origin { address, client })
    }
}
