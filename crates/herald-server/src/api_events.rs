//! Event ingestion endpoint.
//!
//! `POST /api/events` validates the event against the closed type set,
//! persists it to the outbox, and enqueues a fan-out job. The outbox write
//! strictly precedes the enqueue; the two are not atomic together, so a
//! record whose enqueue is lost sits `PENDING` until the reconciliation
//! sweep picks it up.
//!
//! Duplicate submissions (same dedupe key) are absorbed: the caller gets a
//! `200` instead of a `202`, never an error.

use crate::AppState;
use axum::{extract::Extension, http::StatusCode, response::Json};
use herald_outbox::{insert_record, InsertOutcome};
use herald_queue::{enqueue, job_key};
use herald_types::DomainEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Request body: a domain event plus an optional caller-supplied
/// idempotency key.
///
/// With a key, a client-side retry of the same logical submission maps to
/// the same dedupe key and is absorbed. Without one, the key falls back to
/// a submission-timestamp component and only exact concurrent duplicates
/// collapse.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[serde(flatten)]
    pub event: DomainEvent,
    pub idempotency_key: Option<String>,
}

fn dedupe_key(event: &DomainEvent, idempotency_key: Option<&str>) -> String {
    let discriminator = match idempotency_key {
        Some(key) if !key.trim().is_empty() => key.to_string(),
        _ => chrono::Utc::now().timestamp_millis().to_string(),
    };
    format!(
        "{}:{}:{}:{}",
        event.event_type(),
        event.actor_id(),
        event.entity_id(),
        discriminator
    )
}

/// `POST /api/events`
///
/// `202 {eventId}` on acceptance, `200` when the submission was a
/// duplicate, `400` on validation failure.
pub async fn submit_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let request: IngestRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": "invalid event data",
                    "details": e.to_string(),
                })),
            );
        }
    };

    if let Err(e) = request.event.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "invalid event data",
                "details": e.to_string(),
            })),
        );
    }

    let event = request.event;
    let key = dedupe_key(&event, request.idempotency_key.as_deref());
    let event_id = Uuid::new_v4().to_string();
    let max_attempts = state.worker_settings.max_attempts;
    let pool = state.pool.clone();

    let result = tokio::task::spawn_blocking(move || -> Result<Option<String>, String> {
        let conn = pool.get().map_err(|e| format!("pool error: {e}"))?;

        match insert_record(&conn, &event_id, &event, &key)
            .map_err(|e| format!("outbox error: {e}"))?
        {
            InsertOutcome::Inserted(record) => {
                // Store write first, enqueue second. If the enqueue fails
                // the record is an orphan for the sweep, not a lost event.
                let now_ms = chrono::Utc::now().timestamp_millis();
                enqueue(
                    &conn,
                    &job_key(&record.event_id, 1),
                    &record.event_id,
                    1,
                    max_attempts,
                    now_ms,
                )
                .map_err(|e| format!("queue error: {e}"))?;
                Ok(Some(record.event_id))
            }
            InsertOutcome::Duplicate => Ok(None),
        }
    })
    .await;

    match result {
        Ok(Ok(Some(event_id))) => {
            state.work_signal.notify_work();
            (
                StatusCode::ACCEPTED,
                Json(json!({
                    "success": true,
                    "eventId": event_id,
                    "message": "event queued for processing",
                })),
            )
        }
        Ok(Ok(None)) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "event already accepted",
            })),
        ),
        Ok(Err(e)) => {
            tracing::error!("event ingestion failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "failed to accept event",
                })),
            )
        }
        Err(e) => {
            tracing::error!("event ingestion task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": "failed to accept event",
                })),
            )
        }
    }
}
