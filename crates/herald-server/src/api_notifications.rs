//! Pull-channel notification endpoints.
//!
//! The authoritative read path: whatever happened to live pushes, a
//! recipient's notifications are always retrievable here.

use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use herald_notify::{list_notifications, mark_read, unread_count, NotifyError};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Maps a [`NotifyError`] to an HTTP status, logging server-side failures.
fn notify_err_to_status(e: NotifyError) -> StatusCode {
    match e {
        NotifyError::NotFound(_) => StatusCode::NOT_FOUND,
        NotifyError::InvalidCursor(_) => StatusCode::BAD_REQUEST,
        ref err => {
            tracing::error!(error = %err, "notification store operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedParams {
    pub user_id: String,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

/// `GET /api/notifications?userId=&limit=&cursor=`
///
/// Newest-first feed page with an opaque cursor for the next one.
pub async fn list_notifications_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<FeedParams>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let page = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        list_notifications(
            &conn,
            &params.user_id,
            params.limit,
            params.cursor.as_deref(),
        )
        .map_err(notify_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(json!({ "success": true, "data": page })))
}

/// `PATCH /api/notifications/{notificationId}/read`
pub async fn mark_read_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(notification_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let record = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        mark_read(&conn, &notification_id).map_err(notify_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(json!({ "success": true, "data": record })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountParams {
    pub user_id: String,
}

/// `GET /api/notifications/unread-count?userId=`
pub async fn unread_count_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<UnreadCountParams>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let count = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        unread_count(&conn, &params.user_id).map_err(notify_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(json!({ "success": true, "data": { "count": count } })))
}
