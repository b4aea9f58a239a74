//! Herald server library logic.

pub mod api_events;
pub mod api_notifications;
pub mod api_social;
pub mod api_ws;
pub mod background;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
    Extension, Json, Router,
};
use herald_db::DbPool;
use herald_fanout::WorkerSettings;
use herald_queue::WorkSignal;
use herald_relay::{NotificationBus, SessionRegistry};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum request body size (1 MiB). Events and CRUD payloads are small.
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Session registry for live WebSocket clients.
    pub registry: SessionRegistry,
    /// Publish/subscribe channel between fan-out workers and the edge.
    pub bus: NotificationBus,
    /// Wakeup signal for the fan-out worker pool.
    pub work_signal: WorkSignal,
    /// Worker tunables; the ingest path reads `max_attempts` for enqueue.
    pub worker_settings: WorkerSettings,
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/events", post(api_events::submit_event_handler))
        .route(
            "/api/notifications",
            get(api_notifications::list_notifications_handler),
        )
        .route(
            "/api/notifications/unread-count",
            get(api_notifications::unread_count_handler),
        )
        .route(
            "/api/notifications/{notificationId}/read",
            patch(api_notifications::mark_read_handler),
        )
        .route(
            "/api/users",
            post(api_social::create_user_handler).get(api_social::list_users_handler),
        )
        .route("/api/users/{userId}", get(api_social::get_user_handler))
        .route(
            "/api/users/{userId}/followers",
            get(api_social::list_followers_handler),
        )
        .route(
            "/api/posts",
            post(api_social::create_post_handler).get(api_social::list_posts_handler),
        )
        .route(
            "/api/follows",
            post(api_social::create_follow_handler).delete(api_social::delete_follow_handler),
        )
        .route("/ws", get(api_ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
