//! Thin CRUD endpoints for users, posts, and follow edges.
//!
//! These are collaborators of the notification pipeline, not part of it:
//! simple create/read wrappers over the social stores. Creating a post or
//! follow does not submit an event; producers do that explicitly through
//! `POST /api/events`.

use crate::AppState;
use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::Json,
};
use herald_social::{
    create_follow, create_post, create_user, delete_follow, get_user, list_followers, list_posts,
    list_users, CreatePostParams, SocialError,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Maps a [`SocialError`] to an HTTP status, logging server-side failures.
///
/// Unique-constraint violations surface as `409` so callers can tell "this
/// id is taken" apart from a real failure.
fn social_err_to_status(e: SocialError) -> StatusCode {
    match e {
        SocialError::NotFound(_) => StatusCode::NOT_FOUND,
        SocialError::Database(ref db_err) if is_unique_violation(db_err) => StatusCode::CONFLICT,
        ref err => {
            tracing::error!(error = %err, "social store operation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(info, _)
            if info.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub user_id: Option<String>,
    pub name: String,
}

/// `POST /api/users`
pub async fn create_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    if payload.name.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let user_id = payload
        .user_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let pool = state.pool.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        create_user(&conn, &user_id, &payload.name).map_err(social_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": user })),
    ))
}

/// `GET /api/users`
pub async fn list_users_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let users = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        list_users(&conn).map_err(social_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(json!({ "success": true, "data": users })))
}

/// `GET /api/users/{userId}`
pub async fn get_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let user = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        get_user(&conn, &user_id).map_err(social_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(json!({ "success": true, "data": user })))
}

/// `GET /api/users/{userId}/followers`
pub async fn list_followers_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let followers = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        list_followers(&conn, &user_id).map_err(social_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(json!({ "success": true, "data": followers })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub post_id: Option<String>,
    pub author_id: String,
    pub title: String,
}

/// `POST /api/posts`
pub async fn create_post_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    if payload.author_id.trim().is_empty() || payload.title.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let params = CreatePostParams {
        post_id: payload
            .post_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        author_id: payload.author_id,
        title: payload.title,
    };

    let pool = state.pool.clone();
    let post = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        create_post(&conn, &params).map_err(social_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "data": post })),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPostsParams {
    pub author_id: Option<String>,
}

/// `GET /api/posts?authorId=`
pub async fn list_posts_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<ListPostsParams>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let posts = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        list_posts(&conn, params.author_id.as_deref()).map_err(social_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(json!({ "success": true, "data": posts })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequest {
    pub follower_id: String,
    pub followee_id: String,
}

/// `POST /api/follows`
pub async fn create_follow_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<FollowRequest>,
) -> Result<(StatusCode, Json<Value>), StatusCode> {
    if payload.follower_id == payload.followee_id {
        return Err(StatusCode::BAD_REQUEST);
    }

    let pool = state.pool.clone();
    let created = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        create_follow(&conn, &payload.follower_id, &payload.followee_id)
            .map_err(social_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "success": true, "created": created }))))
}

/// `DELETE /api/follows`
pub async fn delete_follow_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<FollowRequest>,
) -> Result<Json<Value>, StatusCode> {
    let pool = state.pool.clone();
    let removed = tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| {
            tracing::error!("failed to get db connection: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        delete_follow(&conn, &payload.follower_id, &payload.followee_id)
            .map_err(social_err_to_status)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(json!({ "success": true, "removed": removed })))
}
