use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use herald_db::{open, DbPool, DbRuntimeSettings};
use herald_fanout::WorkerSettings;
use herald_notify::{create_notification, CreateNotificationParams};
use herald_queue::WorkSignal;
use herald_relay::{NotificationBus, SessionRegistry};
use herald_server::{app, AppState};
use herald_types::{EntityKind, NotificationType};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

fn setup_app() -> (axum::Router, DbPool, TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("herald.db");
    let pool = open(
        db_path.to_str().expect("utf-8 path"),
        DbRuntimeSettings::default(),
    )
    .expect("database should open");

    let state = AppState {
        pool: pool.clone(),
        registry: SessionRegistry::new(),
        bus: NotificationBus::new(64),
        work_signal: WorkSignal::new(),
        worker_settings: WorkerSettings::default(),
    };
    (app(state), pool, dir)
}

fn seed_notifications(pool: &DbPool, recipient: &str, count: u32) -> Vec<String> {
    let conn = pool.get().expect("connection");
    let mut ids = Vec::new();
    for n in 0..count {
        let params = CreateNotificationParams {
            notification_id: format!("ntf-{n}"),
            recipient_user_id: recipient.to_string(),
            notification_type: NotificationType::NewPostFromFollowing,
            actor_id: "user-a".to_string(),
            source_entity_id: format!("post-{n}"),
            source_entity_kind: EntityKind::Post,
            message: "Alice created a new post".to_string(),
            outbox_event_id: format!("ev-{n}"),
        };
        match create_notification(&conn, &params).expect("create") {
            herald_notify::CreateOutcome::Created(record) => ids.push(record.notification_id),
            herald_notify::CreateOutcome::AlreadyExists => panic!("unexpected duplicate"),
        }
    }
    ids
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}

#[tokio::test]
async fn feed_paginates_newest_first_without_gaps_or_overlap() {
    let (app, pool, _dir) = setup_app();
    seed_notifications(&pool, "user-b", 7);

    let mut collected: Vec<String> = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;

    loop {
        let uri = match &cursor {
            Some(c) => format!("/api/notifications?userId=user-b&limit=3&cursor={c}"),
            None => "/api/notifications?userId=user-b&limit=3".to_string(),
        };
        let (status, body) = get_json(&app, &uri).await;
        assert_eq!(status, StatusCode::OK);
        pages += 1;

        let data = &body["data"];
        for item in data["items"].as_array().expect("items") {
            collected.push(
                item["notificationId"]
                    .as_str()
                    .expect("notificationId")
                    .to_string(),
            );
        }

        if data["hasMore"] == true {
            cursor = Some(
                data["nextCursor"]
                    .as_str()
                    .expect("cursor present when hasMore")
                    .to_string(),
            );
        } else {
            assert!(data["nextCursor"].is_null());
            break;
        }
    }

    assert_eq!(pages, 3, "7 notifications at page size 3 is 3 pages");
    assert_eq!(collected.len(), 7);
    let mut deduped = collected.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped.len(), 7, "pages must neither overlap nor skip");

    // Newest first: the seeded order was ntf-0 .. ntf-6.
    assert_eq!(collected.first().map(String::as_str), Some("ntf-6"));
    assert_eq!(collected.last().map(String::as_str), Some("ntf-0"));
}

#[tokio::test]
async fn mark_read_flips_the_unread_count() {
    let (app, pool, _dir) = setup_app();
    let ids = seed_notifications(&pool, "user-b", 2);

    let (status, body) = get_json(&app, "/api/notifications/unread-count?userId=user-b").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["count"], 2);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri(format!("/api/notifications/{}/read", ids[0]))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: Value = serde_json::from_slice(&bytes).expect("json");
    assert_eq!(body["data"]["isRead"], true);

    let (_, body) = get_json(&app, "/api/notifications/unread-count?userId=user-b").await;
    assert_eq!(body["data"]["count"], 1);
}

#[tokio::test]
async fn marking_an_unknown_notification_is_404() {
    let (app, _pool, _dir) = setup_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PATCH")
                .uri("/api/notifications/ntf-missing/read")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_cursor_is_400() {
    let (app, pool, _dir) = setup_app();
    seed_notifications(&pool, "user-b", 1);

    let (status, _) = get_json(&app, "/api/notifications?userId=user-b&cursor=bogus").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn feed_for_unknown_user_is_empty_not_an_error() {
    let (app, _pool, _dir) = setup_app();

    let (status, body) = get_json(&app, "/api/notifications?userId=user-nobody").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["items"].as_array().expect("items").len(), 0);
    assert_eq!(body["data"]["hasMore"], false);
}
