//! Notification store for the Herald platform.
//!
//! Holds the per-recipient records produced by fan-out and serves the pull
//! channel: cursor-paginated feeds, unread counts, and read marking. The
//! pull channel is authoritative: whatever happens to a live push, a
//! recipient always finds their notifications here.
//!
//! Creation is idempotent on `(outbox event, recipient)`: redelivered
//! fan-out jobs can re-attempt every recipient without ever producing a
//! second record.

use herald_types::{DeliveryStatus, EntityKind, NotificationType};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on feed page size, whatever the caller asks for.
pub const MAX_PAGE_SIZE: u32 = 50;

/// Default feed page size when the caller does not specify one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Errors that can occur during notification store operations.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("notification not found: {0}")]
    NotFound(String),
    #[error("malformed pagination cursor: {0}")]
    InvalidCursor(String),
}

/// A persisted notification record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Internal database ID.
    #[serde(skip)]
    pub id: i64,
    /// Unique public ID for the notification (UUID).
    pub notification_id: String,
    /// The user this notification is for.
    pub recipient_user_id: String,
    /// Notification category.
    pub notification_type: NotificationType,
    /// The user whose action triggered the notification.
    pub actor_id: String,
    /// The entity the notification points at (post or user).
    pub source_entity_id: String,
    /// Kind of the source entity.
    pub source_entity_kind: EntityKind,
    /// Rendered display message.
    pub message: String,
    /// Whether the recipient has read it. Mutated only by the pull API.
    pub is_read: bool,
    /// `"{outbox event id}:{recipient user id}"`, unique.
    pub dedupe_key: String,
    /// Push-delivery status, observability only.
    pub delivery_status: DeliveryStatus,
    /// Creation timestamp (ISO 8601, millisecond precision).
    pub created_at: String,
}

/// Parameters for creating a notification during fan-out.
#[derive(Debug, Clone)]
pub struct CreateNotificationParams {
    pub notification_id: String,
    pub recipient_user_id: String,
    pub notification_type: NotificationType,
    pub actor_id: String,
    pub source_entity_id: String,
    pub source_entity_kind: EntityKind,
    pub message: String,
    /// The outbox event this notification was fanned out from.
    pub outbox_event_id: String,
}

/// Outcome of an idempotent create attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// A new record was created; it is eligible for a push attempt.
    Created(NotificationRecord),
    /// This recipient was already notified for this event (earlier attempt);
    /// no new push should be triggered.
    AlreadyExists,
}

/// Creates a notification, idempotently on `(outbox event, recipient)`.
pub fn create_notification(
    conn: &Connection,
    params: &CreateNotificationParams,
) -> Result<CreateOutcome, NotifyError> {
    let dedupe_key = format!("{}:{}", params.outbox_event_id, params.recipient_user_id);

    let record = conn
        .query_row(
            "INSERT INTO notifications (
                notification_id, recipient_user_id, notification_type, actor_id,
                source_entity_id, source_entity_kind, message, dedupe_key, delivery_status
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'PENDING')
             ON CONFLICT (dedupe_key) DO NOTHING
             RETURNING id, notification_id, recipient_user_id, notification_type, actor_id,
                       source_entity_id, source_entity_kind, message, is_read, dedupe_key,
                       delivery_status, created_at",
            params![
                params.notification_id,
                params.recipient_user_id,
                params.notification_type.as_str(),
                params.actor_id,
                params.source_entity_id,
                params.source_entity_kind.as_str(),
                params.message,
                dedupe_key,
            ],
            map_row_to_notification,
        )
        .optional()?;

    match record {
        Some(record) => Ok(CreateOutcome::Created(record)),
        None => Ok(CreateOutcome::AlreadyExists),
    }
}

/// One page of a recipient's notification feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub items: Vec<NotificationRecord>,
    /// Opaque cursor for the next page, present iff `has_more`.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Encodes a feed cursor from the last row of a page.
///
/// The cursor pairs the creation timestamp with the row id so pagination
/// stays exact when two notifications share a timestamp.
fn encode_cursor(record: &NotificationRecord) -> String {
    format!("{}|{}", record.created_at, record.id)
}

fn decode_cursor(cursor: &str) -> Result<(String, i64), NotifyError> {
    let (created_at, id) = cursor
        .rsplit_once('|')
        .ok_or_else(|| NotifyError::InvalidCursor(cursor.to_string()))?;
    let id: i64 = id
        .parse()
        .map_err(|_| NotifyError::InvalidCursor(cursor.to_string()))?;
    Ok((created_at.to_string(), id))
}

/// Lists a recipient's notifications, newest first, with cursor pagination.
///
/// Fetches one row beyond the page size to decide `has_more` without a
/// second query.
pub fn list_notifications(
    conn: &Connection,
    recipient_user_id: &str,
    limit: Option<u32>,
    cursor: Option<&str>,
) -> Result<NotificationPage, NotifyError> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE) as i64;

    let mut items = Vec::new();
    match cursor {
        Some(cursor) => {
            let (created_at, id) = decode_cursor(cursor)?;
            let mut stmt = conn.prepare(
                "SELECT id, notification_id, recipient_user_id, notification_type, actor_id,
                        source_entity_id, source_entity_kind, message, is_read, dedupe_key,
                        delivery_status, created_at
                 FROM notifications
                 WHERE recipient_user_id = ?1
                   AND (created_at < ?2 OR (created_at = ?2 AND id < ?3))
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?4",
            )?;
            let rows = stmt.query_map(
                params![recipient_user_id, created_at, id, limit + 1],
                map_row_to_notification,
            )?;
            for row in rows {
                items.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, notification_id, recipient_user_id, notification_type, actor_id,
                        source_entity_id, source_entity_kind, message, is_read, dedupe_key,
                        delivery_status, created_at
                 FROM notifications
                 WHERE recipient_user_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(
                params![recipient_user_id, limit + 1],
                map_row_to_notification,
            )?;
            for row in rows {
                items.push(row?);
            }
        }
    }

    let has_more = items.len() as i64 > limit;
    if has_more {
        items.truncate(limit as usize);
    }
    let next_cursor = if has_more {
        items.last().map(encode_cursor)
    } else {
        None
    };

    Ok(NotificationPage {
        items,
        next_cursor,
        has_more,
    })
}

/// Marks a notification as read. Marking twice is harmless.
pub fn mark_read(
    conn: &Connection,
    notification_id: &str,
) -> Result<NotificationRecord, NotifyError> {
    conn.query_row(
        "UPDATE notifications SET is_read = 1 WHERE notification_id = ?1
         RETURNING id, notification_id, recipient_user_id, notification_type, actor_id,
                   source_entity_id, source_entity_kind, message, is_read, dedupe_key,
                   delivery_status, created_at",
        [notification_id],
        map_row_to_notification,
    )
    .optional()?
    .ok_or_else(|| NotifyError::NotFound(notification_id.to_string()))
}

/// Counts a recipient's unread notifications.
pub fn unread_count(conn: &Connection, recipient_user_id: &str) -> Result<i64, NotifyError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications WHERE recipient_user_id = ?1 AND is_read = 0",
        [recipient_user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Records the outcome of a push attempt.
///
/// The `delivery_status = 'PENDING'` guard means the status is written at
/// most once: an `EMITTED` record never reverts, and a late duplicate
/// attempt cannot overwrite an earlier outcome.
pub fn set_delivery_status(
    conn: &Connection,
    notification_id: &str,
    status: DeliveryStatus,
) -> Result<bool, NotifyError> {
    let changed = conn.execute(
        "UPDATE notifications SET delivery_status = ?2
         WHERE notification_id = ?1 AND delivery_status = 'PENDING'",
        params![notification_id, status.as_str()],
    )?;
    Ok(changed > 0)
}

fn map_row_to_notification(row: &Row) -> rusqlite::Result<NotificationRecord> {
    let type_str: String = row.get(3)?;
    let notification_type: NotificationType = type_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let kind_str: String = row.get(6)?;
    let source_entity_kind: EntityKind = kind_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status_str: String = row.get(10)?;
    let delivery_status: DeliveryStatus = status_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(NotificationRecord {
        id: row.get(0)?,
        notification_id: row.get(1)?,
        recipient_user_id: row.get(2)?,
        notification_type,
        actor_id: row.get(4)?,
        source_entity_id: row.get(5)?,
        source_entity_kind,
        message: row.get(7)?,
        is_read: row.get(8)?,
        dedupe_key: row.get(9)?,
        delivery_status,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_db::run_migrations;
    use rusqlite::Connection;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().expect("failed to open in-memory db");
        run_migrations(&conn).expect("failed to run migrations");
        conn
    }

    fn sample_params(n: u32, recipient: &str) -> CreateNotificationParams {
        CreateNotificationParams {
            notification_id: format!("ntf-{n}"),
            recipient_user_id: recipient.to_string(),
            notification_type: NotificationType::NewPostFromFollowing,
            actor_id: "user-a".to_string(),
            source_entity_id: "post-1".to_string(),
            source_entity_kind: EntityKind::Post,
            message: "Alice created a new post".to_string(),
            outbox_event_id: format!("ev-{n}"),
        }
    }

    #[test]
    fn create_is_idempotent_per_event_and_recipient() {
        let conn = setup_db();

        let params = sample_params(1, "user-b");
        let first = create_notification(&conn, &params).expect("create failed");
        assert!(matches!(first, CreateOutcome::Created(_)));

        // Same event + recipient, different notification id: absorbed.
        let mut retry = sample_params(1, "user-b");
        retry.notification_id = "ntf-other".to_string();
        let second = create_notification(&conn, &retry).expect("create failed");
        assert_eq!(second, CreateOutcome::AlreadyExists);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))
            .expect("count failed");
        assert_eq!(count, 1);

        // Same event, different recipient: a separate record.
        let other = create_notification(&conn, &sample_params(1, "user-c"))
            .expect("create failed");
        assert!(matches!(other, CreateOutcome::Created(_)));
    }

    #[test]
    fn pagination_covers_every_record_exactly_once() {
        let conn = setup_db();
        for n in 0..7 {
            create_notification(&conn, &sample_params(n, "user-b")).expect("create failed");
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0;
        loop {
            let page = list_notifications(&conn, "user-b", Some(3), cursor.as_deref())
                .expect("list failed");
            pages += 1;
            for item in &page.items {
                seen.push(item.notification_id.clone());
            }
            if !page.has_more {
                assert!(page.next_cursor.is_none());
                break;
            }
            cursor = page.next_cursor;
            assert!(cursor.is_some(), "has_more page must carry a cursor");
        }

        assert_eq!(pages, 3, "7 records at page size 3 is 3 pages");
        assert_eq!(seen.len(), 7);
        let mut deduped = seen.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), 7, "no record may appear twice");

        // Newest first: ids descend because inserts were sequential.
        let full = list_notifications(&conn, "user-b", Some(50), None).expect("list failed");
        let ids: Vec<i64> = full.items.iter().map(|r| r.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(ids, sorted, "feed must be strictly newest-first");
    }

    #[test]
    fn pagination_is_exact_under_identical_timestamps() {
        let conn = setup_db();
        for n in 0..6 {
            create_notification(&conn, &sample_params(n, "user-b")).expect("create failed");
        }
        // Force every record onto the same timestamp.
        conn.execute(
            "UPDATE notifications SET created_at = '2026-01-01T00:00:00.000Z'",
            [],
        )
        .expect("update failed");

        let first = list_notifications(&conn, "user-b", Some(4), None).expect("list failed");
        assert_eq!(first.items.len(), 4);
        assert!(first.has_more);

        let second = list_notifications(
            &conn,
            "user-b",
            Some(4),
            first.next_cursor.as_deref(),
        )
        .expect("list failed");
        assert_eq!(second.items.len(), 2);
        assert!(!second.has_more);

        let mut all: Vec<String> = first
            .items
            .iter()
            .chain(second.items.iter())
            .map(|r| r.notification_id.clone())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 6, "tie-broken pages must not overlap");
    }

    #[test]
    fn invalid_cursor_is_rejected() {
        let conn = setup_db();
        let err = list_notifications(&conn, "user-b", None, Some("garbage"))
            .expect_err("cursor should be rejected");
        assert!(matches!(err, NotifyError::InvalidCursor(_)));
    }

    #[test]
    fn mark_read_and_unread_count() {
        let conn = setup_db();
        let record = match create_notification(&conn, &sample_params(1, "user-b"))
            .expect("create failed")
        {
            CreateOutcome::Created(r) => r,
            CreateOutcome::AlreadyExists => panic!("fresh create reported duplicate"),
        };
        create_notification(&conn, &sample_params(2, "user-b")).expect("create failed");

        assert_eq!(unread_count(&conn, "user-b").expect("count failed"), 2);

        let updated = mark_read(&conn, &record.notification_id).expect("mark failed");
        assert!(updated.is_read);
        assert_eq!(unread_count(&conn, "user-b").expect("count failed"), 1);

        // Marking again is harmless.
        mark_read(&conn, &record.notification_id).expect("re-mark failed");
        assert_eq!(unread_count(&conn, "user-b").expect("count failed"), 1);

        match mark_read(&conn, "ntf-missing").unwrap_err() {
            NotifyError::NotFound(id) => assert_eq!(id, "ntf-missing"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn delivery_status_is_written_once() {
        let conn = setup_db();
        let record = match create_notification(&conn, &sample_params(1, "user-b"))
            .expect("create failed")
        {
            CreateOutcome::Created(r) => r,
            CreateOutcome::AlreadyExists => panic!("fresh create reported duplicate"),
        };
        assert_eq!(record.delivery_status, DeliveryStatus::Pending);

        assert!(set_delivery_status(&conn, &record.notification_id, DeliveryStatus::Emitted)
            .expect("set failed"));

        // A later FAILED attempt must not revert EMITTED.
        assert!(!set_delivery_status(&conn, &record.notification_id, DeliveryStatus::Failed)
            .expect("set failed"));

        let page = list_notifications(&conn, "user-b", None, None).expect("list failed");
        assert_eq!(page.items[0].delivery_status, DeliveryStatus::Emitted);
    }
}
