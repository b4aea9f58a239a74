//! Outbox store for the Herald pipeline.
//!
//! Every accepted event is persisted here before any fan-out work happens,
//! so a crash between acceptance and processing loses nothing. Records are
//! append-only; they are never deleted and serve as an audit/replay log.
//! The only mutation is the one-way `PENDING` → `PROCESSED` transition
//! performed by the fan-out worker after all recipients have been attempted.
//!
//! Inserts are idempotent on `dedupe_key`: a duplicate submission is
//! absorbed, not surfaced as an error.

use herald_types::{DomainEvent, OutboxStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during outbox operations.
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("outbox record not found: {0}")]
    NotFound(String),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A persisted outbox record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxRecord {
    /// Internal database ID.
    pub id: i64,
    /// Unique public ID for the event (UUID), used as the job reference.
    pub event_id: String,
    /// Canonical event type string.
    pub event_type: String,
    /// The full event payload as a JSON string.
    pub payload_json: String,
    /// Derived unique key collapsing duplicate submissions.
    pub dedupe_key: String,
    /// Processing status.
    pub status: OutboxStatus,
    /// Creation timestamp (ISO 8601, millisecond precision).
    pub created_at: String,
    /// Set exactly once, when the worker finishes fan-out.
    pub processed_at: Option<String>,
}

impl OutboxRecord {
    /// Decodes the stored payload back into a [`DomainEvent`].
    ///
    /// Fails only on version skew: a payload written by a build with event
    /// types this build does not know. Callers treat that as "no recipients",
    /// not as a retryable error.
    pub fn decode_payload(&self) -> Result<DomainEvent, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}

/// Outcome of an outbox insert attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// A new record was created and fan-out should be enqueued.
    Inserted(OutboxRecord),
    /// A record with the same dedupe key already exists; the submission
    /// was absorbed.
    Duplicate,
}

/// Inserts an event into the outbox, idempotently on `dedupe_key`.
///
/// The insert-or-nothing is a single statement, so two racing submissions
/// of the same logical event cannot both observe "new".
pub fn insert_record(
    conn: &Connection,
    event_id: &str,
    event: &DomainEvent,
    dedupe_key: &str,
) -> Result<InsertOutcome, OutboxError> {
    let payload_json = serde_json::to_string(event)?;

    let record = conn
        .query_row(
            "INSERT INTO outbox_records (event_id, event_type, payload_json, dedupe_key, status)
             VALUES (?1, ?2, ?3, ?4, 'PENDING')
             ON CONFLICT (dedupe_key) DO NOTHING
             RETURNING id, event_id, event_type, payload_json, dedupe_key, status,
                       created_at, processed_at",
            params![event_id, event.event_type(), payload_json, dedupe_key],
            map_row_to_record,
        )
        .optional()?;

    match record {
        Some(record) => Ok(InsertOutcome::Inserted(record)),
        None => Ok(InsertOutcome::Duplicate),
    }
}

/// Retrieves an outbox record by its public event ID.
pub fn get_record(conn: &Connection, event_id: &str) -> Result<OutboxRecord, OutboxError> {
    conn.query_row(
        "SELECT id, event_id, event_type, payload_json, dedupe_key, status,
                created_at, processed_at
         FROM outbox_records WHERE event_id = ?1",
        [event_id],
        map_row_to_record,
    )
    .optional()?
    .ok_or_else(|| OutboxError::NotFound(event_id.to_string()))
}

/// Transitions a record to `PROCESSED`, stamping `processed_at`.
///
/// Returns `true` if this call performed the transition, `false` if the
/// record was already processed. The `status = 'PENDING'` guard makes the
/// transition monotonic under concurrent redelivery.
pub fn mark_processed(conn: &Connection, event_id: &str) -> Result<bool, OutboxError> {
    let changed = conn.execute(
        "UPDATE outbox_records
            SET status = 'PROCESSED',
                processed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
          WHERE event_id = ?1 AND status = 'PENDING'",
        [event_id],
    )?;
    Ok(changed > 0)
}

/// Lists records still `PENDING` after at least `older_than_secs` seconds.
///
/// This is the reconciliation hook: records stuck here either lost their
/// enqueue (the insert/enqueue pair is not atomic) or exhausted their
/// retries, and a periodic sweep re-enqueues them.
pub fn list_pending(
    conn: &Connection,
    older_than_secs: u64,
    limit: u32,
) -> Result<Vec<OutboxRecord>, OutboxError> {
    let modifier = format!("-{} seconds", older_than_secs);
    let mut stmt = conn.prepare(
        "SELECT id, event_id, event_type, payload_json, dedupe_key, status,
                created_at, processed_at
         FROM outbox_records
         WHERE status = 'PENDING'
           AND created_at <= strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?1)
         ORDER BY created_at ASC
         LIMIT ?2",
    )?;

    let rows = stmt.query_map(params![modifier, limit], map_row_to_record)?;
    let mut records = Vec::new();
    for row in rows {
        records.push(row?);
    }
    Ok(records)
}

fn map_row_to_record(row: &Row) -> rusqlite::Result<OutboxRecord> {
    let status_str: String = row.get(5)?;
    let status: OutboxStatus = status_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(OutboxRecord {
        id: row.get(0)?,
        event_id: row.get(1)?,
        event_type: row.get(2)?,
        payload_json: row.get(3)?,
        dedupe_key: row.get(4)?,
        status,
        created_at: row.get(6)?,
        processed_at: row.get(7)?,
    })
}
