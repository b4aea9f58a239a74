//! Persistence operations for the fan-out job queue.

use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

/// Default number of attempts before a job is parked as exhausted.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for exponential backoff between attempts.
pub const DEFAULT_BACKOFF_BASE_MS: i64 = 2_000;

/// Default lease duration while a worker holds a job.
pub const DEFAULT_LEASE_MS: i64 = 30_000;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Lifecycle states of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Waiting to be claimed once `run_at_ms` passes.
    Queued,
    /// Held by a worker until the lease expires or the job resolves.
    Leased,
    /// Processed successfully.
    Completed,
    /// All attempts failed; only the reconciliation sweep revives the event.
    Exhausted,
    /// Dropped for a non-retryable reason (e.g. the event no longer exists).
    Discarded,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Leased => "LEASED",
            Self::Completed => "COMPLETED",
            Self::Exhausted => "EXHAUSTED",
            Self::Discarded => "DISCARDED",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(Self::Queued),
            "LEASED" => Ok(Self::Leased),
            "COMPLETED" => Ok(Self::Completed),
            "EXHAUSTED" => Ok(Self::Exhausted),
            "DISCARDED" => Ok(Self::Discarded),
            _ => Err(format!("unknown job status: {s}")),
        }
    }
}

/// A claimed fan-out job.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutJob {
    /// Internal database ID.
    pub id: i64,
    /// `"{outbox event id}:{attempt}"`, the idempotent enqueue key.
    pub job_key: String,
    /// The outbox record this job fans out.
    pub outbox_event_id: String,
    /// 1-based attempt counter.
    pub attempt: u32,
    /// Attempts allowed before exhaustion.
    pub max_attempts: u32,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Builds the idempotent job key for an event attempt.
pub fn job_key(outbox_event_id: &str, attempt: u32) -> String {
    format!("{outbox_event_id}:{attempt}")
}

/// Builds the job key for a reconciliation re-enqueue.
///
/// Sweep keys are bucketed by minute rather than reusing attempt numbers:
/// an exhausted event already owns its `"{event}:{n}"` keys, and reusing
/// them would make the re-enqueue a dedup no-op forever. The bucket keeps
/// repeated sweeps within the same minute idempotent.
pub fn sweep_job_key(outbox_event_id: &str, now_ms: i64) -> String {
    format!("{outbox_event_id}:sweep:{}", now_ms / 60_000)
}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The job was inserted and will become claimable at its `run_at`.
    Enqueued,
    /// A job with this key already exists; the enqueue was a no-op.
    Duplicate,
}

/// Enqueues a fan-out job, idempotently on its key.
pub fn enqueue(
    conn: &Connection,
    key: &str,
    outbox_event_id: &str,
    attempt: u32,
    max_attempts: u32,
    run_at_ms: i64,
) -> Result<EnqueueOutcome, QueueError> {
    let changed = conn.execute(
        "INSERT INTO fanout_jobs (job_key, outbox_event_id, attempt, max_attempts, status, run_at_ms)
         VALUES (?1, ?2, ?3, ?4, 'QUEUED', ?5)
         ON CONFLICT (job_key) DO NOTHING",
        params![key, outbox_event_id, attempt, max_attempts, run_at_ms],
    )?;

    if changed > 0 {
        Ok(EnqueueOutcome::Enqueued)
    } else {
        tracing::debug!(job_key = key, "duplicate enqueue absorbed");
        Ok(EnqueueOutcome::Duplicate)
    }
}

/// Claims the next due job, taking a lease until `now_ms + lease_ms`.
///
/// A job is due when it is `QUEUED` with `run_at_ms` in the past, or
/// `LEASED` with an expired lease (a worker died or stalled mid-job).
/// The claim is a single statement, so concurrent workers each get a
/// distinct job or `None`.
pub fn claim_next(
    conn: &Connection,
    now_ms: i64,
    lease_ms: i64,
) -> Result<Option<FanoutJob>, QueueError> {
    let job = conn
        .query_row(
            "UPDATE fanout_jobs
                SET status = 'LEASED', lease_expires_at_ms = ?1 + ?2
              WHERE id = (
                    SELECT id FROM fanout_jobs
                     WHERE (status = 'QUEUED' AND run_at_ms <= ?1)
                        OR (status = 'LEASED' AND lease_expires_at_ms <= ?1)
                     ORDER BY run_at_ms ASC
                     LIMIT 1)
              RETURNING id, job_key, outbox_event_id, attempt, max_attempts, created_at",
            params![now_ms, lease_ms],
            map_row_to_job,
        )
        .optional()?;
    Ok(job)
}

/// Marks a leased job as successfully completed.
pub fn complete(conn: &Connection, job_id: i64) -> Result<(), QueueError> {
    conn.execute(
        "UPDATE fanout_jobs SET status = 'COMPLETED', lease_expires_at_ms = NULL WHERE id = ?1",
        [job_id],
    )?;
    Ok(())
}

/// Outcome of failing a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The job was requeued for another attempt after a backoff delay.
    Retried {
        next_attempt: u32,
        /// When the retry becomes claimable (unix ms).
        run_at_ms: i64,
    },
    /// Attempts are used up; the job parked as `EXHAUSTED`.
    Exhausted,
}

/// Records a handler failure, scheduling a retry or exhausting the job.
///
/// The retry reuses the row with `attempt + 1` and a new job key, so the
/// per-attempt key uniqueness is preserved. Backoff is exponential:
/// `backoff_base_ms * 2^(attempt - 1)`.
pub fn fail(
    conn: &Connection,
    job: &FanoutJob,
    now_ms: i64,
    backoff_base_ms: i64,
    error: &str,
) -> Result<RetryOutcome, QueueError> {
    if job.attempt >= job.max_attempts {
        conn.execute(
            "UPDATE fanout_jobs
                SET status = 'EXHAUSTED', lease_expires_at_ms = NULL, last_error = ?2
              WHERE id = ?1",
            params![job.id, error],
        )?;
        tracing::warn!(
            job_key = %job.job_key,
            attempts = job.attempt,
            "job exhausted its retries"
        );
        return Ok(RetryOutcome::Exhausted);
    }

    let next_attempt = job.attempt + 1;
    let delay_ms = backoff_base_ms.saturating_mul(1_i64 << (job.attempt - 1));
    let run_at_ms = now_ms + delay_ms;
    let next_key = job_key(&job.outbox_event_id, next_attempt);

    conn.execute(
        "UPDATE fanout_jobs
            SET status = 'QUEUED', attempt = ?2, job_key = ?3, run_at_ms = ?4,
                lease_expires_at_ms = NULL, last_error = ?5
          WHERE id = ?1",
        params![job.id, next_attempt, next_key, run_at_ms, error],
    )?;

    Ok(RetryOutcome::Retried {
        next_attempt,
        run_at_ms,
    })
}

/// Drops a job for a non-retryable reason.
pub fn discard(conn: &Connection, job_id: i64, error: &str) -> Result<(), QueueError> {
    conn.execute(
        "UPDATE fanout_jobs
            SET status = 'DISCARDED', lease_expires_at_ms = NULL, last_error = ?2
          WHERE id = ?1",
        params![job_id, error],
    )?;
    Ok(())
}

/// Fetches a job row by key, with its current status. Mostly for tests and
/// operational inspection.
pub fn get_job(conn: &Connection, key: &str) -> Result<Option<(FanoutJob, JobStatus)>, QueueError> {
    let row = conn
        .query_row(
            "SELECT id, job_key, outbox_event_id, attempt, max_attempts, created_at, status
             FROM fanout_jobs WHERE job_key = ?1",
            [key],
            |row| {
                let job = map_row_to_job(row)?;
                let status_str: String = row.get(6)?;
                Ok((job, status_str))
            },
        )
        .optional()?;

    match row {
        Some((job, status_str)) => {
            let status: JobStatus = status_str.parse().map_err(|e: String| {
                rusqlite::Error::FromSqlConversionFailure(
                    6,
                    rusqlite::types::Type::Text,
                    e.into(),
                )
            })?;
            Ok(Some((job, status)))
        }
        None => Ok(None),
    }
}

fn map_row_to_job(row: &Row) -> rusqlite::Result<FanoutJob> {
    Ok(FanoutJob {
        id: row.get(0)?,
        job_key: row.get(1)?,
        outbox_event_id: row.get(2)?,
        attempt: row.get(3)?,
        max_attempts: row.get(4)?,
        created_at: row.get(5)?,
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

    #[test]
    fn enqueue_is_idempotent_per_key() {
        let conn = setup_db();
        let key = job_key("ev-1", 1);

        assert_eq!(
            enqueue(&conn, &key, "ev-1", 1, 3, 0).expect("enqueue failed"),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            enqueue(&conn, &key, "ev-1", 1, 3, 0).expect("enqueue failed"),
            EnqueueOutcome::Duplicate
        );

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM fanout_jobs", [], |row| row.get(0))
            .expect("count failed");
        assert_eq!(count, 1);
    }

    #[test]
    fn claim_leases_exactly_one_job() {
        let conn = setup_db();
        enqueue(&conn, &job_key("ev-1", 1), "ev-1", 1, 3, 0).expect("enqueue failed");

        let job = claim_next(&conn, 1_000, 30_000)
            .expect("claim failed")
            .expect("job should be claimable");
        assert_eq!(job.outbox_event_id, "ev-1");
        assert_eq!(job.attempt, 1);

        // While the lease holds, nothing else is claimable.
        assert!(claim_next(&conn, 2_000, 30_000).expect("claim failed").is_none());

        // Once the lease expires the job comes back.
        let reclaimed = claim_next(&conn, 32_000, 30_000)
            .expect("claim failed")
            .expect("expired lease should be reclaimable");
        assert_eq!(reclaimed.id, job.id);
    }

    #[test]
    fn deferred_jobs_wait_for_run_at() {
        let conn = setup_db();
        enqueue(&conn, &job_key("ev-1", 1), "ev-1", 1, 3, 5_000).expect("enqueue failed");

        assert!(claim_next(&conn, 4_999, 30_000).expect("claim failed").is_none());
        assert!(claim_next(&conn, 5_000, 30_000).expect("claim failed").is_some());
    }

    #[test]
    fn completed_jobs_are_never_reclaimed() {
        let conn = setup_db();
        enqueue(&conn, &job_key("ev-1", 1), "ev-1", 1, 3, 0).expect("enqueue failed");
        let job = claim_next(&conn, 0, 30_000)
            .expect("claim failed")
            .expect("claimable");
        complete(&conn, job.id).expect("complete failed");

        assert!(claim_next(&conn, 100_000, 30_000).expect("claim failed").is_none());
        let (_, status) = get_job(&conn, &job.job_key)
            .expect("get failed")
            .expect("row exists");
        assert_eq!(status, JobStatus::Completed);
    }

    #[test]
    fn failure_backs_off_exponentially_then_exhausts() {
        let conn = setup_db();
        enqueue(&conn, &job_key("ev-1", 1), "ev-1", 1, 3, 0).expect("enqueue failed");

        // Attempt 1 fails: retry at now + base * 2^0.
        let job = claim_next(&conn, 0, 30_000).expect("claim").expect("job");
        let outcome = fail(&conn, &job, 10_000, 2_000, "store timeout").expect("fail failed");
        assert_eq!(
            outcome,
            RetryOutcome::Retried {
                next_attempt: 2,
                run_at_ms: 12_000
            }
        );
        assert!(claim_next(&conn, 11_999, 30_000).expect("claim").is_none());

        // Attempt 2 fails: retry at now + base * 2^1.
        let job = claim_next(&conn, 12_000, 30_000).expect("claim").expect("job");
        assert_eq!(job.attempt, 2);
        assert_eq!(job.job_key, job_key("ev-1", 2));
        let outcome = fail(&conn, &job, 20_000, 2_000, "store timeout").expect("fail failed");
        assert_eq!(
            outcome,
            RetryOutcome::Retried {
                next_attempt: 3,
                run_at_ms: 24_000
            }
        );

        // Attempt 3 fails: exhausted.
        let job = claim_next(&conn, 24_000, 30_000).expect("claim").expect("job");
        assert_eq!(job.attempt, 3);
        let outcome = fail(&conn, &job, 30_000, 2_000, "store timeout").expect("fail failed");
        assert_eq!(outcome, RetryOutcome::Exhausted);

        assert!(claim_next(&conn, 1_000_000, 30_000).expect("claim").is_none());
        let (parked, status) = get_job(&conn, &job_key("ev-1", 3))
            .expect("get failed")
            .expect("row exists");
        assert_eq!(status, JobStatus::Exhausted);
        assert_eq!(parked.attempt, 3);
    }

    #[test]
    fn discarded_jobs_stay_discarded() {
        let conn = setup_db();
        enqueue(&conn, &job_key("ev-1", 1), "ev-1", 1, 3, 0).expect("enqueue failed");
        let job = claim_next(&conn, 0, 30_000).expect("claim").expect("job");

        discard(&conn, job.id, "outbox record missing").expect("discard failed");
        assert!(claim_next(&conn, 1_000_000, 30_000).expect("claim").is_none());

        let (_, status) = get_job(&conn, &job.job_key)
            .expect("get failed")
            .expect("row exists");
        assert_eq!(status, JobStatus::Discarded);
    }

    #[test]
    fn sweep_keys_bucket_by_minute() {
        assert_eq!(sweep_job_key("ev-1", 0), "ev-1:sweep:0");
        assert_eq!(sweep_job_key("ev-1", 59_999), "ev-1:sweep:0");
        assert_eq!(sweep_job_key("ev-1", 60_000), "ev-1:sweep:1");
    }

    #[test]
    fn claim_prefers_oldest_due_job() {
        let conn = setup_db();
        enqueue(&conn, &job_key("ev-late", 1), "ev-late", 1, 3, 500).expect("enqueue failed");
        enqueue(&conn, &job_key("ev-early", 1), "ev-early", 1, 3, 100).expect("enqueue failed");

        let first = claim_next(&conn, 1_000, 30_000).expect("claim").expect("job");
        assert_eq!(first.outbox_event_id, "ev-early");
        let second = claim_next(&conn, 1_000, 30_000).expect("claim").expect("job");
        assert_eq!(second.outbox_event_id, "ev-late");
    }
}
