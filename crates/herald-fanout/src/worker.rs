//! The fan-out worker: per-job state machine and the consumer pool.

use crate::resolver::{notification_details, resolve_recipients, RecipientContext};
use herald_db::DbPool;
use herald_notify::{
    create_notification, set_delivery_status, CreateNotificationParams, CreateOutcome,
    NotificationRecord, NotifyError,
};
use herald_outbox::{get_record, mark_processed, OutboxError};
use herald_queue::{claim_next, complete, discard, fail, FanoutJob, QueueError, WorkSignal};
use herald_relay::{NotificationBus, RelayEnvelope};
use herald_social::{get_user, list_followers, post_author, SocialError};
use herald_types::{DeliveryStatus, DomainEvent, OutboxStatus};
use rusqlite::Connection;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Tunables for the worker pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Number of concurrent consumer tasks.
    pub concurrency: usize,
    /// Attempts per job before exhaustion.
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff.
    pub backoff_base_ms: i64,
    /// Lease duration while a job is held.
    pub lease_ms: i64,
    /// Polling fallback interval when no work notification arrives.
    pub poll_interval_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_attempts: herald_queue::DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: herald_queue::DEFAULT_BACKOFF_BASE_MS,
            lease_ms: herald_queue::DEFAULT_LEASE_MS,
            poll_interval_ms: 1_000,
        }
    }
}

/// Errors from processing a single fan-out job.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    /// The job references an outbox record that does not exist. Not
    /// retryable; the job is dropped.
    #[error("outbox record missing: {0}")]
    MissingRecord(String),

    #[error("outbox error: {0}")]
    Outbox(OutboxError),

    #[error("social store error: {0}")]
    Social(#[from] SocialError),

    #[error("notification store error: {0}")]
    Notify(#[from] NotifyError),
}

impl From<OutboxError> for FanoutError {
    fn from(e: OutboxError) -> Self {
        match e {
            OutboxError::NotFound(id) => Self::MissingRecord(id),
            other => Self::Outbox(other),
        }
    }
}

impl FanoutError {
    /// Whether re-running the job could possibly succeed.
    fn is_retryable(&self) -> bool {
        !matches!(self, Self::MissingRecord(_))
    }
}

/// What a single job execution did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// The record was already processed; nothing was attempted.
    pub skipped: bool,
    /// Recipients resolved for this event.
    pub recipients: usize,
    /// Notification records newly created by this execution.
    pub created: usize,
    /// Newly created records successfully handed to the relay.
    pub emitted: usize,
}

/// Executes the fan-out state machine for one claimed job.
///
/// Every step tolerates re-execution: a processed record short-circuits,
/// per-recipient creates absorb duplicates from earlier attempts, and the
/// relay only fires for records created by *this* execution. An error
/// anywhere before the final transition leaves the record `PENDING` so a
/// queue retry reruns the whole sequence.
pub fn process_job(
    conn: &Connection,
    job: &FanoutJob,
    bus: &NotificationBus,
) -> Result<ProcessOutcome, FanoutError> {
    // 1. Load.
    let record = get_record(conn, &job.outbox_event_id)?;

    // 2. Duplicate delivery of an already-processed record succeeds
    //    immediately.
    if record.status == OutboxStatus::Processed {
        tracing::debug!(event_id = %record.event_id, "record already processed, skipping");
        return Ok(ProcessOutcome {
            skipped: true,
            ..ProcessOutcome::default()
        });
    }

    // A payload this build cannot decode (version skew) resolves to zero
    // recipients; the job must complete, not spin in retries.
    let event = match record.decode_payload() {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(
                event_id = %record.event_id,
                event_type = %record.event_type,
                "undecodable outbox payload, completing with no recipients: {}",
                e
            );
            mark_processed(conn, &record.event_id)?;
            return Ok(ProcessOutcome::default());
        }
    };

    // 3. Resolve recipients from explicitly fetched context.
    let ctx = build_context(conn, &event)?;
    let recipients = resolve_recipients(&event, &ctx);

    // 4. Create one notification per recipient, absorbing duplicates from
    //    prior attempts.
    let actor_name = actor_display_name(conn, event.actor_id())?;
    let (notification_type, entity_kind, message) = notification_details(&event, &actor_name);

    let mut created: Vec<NotificationRecord> = Vec::new();
    for recipient in &recipients {
        let params = CreateNotificationParams {
            notification_id: Uuid::new_v4().to_string(),
            recipient_user_id: recipient.clone(),
            notification_type,
            actor_id: event.actor_id().to_string(),
            source_entity_id: event.entity_id().to_string(),
            source_entity_kind: entity_kind,
            message: message.clone(),
            outbox_event_id: record.event_id.clone(),
        };
        match create_notification(conn, &params)? {
            CreateOutcome::Created(notification) => created.push(notification),
            CreateOutcome::AlreadyExists => {
                tracing::debug!(
                    event_id = %record.event_id,
                    recipient = %recipient,
                    "recipient already notified by an earlier attempt"
                );
            }
        }
    }

    // 5. Best-effort relay of this execution's new records. Failure is
    //    recorded per notification and never fails the job; the pull
    //    channel remains authoritative.
    let mut emitted = 0;
    for notification in &created {
        let envelope = RelayEnvelope {
            recipient_user_id: notification.recipient_user_id.clone(),
            notification: notification.clone(),
        };
        let status = match bus.publish(envelope) {
            Ok(_) => {
                emitted += 1;
                DeliveryStatus::Emitted
            }
            Err(e) => {
                tracing::warn!(
                    notification_id = %notification.notification_id,
                    "relay publish failed, recipient will catch up via pull: {}",
                    e
                );
                DeliveryStatus::Failed
            }
        };
        set_delivery_status(conn, &notification.notification_id, status)?;
    }

    // 6. All recipients attempted (not necessarily all relayed): done.
    mark_processed(conn, &record.event_id)?;

    Ok(ProcessOutcome {
        skipped: false,
        recipients: recipients.len(),
        created: created.len(),
        emitted,
    })
}

/// Fetches the social context an event's resolution needs.
fn build_context(conn: &Connection, event: &DomainEvent) -> Result<RecipientContext, FanoutError> {
    match event {
        DomainEvent::PostCreated { actor_id, .. } => Ok(RecipientContext {
            followers: list_followers(conn, actor_id)?,
            entity_owner: None,
        }),
        DomainEvent::Followed { .. } => Ok(RecipientContext::default()),
        DomainEvent::Liked { entity_id, .. } | DomainEvent::Commented { entity_id, .. } => {
            let owner = match post_author(conn, entity_id)? {
                Some(owner) => owner,
                None => {
                    // Entity unknown to the store: fall back to reading the
                    // entity id as the owner id.
                    tracing::warn!(
                        entity_id = %entity_id,
                        "entity owner not found, treating entity id as the owner"
                    );
                    entity_id.clone()
                }
            };
            Ok(RecipientContext {
                followers: Vec::new(),
                entity_owner: Some(owner),
            })
        }
    }
}

/// Resolves the actor's display name, falling back to the raw id.
///
/// A missing actor row is permanent, so failing the job over it would just
/// burn retries; the raw id keeps the notification usable.
fn actor_display_name(conn: &Connection, actor_id: &str) -> Result<String, FanoutError> {
    match get_user(conn, actor_id) {
        Ok(user) => Ok(user.name),
        Err(SocialError::NotFound(_)) => {
            tracing::warn!(actor_id = %actor_id, "actor not found, using raw id in message");
            Ok(actor_id.to_string())
        }
        Err(e) => Err(e.into()),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Spawns the consumer pool: `settings.concurrency` tasks pulling jobs from
/// the shared queue until `shutdown` flips to `true`.
///
/// Each consumer drains the queue (claim → process → resolve), then parks
/// on the work signal with a polling fallback. Store calls run inside
/// `spawn_blocking` so SQLite never blocks the async runtime.
pub fn spawn_workers(
    pool: DbPool,
    bus: NotificationBus,
    signal: WorkSignal,
    settings: WorkerSettings,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..settings.concurrency)
        .map(|worker_id| {
            let pool = pool.clone();
            let bus = bus.clone();
            let signal = signal.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                tracing::debug!(worker_id, "fanout worker started");
                loop {
                    if *shutdown.borrow() {
                        break;
                    }

                    // Drain everything currently claimable.
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        match run_one(pool.clone(), bus.clone(), settings).await {
                            Ok(true) => continue,
                            Ok(false) => break,
                            Err(e) => {
                                tracing::error!(worker_id, "worker iteration failed: {}", e);
                                break;
                            }
                        }
                    }

                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = signal.wait_for_work(Duration::from_millis(settings.poll_interval_ms)) => {}
                    }
                }
                tracing::debug!(worker_id, "fanout worker stopped");
            })
        })
        .collect()
}

/// Claims and processes at most one job. Returns whether a job was claimed.
async fn run_one(
    pool: DbPool,
    bus: NotificationBus,
    settings: WorkerSettings,
) -> Result<bool, String> {
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| format!("pool error: {e}"))?;

        let job = match claim_next(&conn, now_ms(), settings.lease_ms)
            .map_err(|e| format!("claim error: {e}"))?
        {
            Some(job) => job,
            None => return Ok(false),
        };

        match process_job(&conn, &job, &bus) {
            Ok(outcome) => {
                complete(&conn, job.id).map_err(queue_err)?;
                tracing::info!(
                    job_key = %job.job_key,
                    skipped = outcome.skipped,
                    recipients = outcome.recipients,
                    created = outcome.created,
                    emitted = outcome.emitted,
                    "fanout job completed"
                );
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!(job_key = %job.job_key, "dropping job: {}", e);
                discard(&conn, job.id, &e.to_string()).map_err(queue_err)?;
            }
            Err(e) => {
                tracing::warn!(
                    job_key = %job.job_key,
                    attempt = job.attempt,
                    "fanout job failed, scheduling retry: {}",
                    e
                );
                fail(&conn, &job, now_ms(), settings.backoff_base_ms, &e.to_string())
                    .map_err(queue_err)?;
            }
        }
        Ok(true)
    })
    .await
    .map_err(|e| format!("worker task join error: {e}"))?
}

fn queue_err(e: QueueError) -> String {
    format!("queue error: {e}")
}
