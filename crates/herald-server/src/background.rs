//! Background tasks for the Herald server.
//!
//! Includes:
//! - The relay pump: the edge half of the delivery relay, draining the
//!   notification bus into live WebSocket sessions.
//! - The reconciliation sweep: re-enqueueing outbox records stuck in
//!   `PENDING` (lost enqueue, exhausted retries).

use crate::api_ws::OutgoingFrame;
use crate::AppState;
use herald_outbox::list_pending;
use herald_queue::{enqueue, sweep_job_key, EnqueueOutcome};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, Duration};

/// Upper bound on records re-enqueued per sweep run.
const SWEEP_BATCH_LIMIT: u32 = 100;

/// Runs the relay pump until the bus closes.
///
/// Subscribes to the notification bus and fans each envelope out to the
/// recipient's live sessions. Lagging behind the bus capacity drops the
/// oldest envelopes, which is acceptable because the pull channel is the
/// authoritative one.
pub async fn start_relay_pump(state: Arc<AppState>) {
    let mut rx = state.bus.subscribe();
    tracing::info!("relay pump started");

    loop {
        match rx.recv().await {
            Ok(envelope) => {
                let frame = OutgoingFrame::NotificationNew {
                    notification: envelope.notification,
                };
                match serde_json::to_string(&frame) {
                    Ok(json) => {
                        let delivered = state
                            .registry
                            .emit(&envelope.recipient_user_id, json)
                            .await;
                        tracing::debug!(
                            recipient = %envelope.recipient_user_id,
                            delivered,
                            "relayed notification to live sessions"
                        );
                    }
                    Err(e) => {
                        tracing::error!("failed to serialize notification frame: {}", e);
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "relay pump lagged; envelopes dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }

    tracing::info!("relay pump stopped");
}

/// Starts the reconciliation sweep task.
///
/// Every `interval_secs`, PENDING outbox records older than
/// `pending_age_secs` get a fresh fan-out job. This catches records whose
/// enqueue was lost after the outbox write, and records whose jobs
/// exhausted their retries. Sweep job keys are minute-bucketed, so a
/// record swept twice in quick succession still gets only one job.
pub async fn start_reconciliation_task(
    state: Arc<AppState>,
    interval_secs: u64,
    pending_age_secs: u64,
) {
    if interval_secs == 0 {
        tracing::warn!("reconciliation sweep disabled (interval=0)");
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    tracing::info!(
        interval_secs,
        pending_age_secs,
        "starting reconciliation sweep task"
    );

    loop {
        sleep(interval).await;

        let pool = state.pool.clone();
        let max_attempts = state.worker_settings.max_attempts;

        let res = tokio::task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| e.to_string())?;
            let pending = list_pending(&conn, pending_age_secs, SWEEP_BATCH_LIMIT)
                .map_err(|e| e.to_string())?;

            let now_ms = chrono::Utc::now().timestamp_millis();
            let mut enqueued = 0usize;
            for record in &pending {
                let key = sweep_job_key(&record.event_id, now_ms);
                match enqueue(&conn, &key, &record.event_id, 1, max_attempts, now_ms)
                    .map_err(|e| e.to_string())?
                {
                    EnqueueOutcome::Enqueued => enqueued += 1,
                    EnqueueOutcome::Duplicate => {}
                }
            }
            Ok::<usize, String>(enqueued)
        })
        .await;

        match res {
            Ok(Ok(enqueued)) => {
                if enqueued > 0 {
                    tracing::info!(enqueued, "reconciliation sweep re-enqueued stale records");
                    state.work_signal.notify_work();
                }
            }
            Ok(Err(e)) => {
                tracing::error!("reconciliation sweep failed: {}", e);
            }
            Err(e) => {
                tracing::error!("reconciliation sweep join error: {}", e);
            }
        }
    }
}
