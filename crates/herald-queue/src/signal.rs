//! Work notification between producers and the consumer pool.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Wakes idle consumers when new work may be available.
///
/// Producers call [`notify_work`](WorkSignal::notify_work) after enqueueing;
/// consumers block in [`wait_for_work`](WorkSignal::wait_for_work). The wait
/// always carries a polling fallback: deferred retries coming due and
/// expired leases generate no notification, so a consumer must eventually
/// re-check the table on its own.
///
/// Cheap to clone; all clones share one notifier.
#[derive(Clone)]
pub struct WorkSignal {
    notify: Arc<Notify>,
}

impl WorkSignal {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signals that a job was enqueued. Wakes one waiting consumer; if none
    /// is waiting, the permit is stored so the next wait returns promptly.
    pub fn notify_work(&self) {
        self.notify.notify_one();
    }

    /// Waits until work may be available or `poll_interval` elapses.
    ///
    /// Returning says nothing about whether a job is actually claimable;
    /// the caller tries to claim and handles `None`.
    pub async fn wait_for_work(&self, poll_interval: Duration) {
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

impl Default for WorkSignal {
    fn default() -> Self {
        Self::new()
    }
}
