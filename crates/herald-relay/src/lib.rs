//! Best-effort live delivery for the Herald platform.
//!
//! Two halves, meeting at a process-shaped seam:
//!
//! - [`NotificationBus`] is the publish/subscribe channel the fan-out worker
//!   publishes freshly created notifications into. It is a broadcast-and-
//!   filter topic: every subscriber sees every envelope and fans out to its
//!   own sessions. Workers and edge processes scale independently on either
//!   side of it.
//! - [`SessionRegistry`] is the edge half: live client sessions and which
//!   recipient each one has joined as. Delivery to a recipient with no live
//!   session is a no-op; the persisted record stays retrievable through
//!   the pull channel, which is the authoritative one.
//!
//! Nothing here gates correctness: a lost push costs latency, never data.

use herald_notify::NotificationRecord;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

/// Default capacity of the broadcast bus.
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// Per-session outbound buffer. Beyond this the client is too slow and
/// frames are dropped.
pub const SESSION_BUFFER: usize = 64;

/// Errors from the relay's publish side.
#[derive(Debug, Error)]
pub enum RelayError {
    /// No edge process is subscribed to the bus; the envelope went nowhere.
    #[error("relay channel has no subscribers")]
    NoSubscribers,
}

/// What the worker publishes: a recipient and their freshly created
/// notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEnvelope {
    pub recipient_user_id: String,
    pub notification: NotificationRecord,
}

/// The publish/subscribe channel between fan-out workers and edge
/// processes.
///
/// Cheap to clone; all clones share one underlying channel.
#[derive(Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<RelayEnvelope>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an envelope to every subscriber.
    ///
    /// Returns the subscriber count on success. Failing because nobody is
    /// subscribed is the "relay unavailable" case: callers record it per
    /// notification and move on.
    pub fn publish(&self, envelope: RelayEnvelope) -> Result<usize, RelayError> {
        self.tx.send(envelope).map_err(|_| RelayError::NoSubscribers)
    }

    /// Opens a subscription. A subscriber that falls behind by more than the
    /// bus capacity loses the oldest envelopes (push is best-effort).
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEnvelope> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}

/// Live client sessions and their recipient bindings.
///
/// A session connects, then joins as a recipient; one recipient may hold
/// several live sessions (multiple tabs, devices). All maps are guarded by
/// `tokio::sync::RwLock` and every mutation is an additive or removal
/// operation on a single key.
///
/// Lock ordering: `sessions` → `user_sessions` → `session_users`.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    /// Active sessions: session id -> outbound frame sender.
    sessions: Arc<RwLock<HashMap<Uuid, mpsc::Sender<String>>>>,
    /// Recipient id -> set of session ids joined under it.
    user_sessions: Arc<RwLock<HashMap<String, HashSet<Uuid>>>>,
    /// Reverse mapping: session id -> joined recipient id.
    session_users: Arc<RwLock<HashMap<Uuid, String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly connected session and returns its ID.
    ///
    /// The session delivers nothing until it joins as a recipient.
    pub async fn connect(&self, sender: mpsc::Sender<String>) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.write().await.insert(session_id, sender);
        session_id
    }

    /// Binds a session to a recipient. Re-joining as a different recipient
    /// moves the session: the old binding is removed first.
    pub async fn join(&self, session_id: Uuid, user_id: String) {
        // A join for an unknown session (already disconnected) is ignored.
        if !self.sessions.read().await.contains_key(&session_id) {
            return;
        }

        let previous = {
            let mut session_users = self.session_users.write().await;
            session_users.insert(session_id, user_id.clone())
        };

        let mut user_sessions = self.user_sessions.write().await;
        if let Some(prev_user) = previous {
            if let Some(set) = user_sessions.get_mut(&prev_user) {
                set.remove(&session_id);
                if set.is_empty() {
                    user_sessions.remove(&prev_user);
                }
            }
        }
        user_sessions.entry(user_id).or_default().insert(session_id);
    }

    /// Unbinds a session from its recipient without closing it.
    pub async fn leave(&self, session_id: Uuid) {
        let user = { self.session_users.write().await.remove(&session_id) };
        if let Some(user) = user {
            let mut user_sessions = self.user_sessions.write().await;
            if let Some(set) = user_sessions.get_mut(&user) {
                set.remove(&session_id);
                if set.is_empty() {
                    user_sessions.remove(&user);
                }
            }
        }
    }

    /// Removes a session entirely (socket closed).
    pub async fn disconnect(&self, session_id: Uuid) {
        self.sessions.write().await.remove(&session_id);
        self.leave(session_id).await;
    }

    /// Delivers a frame to every live session joined under `user_id`.
    ///
    /// Returns how many sessions the frame was handed to. Zero live
    /// sessions is a quiet no-op; a slow consumer's frame is dropped with
    /// a warning rather than blocking delivery to everyone else.
    pub async fn emit(&self, user_id: &str, frame_json: String) -> usize {
        let session_ids = {
            let user_sessions = self.user_sessions.read().await;
            match user_sessions.get(user_id) {
                Some(set) => set.iter().copied().collect::<Vec<_>>(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let sessions = self.sessions.read().await;
        for session_id in session_ids {
            if let Some(sender) = sessions.get(&session_id) {
                match sender.try_send(frame_json.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(
                            user_id = %user_id,
                            session_id = %session_id,
                            "dropping frame for slow or closed session: {}",
                            e
                        );
                    }
                }
            }
        }
        delivered
    }

    /// Number of live sessions joined under `user_id`.
    pub async fn live_session_count(&self, user_id: &str) -> usize {
        self.user_sessions
            .read()
            .await
            .get(user_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_types::{DeliveryStatus, EntityKind, NotificationType};

    fn sample_record() -> NotificationRecord {
        NotificationRecord {
            id: 1,
            notification_id: "ntf-1".to_string(),
            recipient_user_id: "user-b".to_string(),
            notification_type: NotificationType::NewFollower,
            actor_id: "user-a".to_string(),
            source_entity_id: "user-b".to_string(),
            source_entity_kind: EntityKind::User,
            message: "Alice started following you".to_string(),
            is_read: false,
            dedupe_key: "ev-1:user-b".to_string(),
            delivery_status: DeliveryStatus::Pending,
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_errors() {
        let bus = NotificationBus::new(8);
        let envelope = RelayEnvelope {
            recipient_user_id: "user-b".to_string(),
            notification: sample_record(),
        };
        assert!(matches!(bus.publish(envelope), Err(RelayError::NoSubscribers)));
    }

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = NotificationBus::new(8);
        let mut rx = bus.subscribe();

        let envelope = RelayEnvelope {
            recipient_user_id: "user-b".to_string(),
            notification: sample_record(),
        };
        let delivered = bus.publish(envelope).expect("publish should succeed");
        assert_eq!(delivered, 1);

        let received = rx.recv().await.expect("subscriber should receive");
        assert_eq!(received.recipient_user_id, "user-b");
        assert_eq!(received.notification.notification_id, "ntf-1");
    }

    #[tokio::test]
    async fn emit_reaches_every_joined_session() {
        let registry = SessionRegistry::new();

        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let s1 = registry.connect(tx1).await;
        let s2 = registry.connect(tx2).await;
        registry.join(s1, "user-b".to_string()).await;
        registry.join(s2, "user-b".to_string()).await;

        let delivered = registry.emit("user-b", "frame".to_string()).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.as_deref(), Some("frame"));
        assert_eq!(rx2.recv().await.as_deref(), Some("frame"));
    }

    #[tokio::test]
    async fn emit_to_absent_recipient_is_a_noop() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.emit("user-nobody", "frame".to_string()).await, 0);
    }

    #[tokio::test]
    async fn rejoin_moves_the_session() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        let session = registry.connect(tx).await;

        registry.join(session, "user-b".to_string()).await;
        registry.join(session, "user-c".to_string()).await;

        assert_eq!(registry.live_session_count("user-b").await, 0);
        assert_eq!(registry.live_session_count("user-c").await, 1);

        assert_eq!(registry.emit("user-b", "frame-b".to_string()).await, 0);
        assert_eq!(registry.emit("user-c", "frame-c".to_string()).await, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("frame-c"));
    }

    #[tokio::test]
    async fn disconnect_cleans_up_bindings() {
        let registry = SessionRegistry::new();
        let (tx, _rx) = mpsc::channel(4);
        let session = registry.connect(tx).await;
        registry.join(session, "user-b".to_string()).await;

        registry.disconnect(session).await;
        assert_eq!(registry.live_session_count("user-b").await, 0);
        assert_eq!(registry.emit("user-b", "frame".to_string()).await, 0);

        // Joining after disconnect is ignored.
        registry.join(session, "user-b".to_string()).await;
        assert_eq!(registry.live_session_count("user-b").await, 0);
    }

    #[tokio::test]
    async fn leave_keeps_the_session_connected() {
        let registry = SessionRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        let session = registry.connect(tx).await;
        registry.join(session, "user-b".to_string()).await;
        registry.leave(session).await;

        assert_eq!(registry.emit("user-b", "frame".to_string()).await, 0);

        // The session can join again.
        registry.join(session, "user-b".to_string()).await;
        assert_eq!(registry.emit("user-b", "frame".to_string()).await, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("frame"));
    }
}
