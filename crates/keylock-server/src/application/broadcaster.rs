//! StateBroadcaster: fan-out of server events to connected sessions.
//!
//! Every connected session registers here and gets a bounded queue of
//! [`ServerEvent`]s.  The transport layer drains that queue into the session's
//! WebSocket.  The broadcaster never touches a socket itself, so a slow or
//! dead browser can never block a broadcast.
//!
//! # Delivery
//!
//! - Best effort: no acknowledgement, no retry.
//! - A session that is already gone is skipped and dropped from the registry.
//! - A session whose queue is full is *evicted*: its sender is dropped, the
//!   transport sees the queue close, and the normal disconnect path runs.
//!   Dropping single events instead would leave that browser with a keyboard
//!   that silently disagrees with everybody else's.
//!
//! # Ordering
//!
//! The registry is guarded by one async mutex and [`notify_all`] enqueues to
//! every session while holding it.  Two broadcasts therefore reach every
//! session in the same relative order.
//!
//! [`notify_all`]: StateBroadcaster::notify_all

use std::collections::HashMap;

use keylock_core::{ClientIdentity, ServerEvent};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifies one connection.  Distinct from [`ClientIdentity`], which several
/// connections may share.
pub type SessionId = Uuid;

struct Subscriber {
    identity: ClientIdentity,
    tx: mpsc::Sender<ServerEvent>,
}

/// Registry of connected sessions and their outbound queues.
pub struct StateBroadcaster {
    sessions: Mutex<HashMap<SessionId, Subscriber>>,
    queue_capacity: usize,
}

impl StateBroadcaster {
    /// Creates an empty broadcaster whose per-session queues hold
    /// `queue_capacity` events.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Registers a new session and returns its id and event receiver.
    pub async fn register(
        &self,
        identity: ClientIdentity,
    ) -> (SessionId, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        self.sessions
            .lock()
            .await
            .insert(id, Subscriber { identity, tx });
        (id, rx)
    }

    /// Removes a session.  Returns `false` if it was not registered (already
    /// removed or evicted).
    pub async fn unregister(&self, id: SessionId) -> bool {
        self.sessions.lock().await.remove(&id).is_some()
    }

    /// Delivers `event` to every registered session.
    ///
    /// Returns the number of sessions the event was queued for.
    pub async fn notify_all(&self, event: ServerEvent) -> usize {
        let mut sessions = self.sessions.lock().await;
        let mut delivered = 0;
        sessions.retain(|id, sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    "session {id} ({}) is not keeping up; evicting",
                    sub.identity
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("session {id} already closed; skipping");
                false
            }
        });
        debug!("broadcast {} to {delivered} session(s)", event.event_name());
        delivered
    }

    /// Delivers `event` to one session only.
    ///
    /// Returns `false` if the session is gone (or was evicted by this call).
    pub async fn notify_one(&self, id: SessionId, event: ServerEvent) -> bool {
        let mut sessions = self.sessions.lock().await;
        let Some(sub) = sessions.get(&id) else {
            return false;
        };
        match sub.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("session {id} ({}) is not keeping up; evicting", sub.identity);
                sessions.remove(&id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                sessions.remove(&id);
                false
            }
        }
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> ClientIdentity {
        ClientIdentity::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_notify_all_reaches_every_session() {
        // Arrange
        let b = StateBroadcaster::new(8);
        let (_, mut rx1) = b.register(id("a")).await;
        let (_, mut rx2) = b.register(id("b")).await;

        // Act
        let delivered = b.notify_all(ServerEvent::ControlReleased).await;

        // Assert
        assert_eq!(delivered, 2);
        assert_eq!(rx1.try_recv().unwrap(), ServerEvent::ControlReleased);
        assert_eq!(rx2.try_recv().unwrap(), ServerEvent::ControlReleased);
    }

    #[tokio::test]
    async fn test_notify_one_is_unicast() {
        let b = StateBroadcaster::new(8);
        let (s1, mut rx1) = b.register(id("a")).await;
        let (_, mut rx2) = b.register(id("b")).await;

        assert!(b.notify_one(s1, ServerEvent::ControlReleased).await);

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_session_is_skipped_and_pruned() {
        let b = StateBroadcaster::new(8);
        let (_, rx1) = b.register(id("a")).await;
        let (_, mut rx2) = b.register(id("b")).await;
        drop(rx1);

        let delivered = b.notify_all(ServerEvent::ControlReleased).await;

        assert_eq!(delivered, 1);
        assert!(rx2.try_recv().is_ok());
        assert_eq!(b.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_session() {
        // Arrange: capacity 1, never drained
        let b = StateBroadcaster::new(1);
        let (_, mut slow) = b.register(id("slow")).await;

        // Act
        assert_eq!(b.notify_all(ServerEvent::ControlReleased).await, 1);
        assert_eq!(b.notify_all(ServerEvent::ControlReleased).await, 0);

        // Assert: the queued event is still readable, then the queue closes
        assert_eq!(b.session_count().await, 0);
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_notify_one_to_unknown_session_returns_false() {
        let b = StateBroadcaster::new(1);
        assert!(!b.notify_one(Uuid::new_v4(), ServerEvent::ControlReleased).await);
    }

    #[tokio::test]
    async fn test_unregister_twice_returns_false() {
        let b = StateBroadcaster::new(1);
        let (s, _rx) = b.register(id("a")).await;
        assert!(b.unregister(s).await);
        assert!(!b.unregister(s).await);
    }

    #[tokio::test]
    async fn test_broadcasts_arrive_in_the_same_order_everywhere() {
        let b = StateBroadcaster::new(16);
        let (_, mut rx1) = b.register(id("a")).await;
        let (_, mut rx2) = b.register(id("b")).await;

        let granted = ServerEvent::ControlGranted {
            owner_id: Some(id("a")),
        };
        b.notify_all(granted.clone()).await;
        b.notify_all(ServerEvent::ControlReleased).await;

        for rx in [&mut rx1, &mut rx2] {
            assert_eq!(rx.try_recv().unwrap(), granted);
            assert_eq!(rx.try_recv().unwrap(), ServerEvent::ControlReleased);
        }
    }
}
