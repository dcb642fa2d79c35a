//! SessionCoordinator: one connection's view of the shared keyboard.
//!
//! The transport creates a coordinator per WebSocket connection, feeds it
//! every decoded [`ClientMessage`], and calls [`SessionCoordinator::disconnect`]
//! when the socket goes away.  Everything the browser should see arrives on
//! the event receiver returned by [`SessionCoordinator::connect`]: replies to
//! this session and broadcasts to everyone share that one queue, so they
//! reach the browser in the order they were produced.
//!
//! # Identity
//!
//! A session's [`ClientIdentity`] comes from the connection metadata and never
//! changes.  Lock ownership is always checked against it.  The `userId` a
//! browser may put in an `updateKeys` payload is only compared with it; it
//! cannot make a session act as somebody else.
//!
//! Several connections may share one identity (two tabs of the same user).
//! They share the lock too: whichever of them submits or disconnects first
//! ends the hold.

use std::sync::Arc;

use keylock_core::{
    AcquireOutcome, ClientIdentity, ClientMessage, ErrorCode, IdentityError, KeyValidationError,
    KeyboardState, ServerEvent,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::broadcaster::SessionId;
use crate::application::context::AppContext;
use crate::application::store::StoreError;

/// Reasons a session request fails.  All of them are local to the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The shared store could not be reached; nothing changed.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The connection did not carry a usable client identity.
    #[error("invalid client identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    /// The submitted key row was malformed.
    #[error("invalid keys: {0}")]
    InvalidKeys(#[from] KeyValidationError),

    /// The submitter does not hold the control lock.
    #[error("control denied; held by {}", owner_name(.owner))]
    ControlDenied { owner: Option<ClientIdentity> },
}

fn owner_name(owner: &Option<ClientIdentity>) -> &str {
    owner.as_ref().map_or("nobody", |o| o.as_str())
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::StoreUnavailable(err.to_string())
    }
}

/// Per-connection entry point into the lock and the keyboard.
pub struct SessionCoordinator {
    ctx: Arc<AppContext>,
    session_id: SessionId,
    identity: ClientIdentity,
}

impl SessionCoordinator {
    /// Admits a new connection.
    ///
    /// Validates `raw_identity`, registers the session with the broadcaster,
    /// and queues the initial sync for it alone: `updateKeys` with the
    /// current keyboard, then `controlGranted` with the current holder (or
    /// `null`).  No lock transition can complete between reading that
    /// snapshot and registering, so no later broadcast can be missed or
    /// arrive before it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidIdentity`] if the identity is missing or
    ///   malformed.  Nothing is registered.
    /// - [`SessionError::StoreUnavailable`] if the snapshot could not be read.
    pub async fn connect(
        ctx: Arc<AppContext>,
        raw_identity: Option<&str>,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), SessionError> {
        let identity = ClientIdentity::from_optional(raw_identity)?;

        let ctx_ref = &ctx;
        let identity_ref = &identity;
        let (session_id, events) = ctx
            .locks()
            .exclusive(move || async move {
                let keys = ctx_ref.current_state().await?;
                let owner = ctx_ref.locks().current_owner().await?;

                let broadcaster = ctx_ref.broadcaster();
                let (session_id, events) = broadcaster.register(identity_ref.clone()).await;
                broadcaster
                    .notify_one(session_id, ServerEvent::UpdateKeys { keys })
                    .await;
                broadcaster
                    .notify_one(session_id, ServerEvent::ControlGranted { owner_id: owner })
                    .await;
                Ok::<_, StoreError>((session_id, events))
            })
            .await?;

        info!("session {session_id} connected as {identity}");
        Ok((
            Self {
                ctx,
                session_id,
                identity,
            },
            events,
        ))
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    /// Asks for the control lock on behalf of this session's identity.
    ///
    /// A grant is announced to every session by the lock manager.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StoreUnavailable`] if the store could not be
    /// reached.
    pub async fn acquire_control(&self) -> Result<AcquireOutcome, SessionError> {
        Ok(self.ctx.locks().acquire(&self.identity).await?)
    }

    /// Replaces the keyboard with `new_keys` and gives up control.
    ///
    /// On success every session receives `updateKeys` followed by
    /// `controlReleased`, and the lock is free.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidKeys`] if `new_keys` has the wrong length or
    ///   an unknown colour.  Checked first; nothing else happens.
    /// - [`SessionError::ControlDenied`] if `claimed_user_id` is given and is
    ///   not this session's identity, or if this identity does not hold the
    ///   lock.
    /// - [`SessionError::StoreUnavailable`] if the store could not be reached.
    pub async fn submit_keys(
        &self,
        claimed_user_id: Option<&str>,
        new_keys: &[String],
    ) -> Result<(), SessionError> {
        let state = KeyboardState::from_color_names(new_keys, self.ctx.config().key_count)?;

        if claimed_user_id.is_some_and(|claimed| claimed != self.identity.as_str()) {
            let owner = self.ctx.locks().current_owner().await?;
            return Err(SessionError::ControlDenied { owner });
        }

        let ctx = &self.ctx;
        let outcome = ctx
            .locks()
            .complete_as_owner(&self.identity, move || async move {
                ctx.store().set_state(&state).await?;
                ctx.broadcaster()
                    .notify_all(ServerEvent::UpdateKeys { keys: state })
                    .await;
                Ok::<_, StoreError>(())
            })
            .await?;

        match outcome {
            Ok(()) => {
                info!("{} submitted a new keyboard", self.identity);
                Ok(())
            }
            Err(owner) => Err(SessionError::ControlDenied { owner }),
        }
    }

    /// Handles one message from the browser and queues the reply for this
    /// session.
    ///
    /// The error is returned as well, for logging; the browser has already
    /// been told.
    pub async fn handle(&self, message: ClientMessage) -> Result<(), SessionError> {
        debug!("session {}: {}", self.session_id, message.event_name());
        match message {
            ClientMessage::AcquireControl { ack } => {
                let result = self.acquire_control().await;
                let reply = match &result {
                    Ok(outcome) => ServerEvent::Ack {
                        ack,
                        success: outcome.granted,
                        owner_id: outcome.current_owner.clone(),
                    },
                    Err(_) => ServerEvent::Ack {
                        ack,
                        success: false,
                        owner_id: None,
                    },
                };
                if let Err(e) = &result {
                    self.reply(Self::error_event(e)).await;
                }
                self.reply(reply).await;
                result.map(|_| ())
            }
            ClientMessage::UpdateKeys { user_id, new_keys } => {
                let result = self.submit_keys(user_id.as_deref(), &new_keys).await;
                if let Err(e) = &result {
                    self.reply(Self::error_event(e)).await;
                }
                result
            }
        }
    }

    /// Tells this session its last frame could not be understood.
    pub async fn report_bad_request(&self, detail: impl Into<String>) {
        self.reply(ServerEvent::Error {
            code: ErrorCode::BadRequest,
            message: detail.into(),
        })
        .await;
    }

    /// Unregisters the session and releases the lock if its identity holds
    /// it.  Returns whether a lock was released.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StoreUnavailable`] if the release could not
    /// reach the store.  The session is unregistered regardless, and the
    /// lock will still lapse at its deadline.
    pub async fn disconnect(self) -> Result<bool, SessionError> {
        self.ctx.broadcaster().unregister(self.session_id).await;
        let released = self.ctx.locks().release(&self.identity).await;
        match &released {
            Ok(true) => info!(
                "session {} ({}) disconnected; control released",
                self.session_id, self.identity
            ),
            Ok(false) => info!("session {} ({}) disconnected", self.session_id, self.identity),
            Err(e) => warn!(
                "session {} ({}) disconnected; release failed: {e}",
                self.session_id, self.identity
            ),
        }
        Ok(released?)
    }

    async fn reply(&self, event: ServerEvent) {
        if !self.ctx.broadcaster().notify_one(self.session_id, event).await {
            debug!("session {} gone before reply", self.session_id);
        }
    }

    fn error_event(err: &SessionError) -> ServerEvent {
        match err {
            SessionError::ControlDenied { owner } => ServerEvent::ControlDenied {
                reason: "you do not hold control".to_string(),
                owner_id: owner.clone(),
            },
            SessionError::InvalidKeys(e) => ServerEvent::Error {
                code: ErrorCode::InvalidKeys,
                message: e.to_string(),
            },
            SessionError::StoreUnavailable(detail) => ServerEvent::Error {
                code: ErrorCode::StoreUnavailable,
                message: detail.clone(),
            },
            SessionError::InvalidIdentity(e) => ServerEvent::Error {
                code: ErrorCode::BadRequest,
                message: e.to_string(),
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::store::MockStateStore;
    use crate::domain::config::ServerConfig;
    use keylock_core::LockRecord;
    use crate::infrastructure::memory_store::MemoryStore;

    fn ctx(key_count: usize) -> Arc<AppContext> {
        let config = ServerConfig {
            key_count,
            ..ServerConfig::default()
        };
        AppContext::new(config, Arc::new(MemoryStore::new(key_count)))
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn test_connect_without_identity_is_rejected() {
        let ctx = ctx(2);
        let result = SessionCoordinator::connect(Arc::clone(&ctx), None).await;
        assert!(matches!(
            result,
            Err(SessionError::InvalidIdentity(IdentityError::Missing))
        ));
        assert_eq!(ctx.broadcaster().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_connect_syncs_state_then_owner() {
        // Arrange
        let ctx = ctx(2);

        // Act
        let (_s, mut rx) = SessionCoordinator::connect(ctx, Some("u1")).await.unwrap();

        // Assert
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerEvent::UpdateKeys {
                    keys: KeyboardState::new_default(2)
                },
                ServerEvent::ControlGranted { owner_id: None },
            ]
        );
    }

    #[tokio::test]
    async fn test_submit_with_wrong_length_is_invalid_keys() {
        let ctx = ctx(3);
        let (s, mut rx) = SessionCoordinator::connect(ctx, Some("u1")).await.unwrap();
        s.acquire_control().await.unwrap();
        drain(&mut rx);

        let result = s
            .handle(ClientMessage::UpdateKeys {
                user_id: None,
                new_keys: keys(&["red"]),
            })
            .await;

        assert!(matches!(result, Err(SessionError::InvalidKeys(_))));
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::Error {
                code: ErrorCode::InvalidKeys,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_submit_with_foreign_user_id_is_denied() {
        // Arrange: u1 holds control
        let ctx = ctx(1);
        let (s, mut rx) = SessionCoordinator::connect(Arc::clone(&ctx), Some("u1"))
            .await
            .unwrap();
        s.acquire_control().await.unwrap();
        drain(&mut rx);

        // Act: the payload claims to be somebody else
        let result = s.submit_keys(Some("u2"), &keys(&["red"])).await;

        // Assert: denied, lock and keyboard untouched
        assert_eq!(
            result,
            Err(SessionError::ControlDenied {
                owner: Some(ClientIdentity::parse("u1").unwrap())
            })
        );
        assert_eq!(ctx.current_state().await.unwrap(), KeyboardState::new_default(1));
        assert!(ctx.locks().current_owner().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acquire_reply_carries_ack_and_owner() {
        let ctx = ctx(1);
        let (s, mut rx) = SessionCoordinator::connect(ctx, Some("u1")).await.unwrap();
        drain(&mut rx);

        s.handle(ClientMessage::AcquireControl { ack: Some(4) })
            .await
            .unwrap();

        let owner = Some(ClientIdentity::parse("u1").unwrap());
        assert_eq!(
            drain(&mut rx),
            vec![
                ServerEvent::ControlGranted {
                    owner_id: owner.clone()
                },
                ServerEvent::Ack {
                    ack: Some(4),
                    success: true,
                    owner_id: owner,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_acquire_with_store_down_reports_error_and_failed_ack() {
        // Arrange: the store works for the connect snapshot, then fails
        let mut store = MockStateStore::new();
        store
            .expect_get_state()
            .returning(|| Ok(KeyboardState::new_default(10)));
        store.expect_get_lock().returning(|| Ok(None));
        store
            .expect_set_lock()
            .returning(|_, _| Err(StoreError::Unavailable("down".into())));
        let ctx = AppContext::new(ServerConfig::default(), Arc::new(store));
        let (s, mut rx) = SessionCoordinator::connect(ctx, Some("u1")).await.unwrap();
        drain(&mut rx);

        // Act
        let result = s.handle(ClientMessage::AcquireControl { ack: None }).await;

        // Assert
        assert!(matches!(result, Err(SessionError::StoreUnavailable(_))));
        let events = drain(&mut rx);
        assert!(matches!(
            &events[0],
            ServerEvent::Error {
                code: ErrorCode::StoreUnavailable,
                ..
            }
        ));
        assert_eq!(
            events[1],
            ServerEvent::Ack {
                ack: None,
                success: false,
                owner_id: None
            }
        );
    }

    #[tokio::test]
    async fn test_submit_with_store_write_failure_changes_nothing() {
        // Arrange: u1 holds control, the keyboard write fails
        let mut store = MockStateStore::new();
        store
            .expect_get_state()
            .returning(|| Ok(KeyboardState::new_default(10)));
        store.expect_get_lock().returning(|| {
            Ok(Some(LockRecord {
                owner_id: ClientIdentity::parse("u1").unwrap(),
                expires_at: std::time::SystemTime::now() + std::time::Duration::from_secs(120),
            }))
        });
        store.expect_set_lock().returning(|_, _| Ok(true));
        store
            .expect_set_state()
            .returning(|_| Err(StoreError::Unavailable("write refused".into())));
        store.expect_clear_lock().times(0);
        let ctx = AppContext::new(ServerConfig::default(), Arc::new(store));
        let (owner, mut owner_rx) = SessionCoordinator::connect(Arc::clone(&ctx), Some("u1"))
            .await
            .unwrap();
        let (_watcher, mut watcher_rx) = SessionCoordinator::connect(Arc::clone(&ctx), Some("u2"))
            .await
            .unwrap();
        owner.acquire_control().await.unwrap();
        drain(&mut owner_rx);
        drain(&mut watcher_rx);

        // Act
        let result = owner
            .handle(ClientMessage::UpdateKeys {
                user_id: Some("u1".into()),
                new_keys: vec!["red".to_string(); 10],
            })
            .await;

        // Assert: only the submitter hears about it, control stays with u1
        assert!(matches!(result, Err(SessionError::StoreUnavailable(_))));
        let events = drain(&mut owner_rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ServerEvent::Error {
                code: ErrorCode::StoreUnavailable,
                ..
            }
        ));
        assert!(drain(&mut watcher_rx).is_empty());
        assert_eq!(
            ctx.locks().current_owner().await.unwrap(),
            Some(ClientIdentity::parse("u1").unwrap())
        );
    }

    #[tokio::test]
    async fn test_padded_claimed_user_id_is_denied() {
        let ctx = ctx(1);
        let (s, _rx) = SessionCoordinator::connect(Arc::clone(&ctx), Some("u1"))
            .await
            .unwrap();
        s.acquire_control().await.unwrap();

        let result = s.submit_keys(Some(" u1"), &keys(&["red"])).await;

        assert!(matches!(result, Err(SessionError::ControlDenied { .. })));
        assert!(ctx.locks().current_owner().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_connect_with_padded_identity_is_rejected() {
        let result = SessionCoordinator::connect(ctx(1), Some("u1 ")).await;
        assert!(matches!(
            result,
            Err(SessionError::InvalidIdentity(
                IdentityError::SurroundingWhitespace
            ))
        ));
    }

    #[tokio::test]
    async fn test_bad_request_is_unicast() {
        let ctx = ctx(1);
        let (s1, mut rx1) = SessionCoordinator::connect(Arc::clone(&ctx), Some("u1"))
            .await
            .unwrap();
        let (_s2, mut rx2) = SessionCoordinator::connect(ctx, Some("u2")).await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        s1.report_bad_request("expected JSON").await;

        assert!(matches!(
            rx1.try_recv().unwrap(),
            ServerEvent::Error {
                code: ErrorCode::BadRequest,
                ..
            }
        ));
        assert!(rx2.try_recv().is_err());
    }
}
