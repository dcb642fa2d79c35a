//! The process-wide application context.
//!
//! One [`AppContext`] is built at startup and shared by every session behind
//! an `Arc`.  It owns the store handle, the broadcaster, and the lock manager;
//! nothing in the server reaches for a global.

use std::sync::Arc;

use keylock_core::KeyboardState;
use tracing::{info, warn};

use crate::application::broadcaster::StateBroadcaster;
use crate::application::lock_manager::LockManager;
use crate::application::store::{StateStore, StoreError};
use crate::domain::config::ServerConfig;

/// Shared services for every session.
pub struct AppContext {
    config: ServerConfig,
    store: Arc<dyn StateStore>,
    broadcaster: Arc<StateBroadcaster>,
    locks: Arc<LockManager>,
}

impl AppContext {
    /// Wires the services together around an already connected `store`.
    pub fn new(config: ServerConfig, store: Arc<dyn StateStore>) -> Arc<Self> {
        let broadcaster = Arc::new(StateBroadcaster::new(config.outbound_buffer));
        let locks = LockManager::new(Arc::clone(&store), Arc::clone(&broadcaster), config.lock_ttl);
        Arc::new(Self {
            config,
            store,
            broadcaster,
            locks,
        })
    }

    /// One-time startup work.  Resets the keyboard to all-white keys when
    /// `reset_state_on_start` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the reset could not be written.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        if self.config.reset_state_on_start {
            self.store
                .set_state(&KeyboardState::new_default(self.config.key_count))
                .await?;
            info!("keyboard reset to {} white keys", self.config.key_count);
        }
        Ok(())
    }

    /// Reads the keyboard from the store.
    ///
    /// A persisted keyboard that cannot be decoded is logged and replaced by
    /// the default in the reply; the store is left as is until the next
    /// accepted submission overwrites it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store could not be reached.
    pub async fn current_state(&self) -> Result<KeyboardState, StoreError> {
        match self.store.get_state().await {
            Ok(state) => Ok(state),
            Err(StoreError::Corrupt(detail)) => {
                warn!("serving default keyboard: {detail}");
                Ok(KeyboardState::new_default(self.config.key_count))
            }
            Err(e) => Err(e),
        }
    }

    /// Tears down background work before the process exits.
    pub async fn shutdown(&self) {
        self.locks.shutdown().await;
        info!("application context shut down");
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<StateBroadcaster> {
        &self.broadcaster
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
