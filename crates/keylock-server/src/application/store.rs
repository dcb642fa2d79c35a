//! The shared state store contract.
//!
//! [`StateStore`] is the single source of truth for the keyboard row and the
//! control lock.  Everything else in the server (lock manager, sessions,
//! broadcaster) is stateless with respect to *who holds control*; they always
//! ask the store.
//!
//! # Atomicity requirements
//!
//! [`StateStore::set_lock`] and [`StateStore::clear_lock`] must each be one
//! indivisible operation against the backing store: a compare-and-set
//! against "no lock", and a compare-and-delete against "owned by this id".
//! A read followed by a separate write would let two acquirers both win, or
//! let a late release delete a lock somebody else acquired in between.
//!
//! Implementations live in the infrastructure layer
//! (`infrastructure::memory_store`, `infrastructure::redis_store`).

use std::time::Duration;

use async_trait::async_trait;
use keylock_core::{ClientIdentity, KeyboardState, LockRecord};
use thiserror::Error;

/// Errors a store operation can report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.  The operation had no effect.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The persisted keyboard could not be decoded, or has the wrong length.
    #[error("stored keyboard state is corrupt: {0}")]
    Corrupt(String),
}

/// Storage for the keyboard row and the control lock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the current keyboard, or the all-white default if none is
    /// stored yet.
    async fn get_state(&self) -> Result<KeyboardState, StoreError>;

    /// Replaces the whole keyboard.  Visible to the next `get_state` call.
    async fn set_state(&self, state: &KeyboardState) -> Result<(), StoreError>;

    /// Returns the current lock, or `None` if there is none or it expired.
    async fn get_lock(&self) -> Result<Option<LockRecord>, StoreError>;

    /// Creates the lock for `owner` with lifetime `ttl`, only if no lock
    /// exists.  Returns whether the lock was created.
    async fn set_lock(&self, owner: &ClientIdentity, ttl: Duration) -> Result<bool, StoreError>;

    /// Deletes the lock only if `owner` holds it.  Returns whether a lock was
    /// deleted.
    async fn clear_lock(&self, owner: &ClientIdentity) -> Result<bool, StoreError>;
}
