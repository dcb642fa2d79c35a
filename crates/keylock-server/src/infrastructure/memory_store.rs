//! In-process [`StateStore`] with native lock expiry.
//!
//! All state sits behind one `tokio::sync::Mutex`, so every trait method is a
//! single critical section.  That is what makes `set_lock` a real
//! compare-and-set and `clear_lock` a real compare-and-delete.
//!
//! Expiry deadlines use `tokio::time::Instant`, which follows Tokio's paused
//! clock in tests.  An expired entry is treated as absent and removed lazily
//! by whichever call notices it first.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use keylock_core::{ClientIdentity, KeyboardState, LockRecord};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::application::store::{StateStore, StoreError};

#[derive(Debug)]
struct StoredLock {
    owner: ClientIdentity,
    deadline: Instant,
    expires_at: SystemTime,
}

impl StoredLock {
    fn is_live(&self, now: Instant) -> bool {
        now < self.deadline
    }
}

#[derive(Debug)]
struct Inner {
    state: Option<KeyboardState>,
    lock: Option<StoredLock>,
}

impl Inner {
    /// Drops the lock if it has expired and returns the live one, if any.
    fn live_lock(&mut self, now: Instant) -> Option<&StoredLock> {
        if self.lock.as_ref().is_some_and(|l| !l.is_live(now)) {
            self.lock = None;
        }
        self.lock.as_ref()
    }
}

/// Process-local store.  State lives only as long as the process.
#[derive(Debug)]
pub struct MemoryStore {
    key_count: usize,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store whose default keyboard has `key_count` keys.
    pub fn new(key_count: usize) -> Self {
        Self {
            key_count,
            inner: Mutex::new(Inner {
                state: None,
                lock: None,
            }),
        }
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_state(&self) -> Result<KeyboardState, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .state
            .clone()
            .unwrap_or_else(|| KeyboardState::new_default(self.key_count)))
    }

    async fn set_state(&self, state: &KeyboardState) -> Result<(), StoreError> {
        self.inner.lock().await.state = Some(state.clone());
        Ok(())
    }

    async fn get_lock(&self) -> Result<Option<LockRecord>, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.live_lock(Instant::now()).map(|l| LockRecord {
            owner_id: l.owner.clone(),
            expires_at: l.expires_at,
        }))
    }

    async fn set_lock(&self, owner: &ClientIdentity, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if inner.live_lock(now).is_some() {
            return Ok(false);
        }
        inner.lock = Some(StoredLock {
            owner: owner.clone(),
            deadline: now + ttl,
            expires_at: SystemTime::now() + ttl,
        });
        Ok(true)
    }

    async fn clear_lock(&self, owner: &ClientIdentity) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let owned = inner
            .live_lock(Instant::now())
            .is_some_and(|lock| lock.owner == *owner);
        if owned {
            inner.lock = None;
        }
        Ok(owned)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
