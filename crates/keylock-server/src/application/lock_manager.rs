//! LockManager: acquire, release, and automatic expiry of the control lock.
//!
//! # State machine
//!
//! ```text
//!             acquire(id), store CAS succeeds
//!  Unlocked ───────────────────────────────────► Locked(id, timer)
//!     ▲                                              │
//!     │   release(id)  /  timer fires for this epoch │
//!     └──────────────────────────────────────────────┘
//!
//!  Locked(id) ── acquire(other) ──► Locked(id)      (denied, reports id)
//!  release/expiry for a non-owner or stale epoch    (no-op)
//! ```
//!
//! The store is the source of truth for *who* holds the lock.  This type only
//! keeps the in-memory [`Lease`] for the current epoch: the owner, its
//! generation number, and the handle of the pending expiry timer.
//!
//! # Serialisation of transitions
//!
//! Every transition runs inside one async critical section (`lease` mutex)
//! and announces itself through the [`StateBroadcaster`] before leaving it.
//! The order in which transitions complete is therefore the order in which
//! every session sees `controlGranted` / `controlReleased`.  The store calls
//! inside the section are still compare-and-set / compare-and-delete, so a
//! second server process sharing the same Redis keys cannot break mutual
//! exclusion either.
//!
//! # Expiry
//!
//! Acquiring starts a Tokio task that sleeps for the lock TTL and then calls
//! back into the manager with the generation it was started for.  The
//! callback is not authoritative: it only acts if that generation is still the
//! current lease, and it then compare-and-deletes in the store.  Releasing
//! aborts the task so a finished epoch leaves no timer behind.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use keylock_core::protocol::GenerationCounter;
use keylock_core::{AcquireOutcome, ClientIdentity, ServerEvent};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::application::broadcaster::StateBroadcaster;
use crate::application::store::{StateStore, StoreError};

/// In-memory bookkeeping for the current lock epoch.
#[derive(Debug)]
struct Lease {
    owner: ClientIdentity,
    generation: u64,
    expiry: AbortHandle,
}

/// Owns the control-lock transitions and their expiry timers.
pub struct LockManager {
    store: Arc<dyn StateStore>,
    broadcaster: Arc<StateBroadcaster>,
    ttl: Duration,
    generations: GenerationCounter,
    lease: Mutex<Option<Lease>>,
}

impl LockManager {
    /// Creates a manager with no lease.
    ///
    /// Returned in an `Arc` because expiry timers keep a weak reference back
    /// to the manager.
    pub fn new(
        store: Arc<dyn StateStore>,
        broadcaster: Arc<StateBroadcaster>,
        ttl: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            broadcaster,
            ttl,
            generations: GenerationCounter::new(),
            lease: Mutex::new(None),
        })
    }

    /// The configured lock lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Tries to take the control lock for `id`.
    ///
    /// On success the store holds the lock, an expiry timer is running, and
    /// `controlGranted(id)` has been queued for every session.  A denied
    /// attempt (including a repeat acquire by the current owner) reports the
    /// current owner and changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store could not be reached; nothing
    /// changed in that case.
    pub async fn acquire(self: &Arc<Self>, id: &ClientIdentity) -> Result<AcquireOutcome, StoreError> {
        let mut lease = self.lease.lock().await;

        if !self.store.set_lock(id, self.ttl).await? {
            let current_owner = self.store.get_lock().await?.map(|r| r.owner_id);
            debug!(
                "acquire by {id} denied; held by {}",
                current_owner.as_ref().map_or("nobody", |o| o.as_str())
            );
            return Ok(AcquireOutcome::denied(current_owner));
        }

        // A previous lease can only still be here if the store expired it
        // natively before its timer ran.  That epoch has not been announced
        // as over yet, and its timer must not outlive it.
        if let Some(stale) = lease.take() {
            stale.expiry.abort();
            self.broadcaster.notify_all(ServerEvent::ControlReleased).await;
            info!(
                "{} control lapsed in the store (generation {})",
                stale.owner, stale.generation
            );
        }

        let generation = self.generations.next();
        let expiry = self.spawn_expiry(id.clone(), generation);
        *lease = Some(Lease {
            owner: id.clone(),
            generation,
            expiry,
        });

        self.broadcaster
            .notify_all(ServerEvent::ControlGranted {
                owner_id: Some(id.clone()),
            })
            .await;
        info!("{id} acquired control (generation {generation})");
        Ok(AcquireOutcome::granted(id.clone()))
    }

    /// Releases the lock if `id` holds it.
    ///
    /// Returns `true` if this call ended `id`'s epoch, in which case
    /// `controlReleased` has been queued for every session.  Releasing a lock
    /// you do not hold is a no-op returning `false`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store could not be reached.
    pub async fn release(&self, id: &ClientIdentity) -> Result<bool, StoreError> {
        let mut lease = self.lease.lock().await;
        let ended = self.end_epoch(&mut lease, id, true).await?;
        if ended {
            info!("{id} released control");
        }
        Ok(ended)
    }

    /// The identity currently holding the lock, according to the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store could not be reached.
    pub async fn current_owner(&self) -> Result<Option<ClientIdentity>, StoreError> {
        Ok(self.store.get_lock().await?.map(|r| r.owner_id))
    }

    /// Runs `work` on behalf of the lock holder and then releases the lock.
    ///
    /// Ownership is checked against the store, `work` runs, and the epoch
    /// ends, all inside the transition critical section.  Anything `work`
    /// broadcasts is therefore delivered before the matching
    /// `controlReleased`, and no expiry or acquire can slip in between.
    ///
    /// Returns `Ok(Err(owner))` without running `work` if `id` is not the
    /// holder; `owner` is whoever is.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the ownership check or `work` failed.  If
    /// `work` fails the lock is left untouched.  A failed release after
    /// successful `work` is only logged: the lease and its timer stay in
    /// place, and the store drops the lock at its deadline.
    pub async fn complete_as_owner<F, Fut, T>(
        &self,
        id: &ClientIdentity,
        work: F,
    ) -> Result<Result<T, Option<ClientIdentity>>, StoreError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let mut lease = self.lease.lock().await;

        let owner = self.store.get_lock().await?.map(|r| r.owner_id);
        if owner.as_ref() != Some(id) {
            return Ok(Err(owner));
        }

        let output = work().await?;
        match self.end_epoch(&mut lease, id, true).await {
            Ok(true) => info!("{id} released control after submitting"),
            Ok(false) => {}
            Err(e) => warn!("{id} submitted but the release failed, lock will lapse: {e}"),
        }
        Ok(Ok(output))
    }

    /// Runs `work` with no lock transition able to interleave.
    ///
    /// Used to take a consistent snapshot for a newly connected session: no
    /// grant, release, or submission can complete between reading the store
    /// and registering the session.
    pub async fn exclusive<F, Fut, T>(&self, work: F) -> T
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        let _lease = self.lease.lock().await;
        work().await
    }

    /// Cancels the pending expiry timer, if any.  The store entry is left to
    /// its native expiry.
    pub async fn shutdown(&self) {
        if let Some(lease) = self.lease.lock().await.take() {
            lease.expiry.abort();
            debug!("cancelled expiry timer for {}", lease.owner);
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Ends `id`'s epoch.  Caller holds the `lease` mutex.
    ///
    /// `cancel_timer` is false when called from the timer task itself, which
    /// must not abort its own task mid-transition.
    ///
    /// The store entry is compare-and-deleted.  If the in-memory lease is
    /// `id`'s but the store already dropped the key (native expiry racing our
    /// timer), the epoch still ends here so that exactly one
    /// `controlReleased` is announced for it.
    async fn end_epoch(
        &self,
        lease: &mut Option<Lease>,
        id: &ClientIdentity,
        cancel_timer: bool,
    ) -> Result<bool, StoreError> {
        let cleared = self.store.clear_lock(id).await?;
        let leased = lease.as_ref().is_some_and(|l| l.owner == *id);

        let ended = cleared || (leased && self.store.get_lock().await?.is_none());
        if leased {
            if let Some(l) = lease.take() {
                if cancel_timer {
                    l.expiry.abort();
                }
            }
        }
        if ended {
            self.broadcaster.notify_all(ServerEvent::ControlReleased).await;
        }
        Ok(ended)
    }

    /// Called by the expiry timer of `generation`.
    async fn expire(&self, id: &ClientIdentity, generation: u64) -> Result<bool, StoreError> {
        let mut lease = self.lease.lock().await;
        match lease.as_ref() {
            Some(l) if l.generation == generation => {}
            _ => {
                debug!("ignoring stale expiry for {id} (generation {generation})");
                return Ok(false);
            }
        }
        let ended = self.end_epoch(&mut lease, id, false).await?;
        if ended {
            info!(
                "{id} control auto-released after {} seconds",
                self.ttl.as_secs()
            );
        }
        Ok(ended)
    }

    fn spawn_expiry(self: &Arc<Self>, id: ClientIdentity, generation: u64) -> AbortHandle {
        let manager: Weak<Self> = Arc::downgrade(self);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let Some(manager) = manager.upgrade() else {
                return;
            };
            if let Err(e) = manager.expire(&id, generation).await {
                warn!("expiry of {id} (generation {generation}) failed: {e}");
            }
        })
        .abort_handle()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
