//! Control-lock records.
//!
//! At most one [`LockRecord`] exists at any instant.  The shared store is the
//! single source of truth for it; these types only describe what the store
//! holds and what an acquire attempt produced.

use std::time::SystemTime;

use crate::domain::identity::ClientIdentity;

/// The current holder of the control lock and when the hold lapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    /// Identity of the client holding control.
    pub owner_id: ClientIdentity,
    /// Wall-clock instant at which the store drops the lock on its own.
    pub expires_at: SystemTime,
}

/// Result of a single acquire attempt.
///
/// A denied attempt is not an error: it carries the identity of whoever holds
/// the lock so the caller can tell the user who to wait for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireOutcome {
    /// `true` if this attempt created the lock.
    pub granted: bool,
    /// The lock holder after the attempt, if any.
    pub current_owner: Option<ClientIdentity>,
}

impl AcquireOutcome {
    /// A successful acquire by `owner`.
    pub fn granted(owner: ClientIdentity) -> Self {
        Self {
            granted: true,
            current_owner: Some(owner),
        }
    }

    /// A rejected acquire; `current_owner` is who holds the lock now.
    pub fn denied(current_owner: Option<ClientIdentity>) -> Self {
        Self {
            granted: false,
            current_owner,
        }
    }
}
