//! Application layer for keylock-server.
//!
//! The application layer owns the rules of the shared keyboard: who may take
//! control, when control lapses, who hears about it, and what a session may
//! submit.  It knows *what* to do and delegates storage to a [`StateStore`]
//! implementation from the infrastructure layer.
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or parsing WebSocket frames (infrastructure)
//! - Choosing or connecting a store backend (infrastructure)
//! - Reading CLI flags or config files (`main.rs`)

pub mod broadcaster;
pub mod context;
pub mod lock_manager;
pub mod session;
pub mod store;

pub use broadcaster::{SessionId, StateBroadcaster};
pub use context::AppContext;
pub use lock_manager::LockManager;
pub use session::{SessionCoordinator, SessionError};
pub use store::{StateStore, StoreError};
