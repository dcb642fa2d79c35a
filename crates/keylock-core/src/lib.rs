//! # keylock-core
//!
//! Shared library for Keylock containing the keyboard domain model, the client
//! identity rules, and the JSON wire protocol spoken between browsers and the
//! Keylock server.
//!
//! It has zero dependencies on async runtimes, network sockets, or storage
//! drivers.
//!
//! # Architecture overview (for beginners)
//!
//! Keylock lets many people look at the same row of coloured keys at once,
//! while only one of them at a time may change it.  Whoever wants to paint
//! the keys first asks for the *control lock*; the server grants it to at most
//! one client, takes it back after one submission, and expires it
//! automatically if the holder goes quiet.
//!
//! This crate (`keylock-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – The data that the whole system agrees on: the
//!   [`KeyboardState`] (a fixed-length row of [`KeyColor`]s), the
//!   [`ClientIdentity`] a connection presents, and the [`LockRecord`]
//!   describing who holds control and until when.
//!
//! - **`protocol`** – How those values travel over a WebSocket.  Messages are
//!   JSON objects tagged with an `"event"` field and are decoded into typed
//!   Rust enums on the other end.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `keylock_core::KeyboardState` instead of the longer module path.
pub use domain::identity::{ClientIdentity, IdentityError};
pub use domain::keyboard::{KeyColor, KeyValidationError, KeyboardState, DEFAULT_KEY_COUNT};
pub use domain::lock::{AcquireOutcome, LockRecord};
pub use protocol::codec::{decode_client_message, encode_event, ProtocolError};
pub use protocol::messages::{ClientMessage, ErrorCode, ServerEvent};
