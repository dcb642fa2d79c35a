//! Domain layer for keylock-server.
//!
//! Server-only types with no I/O: the runtime configuration and its
//! validation rules.  The keyboard, identity, and lock types shared with
//! clients live in `keylock-core`.

pub mod config;

pub use config::{ConfigError, FileConfig, ServerConfig, StoreBackend};
