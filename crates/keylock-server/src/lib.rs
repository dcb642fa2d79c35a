//! keylock-server library crate.
//!
//! A shared keyboard served over WebSocket: every browser sees the same row
//! of coloured keys, one client at a time may take control and submit a new
//! row, and control lapses on its own after the lock TTL.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (JSON over WebSocket, ?userId=...)
//!         ↕
//! [keylock-server]
//!   ├── domain/           ServerConfig, config file schema
//!   ├── application/
//!   │     ├── session/      per-connection SessionCoordinator
//!   │     ├── lock_manager/ acquire / release / expiry timers
//!   │     ├── broadcaster/  fan-out to every session
//!   │     ├── store/        StateStore trait
//!   │     └── context/      AppContext (one per process)
//!   └── infrastructure/
//!         ├── ws_server/    accept loop, handshake, reader/writer tasks
//!         ├── memory_store/ in-process StateStore
//!         └── redis_store/  Redis StateStore (SET NX PX + Lua CAS delete)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain`, `keylock-core`, and the
//!   [`application::StateStore`] trait; never on a concrete backend.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`
//!   and `redis`.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: lock, broadcast, and session rules.
pub mod application;

/// Infrastructure layer: store backends and the WebSocket server.
pub mod infrastructure;
