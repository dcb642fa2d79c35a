//! Infrastructure layer for keylock-server.
//!
//! Everything that touches the outside world: the two [`StateStore`]
//! backends and the WebSocket transport.
//!
//! # Responsibilities
//!
//! - Connecting the configured store backend
//! - Binding the TCP listener and running the accept loop
//! - The WebSocket handshake, including `userId` validation
//! - Per-connection reader and writer tasks
//! - Stopping when the shutdown flag is cleared
//!
//! # What does NOT belong here?
//!
//! - Lock rules and broadcast ordering (application layer)
//! - Configuration parsing (`main.rs` and `domain::config`)

pub mod memory_store;
pub mod redis_store;
pub mod ws_server;

use std::sync::Arc;

use tracing::info;

use crate::application::store::{StateStore, StoreError};
use crate::domain::config::{ServerConfig, StoreBackend};

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use ws_server::{run_server, serve};

/// Builds the store selected by `config.store`.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the Redis backend cannot be reached.
pub async fn connect_store(config: &ServerConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    let store: Arc<dyn StateStore> = match &config.store {
        StoreBackend::Memory => Arc::new(MemoryStore::new(config.key_count)),
        StoreBackend::Redis { url } => Arc::new(RedisStore::connect(url, config.key_count).await?),
    };
    info!("using {} store", config.store.name());
    Ok(store)
}
