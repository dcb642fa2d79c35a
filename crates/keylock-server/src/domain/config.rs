//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for all runtime settings.
//! It is assembled in `main.rs` from an optional TOML file ([`FileConfig`])
//! and the CLI, or taken from [`ServerConfig::default`] in tests and local
//! development.
//!
//! # Config file
//!
//! Every field is optional; anything left out falls back to the CLI value or
//! the built-in default.
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:5000"
//! log_level = "info"
//! outbound_buffer = 128
//!
//! [store]
//! backend = "redis"
//! redis_url = "redis://127.0.0.1/"
//!
//! [keyboard]
//! key_count = 10
//! lock_ttl_secs = 120
//! reset_state_on_start = true
//! ```
//!
//! # Lock lifetime
//!
//! [`ServerConfig::lock_ttl`] is used both as the store-native expiry of the
//! lock entry and as the delay of the lock manager's expiry timer.  Keeping
//! one value means the two can never drift apart.

use std::net::SocketAddr;
use std::time::Duration;

use keylock_core::DEFAULT_KEY_COUNT;
use serde::Deserialize;
use thiserror::Error;

/// Default lifetime of a control lock.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(120);

/// Default per-session outbound queue capacity.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 128;

/// Default listen address.  Port 5000 is what existing browser clients use.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";

/// Default Redis connection URL.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1/";

/// Errors from assembling or validating a [`ServerConfig`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid bind address {0:?}")]
    InvalidBindAddr(String),
    #[error("unknown store backend {0:?} (expected \"memory\" or \"redis\")")]
    UnknownBackend(String),
    #[error("key_count must be at least 1")]
    ZeroKeyCount,
    #[error("lock TTL must be at least one second")]
    ZeroLockTtl,
    #[error("outbound_buffer must be at least 1")]
    ZeroOutboundBuffer,
    #[error("config file is not valid TOML: {0}")]
    InvalidFile(String),
}

/// Which shared store implementation backs the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    /// In-process store.  State lives as long as the process.
    Memory,
    /// Redis server at `url`.  State survives restarts of this process.
    Redis { url: String },
}

impl StoreBackend {
    /// Builds a backend from its config/CLI name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownBackend`] for anything other than
    /// `"memory"` or `"redis"`.
    pub fn from_name(name: &str, redis_url: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis {
                url: redis_url.to_string(),
            }),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }

    /// Short name for log lines.  Never includes the URL, which may carry a
    /// password.
    pub fn name(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Redis { .. } => "redis",
        }
    }
}

/// All runtime configuration for the server.
///
/// Build this struct once at startup and share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    /// Shared store implementation.
    pub store: StoreBackend,
    /// Lifetime of a control lock (store expiry and timer delay).
    pub lock_ttl: Duration,
    /// Number of keys on the keyboard.
    pub key_count: usize,
    /// Overwrite the stored keyboard with all-white keys on startup.
    pub reset_state_on_start: bool,
    /// Per-session outbound queue capacity before the session is evicted.
    pub outbound_buffer: usize,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl ServerConfig {
    /// Checks cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_count == 0 {
            return Err(ConfigError::ZeroKeyCount);
        }
        if self.lock_ttl < Duration::from_secs(1) {
            return Err(ConfigError::ZeroLockTtl);
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::ZeroOutboundBuffer);
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    /// | Field                 | Default          |
    /// |-----------------------|------------------|
    /// | bind_addr             | `0.0.0.0:5000`   |
    /// | store                 | memory           |
    /// | lock_ttl              | 120 seconds      |
    /// | key_count             | 10               |
    /// | reset_state_on_start  | `true`           |
    /// | outbound_buffer       | 128              |
    /// | log_level             | `info`           |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            store: StoreBackend::Memory,
            lock_ttl: DEFAULT_LOCK_TTL,
            key_count: DEFAULT_KEY_COUNT,
            reset_state_on_start: true,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            log_level: "info".to_string(),
        }
    }
}

// ── Config file schema ────────────────────────────────────────────────────────

/// `[server]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub bind: Option<String>,
    pub log_level: Option<String>,
    pub outbound_buffer: Option<usize>,
}

/// `[store]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub backend: Option<String>,
    pub redis_url: Option<String>,
}

/// `[keyboard]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeyboardSection {
    pub key_count: Option<usize>,
    pub lock_ttl_secs: Option<u64>,
    pub reset_state_on_start: Option<bool>,
}

/// Parsed contents of the optional TOML config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub server: ServerSection,
    pub store: StoreSection,
    pub keyboard: KeyboardSection,
}

impl FileConfig {
    /// Parses a config file body.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidFile`] for malformed TOML or unknown keys.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::InvalidFile(e.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
