//! Keylock shared keyboard server, entry point.
//!
//! Serves one shared row of coloured keys to any number of browsers over
//! WebSocket.  A browser takes control with `acquireControl`, submits a new
//! row with `updateKeys`, and control returns to everyone after the
//! submission or after the lock TTL (120 s by default).
//!
//! # Usage
//!
//! ```text
//! keylock-server [OPTIONS]
//!
//! Options:
//!   --bind <ADDR>           Listen address [default: 0.0.0.0:5000]
//!   --store <BACKEND>       memory | redis [default: memory]
//!   --redis-url <URL>       Redis URL [default: redis://127.0.0.1/]
//!   --lock-ttl-secs <SECS>  Control lock lifetime [default: 120]
//!   --key-count <N>         Keys on the keyboard [default: 10]
//!   --config <PATH>         Optional TOML config file
//!   --log-level <FILTER>    Log filter when RUST_LOG is unset [default: info]
//! ```
//!
//! # Precedence
//!
//! Command line / environment variable, then config file, then built-in
//! default.
//!
//! | Variable                 | Flag              |
//! |--------------------------|-------------------|
//! | `KEYLOCK_BIND`           | `--bind`          |
//! | `KEYLOCK_STORE`          | `--store`         |
//! | `KEYLOCK_REDIS_URL`      | `--redis-url`     |
//! | `KEYLOCK_LOCK_TTL_SECS`  | `--lock-ttl-secs` |
//! | `KEYLOCK_KEY_COUNT`      | `--key-count`     |
//! | `KEYLOCK_CONFIG`         | `--config`        |
//! | `KEYLOCK_LOG_LEVEL`      | `--log-level`     |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keylock_server::application::AppContext;
use keylock_server::domain::config::{
    ConfigError, FileConfig, ServerConfig, StoreBackend, DEFAULT_REDIS_URL,
};
use keylock_server::infrastructure::{connect_store, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Shared keyboard server with an exclusive, auto-expiring control lock.
///
/// Every option is optional so that a value left out can come from the
/// config file.
#[derive(Debug, Default, Parser)]
#[command(
    name = "keylock-server",
    about = "Shared keyboard server with an exclusive, auto-expiring control lock",
    version
)]
struct Cli {
    /// Address the WebSocket listener binds to, e.g. `0.0.0.0:5000`.
    #[arg(long, env = "KEYLOCK_BIND")]
    bind: Option<String>,

    /// Store backend: `memory` or `redis`.
    #[arg(long, env = "KEYLOCK_STORE")]
    store: Option<String>,

    /// Redis connection URL, used with `--store redis`.
    #[arg(long, env = "KEYLOCK_REDIS_URL")]
    redis_url: Option<String>,

    /// Lifetime of a control lock in seconds.
    #[arg(long, env = "KEYLOCK_LOCK_TTL_SECS")]
    lock_ttl_secs: Option<u64>,

    /// Number of keys on the shared keyboard.
    #[arg(long, env = "KEYLOCK_KEY_COUNT")]
    key_count: Option<usize>,

    /// Path to a TOML config file.
    #[arg(long, env = "KEYLOCK_CONFIG")]
    config: Option<PathBuf>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[arg(long, env = "KEYLOCK_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Reads the config file named by `--config`, if any.
    fn load_file(&self) -> anyhow::Result<FileConfig> {
        let Some(path) = &self.config else {
            return Ok(FileConfig::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        FileConfig::from_toml_str(&raw)
            .with_context(|| format!("cannot parse config file {}", path.display()))
    }

    /// Merges the CLI over `file` over the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an unparsable bind address, an unknown
    /// backend, or a value that fails [`ServerConfig::validate`].
    fn into_server_config(self, file: FileConfig) -> Result<ServerConfig, ConfigError> {
        let defaults = ServerConfig::default();

        let bind_addr = match self.bind.or(file.server.bind) {
            Some(raw) => raw
                .parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidBindAddr(raw))?,
            None => defaults.bind_addr,
        };

        let redis_url = self
            .redis_url
            .or(file.store.redis_url)
            .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
        let store = match self.store.or(file.store.backend) {
            Some(name) => StoreBackend::from_name(&name, &redis_url)?,
            None => defaults.store,
        };

        let config = ServerConfig {
            bind_addr,
            store,
            lock_ttl: self
                .lock_ttl_secs
                .or(file.keyboard.lock_ttl_secs)
                .map_or(defaults.lock_ttl, Duration::from_secs),
            key_count: self
                .key_count
                .or(file.keyboard.key_count)
                .unwrap_or(defaults.key_count),
            reset_state_on_start: file
                .keyboard
                .reset_state_on_start
                .unwrap_or(defaults.reset_state_on_start),
            outbound_buffer: file
                .server
                .outbound_buffer
                .unwrap_or(defaults.outbound_buffer),
            log_level: self
                .log_level
                .or(file.server.log_level)
                .unwrap_or(defaults.log_level),
        };
        config.validate()?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// 1. Parse the CLI and the optional config file into a [`ServerConfig`].
/// 2. Install the `tracing` subscriber (`RUST_LOG`, else `log_level`).
/// 3. Connect the store, build the [`AppContext`], and run its startup work.
/// 4. Spawn a Ctrl+C handler that clears the shared `running` flag.
/// 5. Serve until the flag is cleared, then shut the context down.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = cli.load_file()?;
    let config = cli.into_server_config(file)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "keylock server starting: bind={}, store={}, keys={}, lock_ttl={}s",
        config.bind_addr,
        config.store.name(),
        config.key_count,
        config.lock_ttl.as_secs()
    );

    let store = connect_store(&config)
        .await
        .context("failed to connect the state store")?;
    let ctx = AppContext::new(config, store);
    ctx.initialize()
        .await
        .context("failed to initialise keyboard state")?;

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    let served = run_server(Arc::clone(&ctx), running).await;
    ctx.shutdown().await;
    served?;

    info!("keylock server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_without_flags_parses() {
        assert!(Cli::try_parse_from(["keylock-server"]).is_ok());
    }

    #[test]
    fn test_cli_parses_flags() {
        let cli = Cli::try_parse_from([
            "keylock-server",
            "--bind",
            "127.0.0.1:9000",
            "--store",
            "redis",
            "--lock-ttl-secs",
            "30",
            "--key-count",
            "4",
        ])
        .unwrap();

        assert_eq!(cli.bind.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(cli.store.as_deref(), Some("redis"));
        assert_eq!(cli.lock_ttl_secs, Some(30));
        assert_eq!(cli.key_count, Some(4));
    }

    #[test]
    fn test_cli_rejects_non_numeric_ttl() {
        assert!(Cli::try_parse_from(["keylock-server", "--lock-ttl-secs", "soon"]).is_err());
    }

    #[test]
    fn test_into_server_config_defaults() {
        // Arrange: nothing on the command line, empty file
        let cli = Cli::default();

        // Act
        let config = cli.into_server_config(FileConfig::default()).unwrap();

        // Assert
        assert_eq!(config.bind_addr.port(), 5000);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.lock_ttl, Duration::from_secs(120));
        assert_eq!(config.key_count, 10);
        assert!(config.reset_state_on_start);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_into_server_config_file_fills_gaps() {
        let file = FileConfig::from_toml_str(
            r#"
            [store]
            backend = "redis"
            redis_url = "redis://cache:6379/"

            [keyboard]
            key_count = 6
            reset_state_on_start = false
            "#,
        )
        .unwrap();

        let config = Cli::default().into_server_config(file).unwrap();

        assert_eq!(
            config.store,
            StoreBackend::Redis {
                url: "redis://cache:6379/".to_string()
            }
        );
        assert_eq!(config.key_count, 6);
        assert!(!config.reset_state_on_start);
    }

    #[test]
    fn test_into_server_config_cli_overrides_file() {
        let file = FileConfig::from_toml_str("[keyboard]\nlock_ttl_secs = 30\nkey_count = 6\n")
            .unwrap();
        let cli = Cli {
            lock_ttl_secs: Some(60),
            ..Cli::default()
        };

        let config = cli.into_server_config(file).unwrap();

        assert_eq!(config.lock_ttl, Duration::from_secs(60));
        assert_eq!(config.key_count, 6);
    }

    #[test]
    fn test_into_server_config_invalid_bind_returns_error() {
        let cli = Cli {
            bind: Some("not.an.addr".to_string()),
            ..Cli::default()
        };

        let result = cli.into_server_config(FileConfig::default());

        assert_eq!(
            result.unwrap_err(),
            ConfigError::InvalidBindAddr("not.an.addr".to_string())
        );
    }

    #[test]
    fn test_into_server_config_rejects_zero_keys() {
        let cli = Cli {
            key_count: Some(0),
            ..Cli::default()
        };
        assert_eq!(
            cli.into_server_config(FileConfig::default()).unwrap_err(),
            ConfigError::ZeroKeyCount
        );
    }

    #[test]
    fn test_into_server_config_unknown_backend() {
        let cli = Cli {
            store: Some("etcd".to_string()),
            ..Cli::default()
        };
        assert!(matches!(
            cli.into_server_config(FileConfig::default()),
            Err(ConfigError::UnknownBackend(_))
        ));
    }
}
