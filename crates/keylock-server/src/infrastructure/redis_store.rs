//! Redis-backed [`StateStore`].
//!
//! # Persisted layout
//!
//! | Key              | Value                                  | Expiry          |
//! |------------------|----------------------------------------|-----------------|
//! | `keyboard_state` | JSON array of colour names             | none            |
//! | `keyboard_lock`  | lock owner id (plain string)           | lock TTL (PX)   |
//!
//! # Atomicity
//!
//! - Acquire is `SET keyboard_lock <owner> NX PX <ttl_ms>`: Redis creates the
//!   key only if it is absent, in one command.
//! - Release is a Lua script that compares the stored owner and deletes the
//!   key in one server-side step.  Redis runs scripts without interleaving
//!   other commands, so no other client can acquire between the compare and
//!   the delete.
//! - `get_lock` reads the owner and its remaining TTL in a `MULTI`/`EXEC`
//!   pipeline so both values describe the same instant.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use keylock_core::{ClientIdentity, KeyboardState, LockRecord};
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::application::store::{StateStore, StoreError};

/// Key holding the JSON-encoded keyboard row.
pub const STATE_KEY: &str = "keyboard_state";

/// Key holding the current lock owner id.
pub const LOCK_KEY: &str = "keyboard_lock";

/// Deletes `KEYS[1]` only if its value equals `ARGV[1]`.  Returns 1 or 0.
const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

/// Store backed by a single Redis server.
///
/// Holds one [`ConnectionManager`]: a multiplexed connection that reconnects
/// on its own after the server goes away.  Every operation clones the handle,
/// which pipelines requests over the same socket.  While Redis is down each
/// call fails with [`StoreError::Unavailable`]; nothing is retried here.
pub struct RedisStore {
    conn: ConnectionManager,
    key_count: usize,
    compare_and_delete: redis::Script,
}

impl RedisStore {
    /// Connects to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str, key_count: usize) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to redis store");
        Ok(Self {
            conn,
            key_count,
            compare_and_delete: redis::Script::new(COMPARE_AND_DELETE),
        })
    }

    /// Decodes a persisted keyboard, checking it matches the configured length.
    fn decode_state(&self, raw: &str) -> Result<KeyboardState, StoreError> {
        let state: KeyboardState =
            serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if state.len() != self.key_count {
            return Err(StoreError::Corrupt(format!(
                "expected {} keys, found {}",
                self.key_count,
                state.len()
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get_state(&self) -> Result<KeyboardState, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(STATE_KEY).query_async(&mut conn).await?;
        match raw {
            Some(raw) => self.decode_state(&raw),
            None => Ok(KeyboardState::new_default(self.key_count)),
        }
    }

    async fn set_state(&self, state: &KeyboardState) -> Result<(), StoreError> {
        let encoded =
            serde_json::to_string(state).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(STATE_KEY)
            .arg(encoded)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_lock(&self) -> Result<Option<LockRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let (owner, pttl_ms): (Option<String>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(LOCK_KEY)
            .cmd("PTTL")
            .arg(LOCK_KEY)
            .query_async(&mut conn)
            .await?;

        let Some(owner) = owner else {
            return Ok(None);
        };
        let owner_id = ClientIdentity::parse(&owner)
            .map_err(|e| StoreError::Corrupt(format!("lock owner: {e}")))?;

        // PTTL is -1 for a key without expiry; report that as "now" rather
        // than inventing a deadline.
        let remaining = Duration::from_millis(u64::try_from(pttl_ms).unwrap_or(0));
        Ok(Some(LockRecord {
            owner_id,
            expires_at: SystemTime::now() + remaining,
        }))
    }

    async fn set_lock(&self, owner: &ClientIdentity, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let reply: Option<String> = redis::cmd("SET")
            .arg(LOCK_KEY)
            .arg(owner.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        debug!("redis SET NX for {owner}: {reply:?}");
        Ok(reply.is_some())
    }

    async fn clear_lock(&self, owner: &ClientIdentity) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(LOCK_KEY)
            .arg(owner.as_str())
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
//
// These need a reachable Redis server and are skipped by default.  Run with:
//
//     KEYLOCK_TEST_REDIS_URL=redis://127.0.0.1/ cargo test -p keylock-server -- --ignored
