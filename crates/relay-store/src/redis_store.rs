//! Redis-backed session store.
//!
//! Each session is one list at `{prefix}:{sessionId}` holding JSON-encoded
//! entries (`{"role","text","ts"}`). Appends are `RPUSH` + `EXPIRE` in one
//! atomic pipeline, so Redis handles idle expiry natively. Each operation
//! opens its own multiplexed connection, so a Redis restart only fails the
//! commands in flight.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use relay_core::{SessionId, TurnEntry};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::store::SessionStore;

/// [`SessionStore`] backed by Redis lists.
pub struct RedisSessionStore {
    client: redis::Client,
    key_prefix: String,
    ttl: Duration,
}

impl RedisSessionStore {
    /// Create a store from a connection URL. No connection is made until
    /// the first command.
    pub fn new(connection_url: &str, key_prefix: impl Into<String>, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(connection_url)?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            ttl,
        })
    }

    fn session_key(&self, session_id: &SessionId) -> String {
        format!("{}:{}", self.key_prefix, session_id)
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        debug!("opening redis connection");
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn append(&self, session_id: &SessionId, entry: &TurnEntry) -> Result<()> {
        let payload = serde_json::to_string(entry)?;
        let key = self.session_key(session_id);
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .rpush(&key, payload)
            .ignore()
            .expire(&key, ttl_secs(self.ttl))
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<TurnEntry>> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.lrange(self.session_key(session_id), 0, -1).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str::<TurnEntry>(&item) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "skipping undecodable transcript entry");
                }
            }
        }
        Ok(entries)
    }

    async fn clear(&self, session_id: &SessionId) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.session_key(session_id)).await?;
        Ok(())
    }

    async fn set_expiry(&self, session_id: &SessionId, ttl: Duration) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.expire::<_, ()>(self.session_key(session_id), ttl_secs(ttl))
            .await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
