//! The [`SessionStore`] trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::{SessionId, TurnEntry};

use crate::errors::Result;

/// Shared handle to a store backend.
pub type SessionStoreHandle = Arc<dyn SessionStore>;

/// Ordered, append-only transcript log keyed by session id.
///
/// Implementations must be safe under concurrent access from unrelated
/// sessions, and `append` must be atomic: a reader never observes a partial
/// entry. Appending to an unknown session creates it. Every append refreshes
/// the session's idle expiry to the backend's configured TTL.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Append one entry to the end of the session's log.
    async fn append(&self, session_id: &SessionId, entry: &TurnEntry) -> Result<()>;

    /// All entries in append order. Unknown or expired sessions yield an
    /// empty list.
    async fn list(&self, session_id: &SessionId) -> Result<Vec<TurnEntry>>;

    /// Remove every entry for the session.
    async fn clear(&self, session_id: &SessionId) -> Result<()>;

    /// Set the session's idle expiry to `ttl` from now.
    async fn set_expiry(&self, session_id: &SessionId, ttl: Duration) -> Result<()>;

    /// Start a fresh session: drop any prior log and arm its expiry.
    async fn create_session(&self, session_id: &SessionId, ttl: Duration) -> Result<()> {
        self.clear(session_id).await?;
        self.set_expiry(session_id, ttl).await
    }

    /// Evict sessions whose expiry has passed. Returns how many were removed.
    ///
    /// Backends with native expiry have nothing to do.
    async fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }

    /// Number of live sessions, when the backend can count them cheaply.
    async fn session_count(&self) -> Result<Option<usize>> {
        Ok(None)
    }

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;
}
