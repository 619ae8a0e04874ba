//! In-memory session store.
//!
//! Transcripts live in a `HashMap` behind a `parking_lot::RwLock`. Expired
//! sessions are dropped lazily when touched and in bulk by
//! [`SessionStore::purge_expired`]. Nothing survives a restart.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_core::{SessionId, TurnEntry};
use tokio::time::Instant;

use crate::errors::Result;
use crate::store::SessionStore;

#[derive(Debug)]
struct SessionLog {
    entries: Vec<TurnEntry>,
    expires_at: Instant,
}

impl SessionLog {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Process-local [`SessionStore`].
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, SessionLog>>,
    ttl: Duration,
}

impl MemorySessionStore {
    /// Store whose appends refresh expiry to `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn append(&self, session_id: &SessionId, entry: &TurnEntry) -> Result<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let log = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog {
                entries: Vec::new(),
                expires_at: now,
            });
        if log.is_expired(now) {
            log.entries.clear();
        }
        log.entries.push(entry.clone());
        log.expires_at = now + self.ttl;
        Ok(())
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<TurnEntry>> {
        let now = Instant::now();
        {
            let sessions = self.sessions.read();
            match sessions.get(session_id.as_str()) {
                None => return Ok(Vec::new()),
                Some(log) if !log.is_expired(now) => return Ok(log.entries.clone()),
                Some(_) => {}
            }
        }
        let mut sessions = self.sessions.write();
        if sessions
            .get(session_id.as_str())
            .is_some_and(|log| log.is_expired(now))
        {
            let _ = sessions.remove(session_id.as_str());
        }
        Ok(Vec::new())
    }

    async fn clear(&self, session_id: &SessionId) -> Result<()> {
        let _ = self.sessions.write().remove(session_id.as_str());
        Ok(())
    }

    async fn set_expiry(&self, session_id: &SessionId, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let log = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionLog {
                entries: Vec::new(),
                expires_at: now,
            });
        if log.is_expired(now) {
            log.entries.clear();
        }
        log.expires_at = now + ttl;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, log| !log.is_expired(now));
        Ok(before - sessions.len())
    }

    async fn session_count(&self) -> Result<Option<usize>> {
        let now = Instant::now();
        let sessions = self.sessions.read();
        Ok(Some(
            sessions.values().filter(|log| !log.is_expired(now)).count(),
        ))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
