//! Per-session turn serialization.
//!
//! One async mutex per session id, created on demand and removed from the
//! map once its last holder or waiter is gone.

use std::sync::Arc;

use dashmap::DashMap;
use relay_core::SessionId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map of session id to turn lock.
#[derive(Debug, Default)]
pub struct SessionLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    /// Empty lock map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `session_id`.
    ///
    /// Cancel-safe: dropping the future while waiting releases its claim.
    pub async fn acquire(&self, session_id: &SessionId) -> SessionTurnGuard<'_> {
        let mutex = Arc::clone(&*self.locks.entry(session_id.to_string()).or_default());
        let mut pending = SessionTurnGuard {
            locks: self,
            key: session_id.to_string(),
            mutex: Some(Arc::clone(&mutex)),
            guard: None,
        };
        pending.guard = Some(mutex.lock_owned().await);
        pending
    }

    /// Number of sessions with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no session is locked.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive hold on one session's turn lock.
#[derive(Debug)]
pub struct SessionTurnGuard<'a> {
    locks: &'a SessionLocks,
    key: String,
    mutex: Option<Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionTurnGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        drop(self.mutex.take());
        // Only the map's own reference left: nobody holds or waits.
        let _ = self
            .locks
            .locks
            .remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
    }
}
