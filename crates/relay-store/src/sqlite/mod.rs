//! `SQLite`-backed session store.
//!
//! Two tables: `sessions` (id + expiry deadline in epoch milliseconds) and
//! `entries` (autoincrement `seq` gives append order). Every write runs in a
//! single transaction on a blocking thread so callers never observe a
//! partial append.

pub mod connection;
pub mod migrations;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{Role, SessionId, TurnEntry};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::errors::{Result, StoreError};
use crate::store::SessionStore;
use connection::{ConnectionConfig, ConnectionPool};

/// [`SessionStore`] persisted to a `SQLite` database.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: ConnectionPool,
    ttl: Duration,
}

impl SqliteSessionStore {
    /// Open (or create) a database file and apply migrations.
    pub fn open(path: &Path, ttl: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Internal(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let path_str = path.to_string_lossy();
        let pool = connection::new_file(&path_str, &ConnectionConfig::default())?;
        info!(path = %path_str, "opened sqlite session store");
        Self::with_pool(pool, ttl)
    }

    /// Private in-memory database.
    pub fn in_memory(ttl: Duration) -> Result<Self> {
        let pool = connection::new_in_memory(&ConnectionConfig::default())?;
        Self::with_pool(pool, ttl)
    }

    fn with_pool(pool: ConnectionPool, ttl: Duration) -> Result<Self> {
        let conn = pool.get()?;
        let applied = migrations::run_migrations(&conn)?;
        debug!(applied, "session store schema ready");
        drop(conn);
        Ok(Self { pool, ttl })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Internal(format!("blocking store task failed: {e}")))?
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn deadline(now: i64, ttl: Duration) -> i64 {
    now.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn parse_role(value: &str) -> Result<Role> {
    match value {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => Err(StoreError::Internal(format!("unknown role in store: {other}"))),
    }
}

fn upsert_expiry(conn: &Connection, id: &str, expires_at: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO sessions (id, expires_at) VALUES (?1, ?2)
         ON CONFLICT(id) DO UPDATE SET expires_at = excluded.expires_at",
        params![id, expires_at],
    )
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn append(&self, session_id: &SessionId, entry: &TurnEntry) -> Result<()> {
        let id = session_id.to_string();
        let entry = entry.clone();
        let ttl = self.ttl;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = now_ms();
            let expired: bool = tx
                .query_row(
                    "SELECT expires_at <= ?2 FROM sessions WHERE id = ?1",
                    params![id, now],
                    |row| row.get(0),
                )
                .optional()?
                .unwrap_or(false);
            if expired {
                let _ = tx.execute("DELETE FROM entries WHERE session_id = ?1", [&id])?;
            }
            let _ = upsert_expiry(&tx, &id, deadline(now, ttl))?;
            let _ = tx.execute(
                "INSERT INTO entries (session_id, role, text, ts) VALUES (?1, ?2, ?3, ?4)",
                params![
                    id,
                    entry.role.as_str(),
                    entry.text,
                    entry.created_at.timestamp_millis()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list(&self, session_id: &SessionId) -> Result<Vec<TurnEntry>> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let now = now_ms();
            let expires_at: Option<i64> = conn
                .query_row(
                    "SELECT expires_at FROM sessions WHERE id = ?1",
                    [&id],
                    |row| row.get(0),
                )
                .optional()?;
            match expires_at {
                None => return Ok(Vec::new()),
                Some(at) if at <= now => {
                    let _ = conn.execute("DELETE FROM sessions WHERE id = ?1", [&id])?;
                    return Ok(Vec::new());
                }
                Some(_) => {}
            }

            let mut stmt = conn.prepare_cached(
                "SELECT role, text, ts FROM entries WHERE session_id = ?1 ORDER BY seq ASC",
            )?;
            let rows = stmt.query_map([&id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut entries = Vec::new();
            for row in rows {
                let (role, text, ts) = row?;
                let created_at = DateTime::from_timestamp_millis(ts)
                    .ok_or_else(|| StoreError::Internal(format!("invalid timestamp: {ts}")))?;
                entries.push(TurnEntry {
                    role: parse_role(&role)?,
                    text,
                    created_at,
                });
            }
            Ok(entries)
        })
        .await
    }

    async fn clear(&self, session_id: &SessionId) -> Result<()> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let _ = tx.execute("DELETE FROM entries WHERE session_id = ?1", [&id])?;
            let _ = tx.execute("DELETE FROM sessions WHERE id = ?1", [&id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn set_expiry(&self, session_id: &SessionId, ttl: Duration) -> Result<()> {
        let id = session_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = now_ms();
            let _ = tx.execute(
                "DELETE FROM entries WHERE session_id IN
                   (SELECT id FROM sessions WHERE id = ?1 AND expires_at <= ?2)",
                params![id, now],
            )?;
            let _ = upsert_expiry(&tx, &id, deadline(now, ttl))?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let now = now_ms();
            let _ = tx.execute(
                "DELETE FROM entries WHERE session_id IN
                   (SELECT id FROM sessions WHERE expires_at <= ?1)",
                [now],
            )?;
            let removed = tx.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn session_count(&self) -> Result<Option<usize>> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE expires_at > ?1",
                [now_ms()],
                |row| row.get(0),
            )?;
            Ok(Some(usize::try_from(count).unwrap_or(0)))
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(86_400);

    fn store() -> SqliteSessionStore {
        SqliteSessionStore::in_memory(DAY).unwrap()
    }

    #[tokio::test]
    async fn append_then_list_preserves_order_and_content() {
        let store = store();
        let s = SessionId::from("s1");
        let user = TurnEntry::user("What is the capital of France?");
        let assistant = TurnEntry::assistant("Paris is the capital.");
        store.append(&s, &user).await.unwrap();
        store.append(&s, &assistant).await.unwrap();

        let entries = store.list(&s).await.unwrap();
        assert_eq!(entries, vec![user, assistant]);
    }

    #[tokio::test]
    async fn unknown_session_is_empty() {
        assert!(store().list(&SessionId::from("x")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn consecutive_user_entries_are_kept() {
        let store = store();
        let s = SessionId::from("s1");
        store.append(&s, &TurnEntry::user("first")).await.unwrap();
        store.append(&s, &TurnEntry::user("retry")).await.unwrap();
        let roles: Vec<_> = store.list(&s).await.unwrap().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User]);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let store = store();
        let s = SessionId::from("s1");
        store.append(&s, &TurnEntry::user("x")).await.unwrap();
        store.clear(&s).await.unwrap();
        assert!(store.list(&s).await.unwrap().is_empty());
        assert_eq!(store.session_count().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn create_session_resets_and_counts() {
        let store = store();
        let s = SessionId::from("s1");
        store.append(&s, &TurnEntry::user("old")).await.unwrap();
        store.create_session(&s, DAY).await.unwrap();
        assert!(store.list(&s).await.unwrap().is_empty());
        assert_eq!(store.session_count().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn zero_ttl_expires_immediately() {
        let store = store();
        let s = SessionId::from("s1");
        store.append(&s, &TurnEntry::user("x")).await.unwrap();
        store.set_expiry(&s, Duration::ZERO).await.unwrap();
        assert!(store.list(&s).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn set_expiry_after_expiry_does_not_revive_entries() {
        let store = store();
        let s = SessionId::from("s1");
        store.append(&s, &TurnEntry::user("old secret")).await.unwrap();
        store.set_expiry(&s, Duration::ZERO).await.unwrap();
        store.set_expiry(&s, Duration::from_secs(100)).await.unwrap();
        assert!(store.list(&s).await.unwrap().is_empty());
        assert_eq!(store.session_count().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn set_expiry_on_live_session_keeps_entries() {
        let store = store();
        let s = SessionId::from("s1");
        store.append(&s, &TurnEntry::user("kept")).await.unwrap();
        store.set_expiry(&s, Duration::from_secs(100)).await.unwrap();
        assert_eq!(store.list(&s).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn purge_expired_counts_removed_sessions() {
        let store = store();
        store
            .append(&SessionId::from("keep"), &TurnEntry::user("x"))
            .await
            .unwrap();
        store
            .append(&SessionId::from("drop"), &TurnEntry::user("y"))
            .await
            .unwrap();
        store
            .set_expiry(&SessionId::from("drop"), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.list(&SessionId::from("keep")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");
        let s = SessionId::from("s1");
        {
            let store = SqliteSessionStore::open(&path, DAY).unwrap();
            store.append(&s, &TurnEntry::user("persisted")).await.unwrap();
        }
        let store = SqliteSessionStore::open(&path, DAY).unwrap();
        let entries = store.list(&s).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "persisted");
    }
}
