//! # relay-store
//!
//! Per-session transcript storage: an ordered, append-only log of
//! [`TurnEntry`](relay_core::TurnEntry) values keyed by session id, with an
//! idle expiry that is set on creation and refreshed on every append.
//!
//! Backends:
//! - [`MemorySessionStore`]: process-local, lazy eviction plus [`SessionStore::purge_expired`]
//! - [`SqliteSessionStore`]: `rusqlite` behind an `r2d2` pool
//! - [`RedisSessionStore`]: one Redis list per session with native `EXPIRE`

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;
pub mod redis_store;
pub mod sqlite;
pub mod store;

pub use errors::{Result, StoreError};
pub use memory::MemorySessionStore;
pub use redis_store::RedisSessionStore;
pub use sqlite::SqliteSessionStore;
pub use store::{SessionStore, SessionStoreHandle};
