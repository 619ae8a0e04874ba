//! # relay-settings
//!
//! Configuration with layered sources, lowest to highest priority:
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.relay/settings.json` or an explicit path,
//!    deep-merged over the defaults
//! 3. **Environment variables**: deployment overrides such as `PORT`,
//!    `RETRIEVAL_URL`, `LLM_STREAM_URL`, `REDIS_SESSION_TTL`

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
