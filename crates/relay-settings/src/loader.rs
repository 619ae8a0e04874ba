//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{RelaySettings, StoreBackend};

/// Resolve the default settings file (`~/.relay/settings.json`).
pub fn settings_path() -> PathBuf {
    relay_home().join("settings.json")
}

/// Directory holding relay state (`~/.relay`).
pub fn relay_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a malformed file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings the relay cannot run with.
pub fn validate(settings: &RelaySettings) -> Result<()> {
    if settings.turn.top_k == 0 {
        return Err(SettingsError::InvalidValue("turn.topK must be at least 1".into()));
    }
    if settings.turn.max_tokens == 0 {
        return Err(SettingsError::InvalidValue(
            "turn.maxTokens must be at least 1".into(),
        ));
    }
    if settings.store.session_ttl_secs == 0 {
        return Err(SettingsError::InvalidValue(
            "store.sessionTtlSecs must be at least 1".into(),
        ));
    }
    if settings.server.send_buffer_size == 0 {
        return Err(SettingsError::InvalidValue(
            "server.sendBufferSize must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Variable names match the deployment environment of the relay service.
/// Invalid values are logged and ignored.
pub fn apply_overrides_from<F>(settings: &mut RelaySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("PORT", 1, 65_535).and_then(|v| u16::try_from(v).ok()) {
        settings.server.port = v;
    }

    // ── Upstream ────────────────────────────────────────────────────
    if let Some(v) = env.string("RETRIEVAL_URL") {
        settings.upstream.retrieval_url = v;
    }
    if let Some(v) = env.string("LLM_GEN_URL") {
        settings.upstream.generate_url = v;
    }
    if let Some(v) = env.string("LLM_STREAM_URL") {
        settings.upstream.stream_url = v;
    }

    // ── Turn ────────────────────────────────────────────────────────
    if let Some(v) = env.u64_in("RELAY_TOP_K", 1, 100).and_then(|v| usize::try_from(v).ok()) {
        settings.turn.top_k = v;
    }
    if let Some(v) = env
        .u64_in("RELAY_MAX_TOKENS", 1, 1_000_000)
        .and_then(|v| u32::try_from(v).ok())
    {
        settings.turn.max_tokens = v;
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_STORE_BACKEND") {
        match v.parse::<StoreBackend>() {
            Ok(backend) => settings.store.backend = backend,
            Err(e) => warn!(key = "RELAY_STORE_BACKEND", error = %e, "ignoring env var"),
        }
    }
    if let Some(v) = env.string("REDIS_URL") {
        settings.store.redis_url = v;
    } else if let Some(host) = env.string("REDIS_HOST") {
        let port = env.u64_in("REDIS_PORT", 1, 65_535).unwrap_or(6379);
        settings.store.redis_url = format!("redis://{host}:{port}");
    }
    if let Some(v) = env.u64_in("REDIS_SESSION_TTL", 1, u64::from(u32::MAX)) {
        settings.store.session_ttl_secs = v;
    }
    if let Some(v) = env.string("RELAY_SQLITE_PATH") {
        settings.store.sqlite_path = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.string("RELAY_LOG_FORMAT") {
        match serde_json::from_value(Value::String(v.to_ascii_lowercase())) {
            Ok(format) => settings.logging.format = format,
            Err(_) => warn!(key = "RELAY_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

/// Parse a string as a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn overrides(pairs: &[(&str, &str)]) -> RelaySettings {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        let mut settings = RelaySettings::default();
        apply_overrides_from(&mut settings, |name| vars.get(name).cloned());
        settings
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 3000, "host": "0.0.0.0"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "0.0.0.0");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.turn.top_k, 5);
    }

    #[test]
    fn load_partial_file_merges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"upstream":{"streamUrl":"http://llm:9000/stream"},"store":{"backend":"sqlite"}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.upstream.stream_url, "http://llm:9000/stream");
        assert_eq!(settings.upstream.generate_url, "http://localhost:8002/generate");
        assert_eq!(settings.store.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn load_invalid_json_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn load_rejects_zero_top_k() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"turn":{"topK":0}}"#).unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn upstream_urls_from_env() {
        let s = overrides(&[
            ("RETRIEVAL_URL", "http://r/retrieve"),
            ("LLM_GEN_URL", "http://g/generate"),
            ("LLM_STREAM_URL", "http://g/stream"),
        ]);
        assert_eq!(s.upstream.retrieval_url, "http://r/retrieve");
        assert_eq!(s.upstream.generate_url, "http://g/generate");
        assert_eq!(s.upstream.stream_url, "http://g/stream");
    }

    #[test]
    fn port_and_ttl_from_env() {
        let s = overrides(&[("PORT", "8080"), ("REDIS_SESSION_TTL", "600")]);
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.store.session_ttl_secs, 600);
    }

    #[test]
    fn invalid_port_is_ignored() {
        let s = overrides(&[("PORT", "99999")]);
        assert_eq!(s.server.port, 3000);
        let s = overrides(&[("PORT", "abc")]);
        assert_eq!(s.server.port, 3000);
    }

    #[test]
    fn redis_host_and_port_compose_url() {
        let s = overrides(&[("REDIS_HOST", "cache"), ("REDIS_PORT", "6380")]);
        assert_eq!(s.store.redis_url, "redis://cache:6380");
        let s = overrides(&[("REDIS_HOST", "cache")]);
        assert_eq!(s.store.redis_url, "redis://cache:6379");
    }

    #[test]
    fn redis_url_wins_over_host() {
        let s = overrides(&[("REDIS_URL", "redis://a:1"), ("REDIS_HOST", "b")]);
        assert_eq!(s.store.redis_url, "redis://a:1");
    }

    #[test]
    fn store_backend_from_env() {
        let s = overrides(&[("RELAY_STORE_BACKEND", "redis")]);
        assert_eq!(s.store.backend, StoreBackend::Redis);
        let s = overrides(&[("RELAY_STORE_BACKEND", "cassandra")]);
        assert_eq!(s.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn log_format_from_env() {
        let s = overrides(&[("RELAY_LOG_FORMAT", "JSON")]);
        assert_eq!(s.logging.format, relay_core::logging::LogFormat::Json);
    }

    #[test]
    fn empty_values_are_ignored() {
        let s = overrides(&[("RETRIEVAL_URL", "")]);
        assert_eq!(s.upstream.retrieval_url, "http://localhost:8001/retrieve");
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range("0", 1, 10), None);
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range(" 7 ", 1, 10), Some(7));
    }
}
