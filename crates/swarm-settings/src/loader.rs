//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SwarmSettings::default()`]
//! 2. If `~/.swarm/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{MAX_POOL_SIZE, SwarmSettings};

/// Resolve the path to the settings file (`~/.swarm/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".swarm").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<SwarmSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<SwarmSettings> {
    let defaults = serde_json::to_value(SwarmSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: SwarmSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
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

/// Apply `SWARM_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut SwarmSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup.
///
/// Invalid values are ignored with a warning and fall back to file/default.
pub fn apply_overrides<F>(settings: &mut SwarmSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read_string = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let read_u64 = |name: &str, min: u64, max: u64| {
        let val = lookup(name)?;
        let parsed = parse_u64_range(&val, min, max);
        if parsed.is_none() {
            tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
        }
        parsed
    };

    // ── Storage ─────────────────────────────────────────────────────
    if let Some(v) = read_string("SWARM_DB_PATH") {
        settings.storage.database_path = v;
    }
    if let Some(v) = read_u64("SWARM_POOL_SIZE", 1, u64::from(MAX_POOL_SIZE)) {
        settings.storage.pool_size = v as u32;
    }
    if let Some(v) = read_u64("SWARM_BUSY_TIMEOUT_MS", 0, u64::from(u32::MAX)) {
        settings.storage.busy_timeout_ms = v as u32;
    }

    // ── Deferred ────────────────────────────────────────────────────
    if let Some(v) = read_u64("SWARM_DEFERRED_TTL_SECS", 1, 86_400) {
        settings.deferred.default_ttl_secs = v;
    }
    // The cap may not undercut the first delay already in effect.
    let poll_floor = settings.deferred.poll_initial_ms.max(1);
    if let Some(v) = read_u64("SWARM_POLL_MAX_MS", poll_floor, 60_000) {
        settings.deferred.poll_max_ms = v;
    }

    // ── Mailbox ─────────────────────────────────────────────────────
    if let Some(v) = read_u64("SWARM_MAILBOX_BATCH", 1, 10_000) {
        settings.mailbox.batch_size = v as u32;
    }

    // ── Reservations ────────────────────────────────────────────────
    if let Some(v) = read_u64("SWARM_RESERVATION_TTL_SECS", 1, 604_800) {
        settings.reservations.default_ttl_secs = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string("SWARM_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"storage": {"poolSize": 8, "busyTimeoutMs": 1}});
        let source = serde_json::json!({"storage": {"poolSize": 2}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["storage"]["poolSize"], 2);
        assert_eq!(merged["storage"]["busyTimeoutMs"], 1);
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let merged = deep_merge(target, serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let merged = deep_merge(target, serde_json::json!({"items": [4]}));
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.mailbox.batch_size, 100);
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"storage": {"poolSize": 3}, "deferred": {"pollMaxMs": 50}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.storage.pool_size, 3);
        assert_eq!(settings.deferred.poll_max_ms, 50);
        assert_eq!(settings.deferred.poll_initial_ms, 10);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path).unwrap_err(),
            SettingsError::Json(_)
        ));
    }

    #[test]
    fn load_out_of_range_file_value_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"storage": {"poolSize": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path).unwrap_err(),
            SettingsError::InvalidValue(_)
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn overrides_apply_valid_values() {
        let mut settings = SwarmSettings::default();
        apply_overrides(
            &mut settings,
            lookup_from(&[
                ("SWARM_DB_PATH", "/data/swarm.db"),
                ("SWARM_POOL_SIZE", "4"),
                ("SWARM_MAILBOX_BATCH", "25"),
                ("SWARM_LOG_LEVEL", "swarm_store=debug"),
            ]),
        );
        assert_eq!(settings.storage.database_path, "/data/swarm.db");
        assert_eq!(settings.storage.pool_size, 4);
        assert_eq!(settings.mailbox.batch_size, 25);
        assert_eq!(settings.logging.level, "swarm_store=debug");
    }

    #[test]
    fn overrides_ignore_invalid_values() {
        let mut settings = SwarmSettings::default();
        apply_overrides(
            &mut settings,
            lookup_from(&[
                ("SWARM_POOL_SIZE", "0"),
                ("SWARM_POLL_MAX_MS", "fast"),
                ("SWARM_DB_PATH", ""),
            ]),
        );
        let defaults = SwarmSettings::default();
        assert_eq!(settings.storage.pool_size, defaults.storage.pool_size);
        assert_eq!(settings.deferred.poll_max_ms, defaults.deferred.poll_max_ms);
        assert_eq!(settings.storage.database_path, defaults.storage.database_path);
    }

    #[test]
    fn poll_cap_below_initial_delay_is_ignored() {
        let mut settings = SwarmSettings::default();
        apply_overrides(&mut settings, lookup_from(&[("SWARM_POLL_MAX_MS", "5")]));
        assert_eq!(settings.deferred.poll_max_ms, 200);
        assert!(settings.validate().is_ok());

        apply_overrides(&mut settings, lookup_from(&[("SWARM_POLL_MAX_MS", "10")]));
        assert_eq!(settings.deferred.poll_max_ms, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("5", 1, 10), Some(5));
        assert_eq!(parse_u64_range(" 7 ", 1, 10), Some(7));
        assert_eq!(parse_u64_range("0", 1, 10), None);
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }
}
