//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    reset_out_of_range(&mut settings);
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Replace numeric values outside the ranges accepted from the environment
/// with their defaults. Zero intervals would otherwise reach the timers.
pub fn reset_out_of_range(settings: &mut TetherSettings) {
    let defaults = TetherSettings::default();
    let server = &mut settings.server;
    if !(1..=(1 << 20)).contains(&server.max_send_queue) {
        warn!(key = "server.maxSendQueue", value = server.max_send_queue, "out of range, using default");
        server.max_send_queue = defaults.server.max_send_queue;
    }
    keep_in_range(
        "server.heartbeatIntervalMs",
        &mut server.heartbeat_interval_ms,
        1_000..=600_000,
        defaults.server.heartbeat_interval_ms,
    );
    keep_in_range(
        "server.clientTimeoutMs",
        &mut server.client_timeout_ms,
        1_000..=3_600_000,
        defaults.server.client_timeout_ms,
    );
    keep_in_range(
        "session.maxAgeMs",
        &mut settings.session.max_age_ms,
        1_000..=u64::MAX,
        defaults.session.max_age_ms,
    );
    keep_in_range(
        "session.sweepIntervalMs",
        &mut settings.session.sweep_interval_ms,
        100..=86_400_000,
        defaults.session.sweep_interval_ms,
    );
    keep_in_range(
        "client.connectTimeoutMs",
        &mut settings.client.connect_timeout_ms,
        100..=600_000,
        defaults.client.connect_timeout_ms,
    );
}

fn keep_in_range(key: &str, value: &mut u64, range: RangeInclusive<u64>, default: u64) {
    if !range.contains(value) {
        warn!(key, value = *value, min = range.start(), max = range.end(), "out of range, using default");
        *value = default;
    }
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
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

/// Apply `TETHER_*` overrides, reading variables through `lookup`.
///
/// Invalid values are ignored with a warning and leave the file/default value
/// in place.
pub fn apply_env_overrides(
    settings: &mut TetherSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = EnvReader { lookup };

    if let Some(v) = env.string("TETHER_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u64_in("TETHER_PORT", 0, u64::from(u16::MAX)) {
        settings.server.port = v as u16;
    }
    if let Some(v) = env.u64_in("TETHER_MAX_SEND_QUEUE", 1, 1 << 20) {
        settings.server.max_send_queue = v as usize;
    }
    if let Some(v) = env.u64_in("TETHER_HEARTBEAT_INTERVAL_MS", 1_000, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64_in("TETHER_CLIENT_TIMEOUT_MS", 1_000, 3_600_000) {
        settings.server.client_timeout_ms = v;
    }
    if let Some(v) = env.string("TETHER_SESSION_COOKIE") {
        settings.session.cookie_name = v;
    }
    if let Some(v) = env.u64_in("TETHER_SESSION_MAX_AGE_MS", 1_000, u64::MAX) {
        settings.session.max_age_ms = v;
    }
    if let Some(v) = env.u64_in("TETHER_SESSION_SWEEP_MS", 100, 86_400_000) {
        settings.session.sweep_interval_ms = v;
    }
    if let Some(v) = env.u64_in("TETHER_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.client.connect_timeout_ms = v;
    }
    if let Some(v) = env.string("TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("TETHER_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
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

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64_in(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, min, max, "invalid numeric env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn deep_merge_objects() {
        let merged = deep_merge(
            json!({"server": {"port": 1, "host": "a"}}),
            json!({"server": {"port": 2}}),
        );
        assert_eq!(merged, json!({"server": {"port": 2, "host": "a"}}));
    }

    #[test]
    fn deep_merge_skips_nulls() {
        let merged = deep_merge(json!({"a": 1}), json!({"a": null, "b": 2}));
        assert_eq!(merged, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn deep_merge_replaces_arrays() {
        let merged = deep_merge(json!({"a": [1, 2]}), json!({"a": [3]}));
        assert_eq!(merged, json!({"a": [3]}));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.session.cookie_name, "tether-session");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"session": {"cookieName": "custom"}, "logging": {"json": true}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.session.cookie_name, "custom");
        assert!(settings.logging.json);
        assert_eq!(settings.session.sweep_interval_ms, 60_000);
    }

    #[test]
    fn zero_intervals_in_file_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"heartbeatIntervalMs": 0, "clientTimeoutMs": 0, "maxSendQueue": 0},
                "session": {"sweepIntervalMs": 0, "maxAgeMs": 0},
                "client": {"connectTimeoutMs": 0}}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.heartbeat_interval_ms, 30_000);
        assert_eq!(settings.server.client_timeout_ms, 90_000);
        assert_eq!(settings.server.max_send_queue, 256);
        assert_eq!(settings.session.sweep_interval_ms, 60_000);
        assert_eq!(settings.session.max_age_ms, 7 * 24 * 60 * 60 * 1000);
        assert_eq!(settings.client.connect_timeout_ms, 10_000);
    }

    #[test]
    fn in_range_file_values_are_kept() {
        let mut settings = TetherSettings::default();
        settings.server.heartbeat_interval_ms = 1_000;
        settings.session.sweep_interval_ms = 100;
        reset_out_of_range(&mut settings);
        assert_eq!(settings.server.heartbeat_interval_ms, 1_000);
        assert_eq!(settings.session.sweep_interval_ms, 100);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_settings_from_path(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { .. }));
        assert!(err.to_string().contains("settings.json"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = TetherSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("TETHER_PORT", "9100"),
                ("TETHER_SESSION_COOKIE", "sid"),
                ("TETHER_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.session.cookie_name, "sid");
        assert!(settings.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = TetherSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("TETHER_PORT", "99999"),
                ("TETHER_HEARTBEAT_INTERVAL_MS", "5"),
                ("TETHER_LOG_JSON", "maybe"),
                ("TETHER_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.heartbeat_interval_ms, 30_000);
        assert!(!settings.logging.json);
        assert_eq!(settings.server.host, "0.0.0.0");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("x"), None);
        assert_eq!(parse_u64_range(" 42 ", 1, 100), Some(42));
        assert_eq!(parse_u64_range("0", 1, 100), None);
        assert_eq!(parse_u64_range("-1", 0, 100), None);
    }
}
