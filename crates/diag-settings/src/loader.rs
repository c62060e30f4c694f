//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`DiagSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `HOT_DIAGNOSE_*` environment overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::DiagSettings;

/// `~/.hot-diagnose`, the home of settings and reports.
pub fn home_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".hot-diagnose")
}

/// Resolve the path to the settings file (`~/.hot-diagnose/settings.json`).
pub fn settings_path() -> PathBuf {
    home_dir().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<DiagSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or invalid values are errors.
pub fn load_settings_from_path(path: &Path) -> Result<DiagSettings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<DiagSettings> {
    let defaults = serde_json::to_value(DiagSettings::default())?;

    let merged = match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "loading settings from file");
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `HOT_DIAGNOSE_*` environment variables.
pub fn apply_env_overrides(settings: &mut DiagSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from any variable source.
///
/// Values are parsed strictly; an unparsable or out-of-range value is
/// logged and ignored, keeping the file/default value.
pub fn apply_overrides(settings: &mut DiagSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let rejected = |name: &str, value: &str| {
        warn!(key = name, value, "invalid env override, ignoring");
    };

    if let Some(v) = read("HOT_DIAGNOSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("HOT_DIAGNOSE_PORT") {
        match parse_u64_range(&v, 0, u16::MAX as u64) {
            Some(port) => settings.server.port = port as u16,
            None => rejected("HOT_DIAGNOSE_PORT", &v),
        }
    }
    if let Some(v) = read("HOT_DIAGNOSE_QUEUE_CAPACITY") {
        match parse_u64_range(&v, 1, 1 << 24) {
            Some(n) => settings.queue.capacity = n as usize,
            None => rejected("HOT_DIAGNOSE_QUEUE_CAPACITY", &v),
        }
    }
    if let Some(v) = read("HOT_DIAGNOSE_ENQUEUE_TIMEOUT_MS") {
        match parse_u64_range(&v, 0, 60_000) {
            Some(ms) => settings.queue.enqueue_timeout_ms = ms,
            None => rejected("HOT_DIAGNOSE_ENQUEUE_TIMEOUT_MS", &v),
        }
    }
    if let Some(v) = read("HOT_DIAGNOSE_PATH") {
        settings.runner.search_path = std::env::split_paths(&v)
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
    }
    if let Some(v) = read("HOT_DIAGNOSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read("HOT_DIAGNOSE_REPORT") {
        match parse_bool(&v) {
            Some(enabled) => settings.report.enabled = enabled,
            None => rejected("HOT_DIAGNOSE_REPORT", &v),
        }
    }
}

/// Deepest script call nesting the execution thread's stack is sized for.
pub const MAX_CALL_DEPTH: usize = 1_000;

/// Reject values no component can work with.
pub fn validate(settings: &DiagSettings) -> Result<()> {
    let depth = settings.runner.max_call_depth;
    if depth == 0 || depth > MAX_CALL_DEPTH {
        return Err(SettingsError::InvalidValue(format!(
            "runner.maxCallDepth must be between 1 and {MAX_CALL_DEPTH}, got {depth}"
        )));
    }
    if settings.queue.capacity == 0 {
        return Err(SettingsError::InvalidValue(
            "queue.capacity must be positive".into(),
        ));
    }
    if settings.tracer.control_poll_interval == 0 {
        return Err(SettingsError::InvalidValue(
            "tracer.controlPollInterval must be positive".into(),
        ));
    }
    if settings.server.host.trim().is_empty() {
        return Err(SettingsError::InvalidValue("server.host is empty".into()));
    }
    if settings.server.heartbeat_timeout_secs < settings.server.heartbeat_interval_secs {
        return Err(SettingsError::InvalidValue(format!(
            "server.heartbeatTimeoutSecs ({}) is shorter than the heartbeat interval ({})",
            settings.server.heartbeat_timeout_secs, settings.server.heartbeat_interval_secs
        )));
    }
    Ok(())
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8765, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── files ───────────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = read_settings_file(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, DiagSettings::default());
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9100}, "report": {"excludeDirs": ["build"]}}"#,
        )
        .unwrap();

        let settings = read_settings_file(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.report.exclude_dirs, vec!["build".to_string()]);
        assert!(settings.report.enabled);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(read_settings_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn wrong_types_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"queue": {"capacity": "big"}}"#).unwrap();
        assert!(matches!(read_settings_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn directory_as_settings_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_settings_file(dir.path()),
            Err(SettingsError::Io { .. })
        ));
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = DiagSettings::default();
        let search = std::env::join_paths(["/libA", "/libB"]).unwrap();
        let search = search.to_string_lossy().into_owned();
        apply_overrides(
            &mut settings,
            env(&[
                ("HOT_DIAGNOSE_HOST", "0.0.0.0"),
                ("HOT_DIAGNOSE_PORT", "9001"),
                ("HOT_DIAGNOSE_QUEUE_CAPACITY", "64"),
                ("HOT_DIAGNOSE_ENQUEUE_TIMEOUT_MS", "20"),
                ("HOT_DIAGNOSE_PATH", search.as_str()),
                ("HOT_DIAGNOSE_LOG_LEVEL", "debug"),
                ("HOT_DIAGNOSE_REPORT", "off"),
            ]),
        );
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.server.port, 9001);
        assert_eq!(settings.queue.capacity, 64);
        assert_eq!(settings.queue.enqueue_timeout_ms, 20);
        assert_eq!(settings.runner.search_path, vec!["/libA", "/libB"]);
        assert_eq!(settings.logging.level, "debug");
        assert!(!settings.report.enabled);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = DiagSettings::default();
        apply_overrides(
            &mut settings,
            env(&[
                ("HOT_DIAGNOSE_PORT", "70000"),
                ("HOT_DIAGNOSE_QUEUE_CAPACITY", "0"),
                ("HOT_DIAGNOSE_REPORT", "maybe"),
                ("HOT_DIAGNOSE_HOST", ""),
            ]),
        );
        assert_eq!(settings, DiagSettings::default());
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut settings = DiagSettings::default();
        assert!(validate(&settings).is_ok());

        settings.queue.capacity = 0;
        assert!(matches!(validate(&settings), Err(SettingsError::InvalidValue(_))));

        let mut settings = DiagSettings::default();
        settings.server.heartbeat_timeout_secs = 5;
        assert!(validate(&settings).is_err());

        let mut settings = DiagSettings::default();
        settings.tracer.control_poll_interval = 0;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn call_depth_must_fit_the_execution_stack() {
        let mut settings = DiagSettings::default();
        settings.runner.max_call_depth = MAX_CALL_DEPTH;
        assert!(validate(&settings).is_ok());

        settings.runner.max_call_depth = 1_000_000;
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("runner.maxCallDepth"), "got: {err}");

        settings.runner.max_call_depth = 0;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn oversized_call_depth_in_file_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"runner": {"maxCallDepth": 5000000}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "yes", "ON"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "No", "off"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_bounds() {
        assert_eq!(parse_u64_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u64_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }
}
