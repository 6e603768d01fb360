//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PreApiSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::PreApiSettings;

/// Resolve the settings file path.
///
/// `PREAPI_SETTINGS` wins; otherwise `~/.preapi/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(explicit) = read_env_string("PREAPI_SETTINGS") {
        return PathBuf::from(explicit);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".preapi").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PreApiSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, or the merged result fails validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<PreApiSettings> {
    let defaults = serde_json::to_value(PreApiSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PreApiSettings = serde_json::from_value(merged)?;
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

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are logged and ignored (fall back to file/default).
pub fn apply_env_overrides(settings: &mut PreApiSettings) {
    if let Some(v) = read_env_string("PREAPI_HOST_IDENTITY") {
        settings.host_identity = Some(v);
    }

    // ── Logging / server ────────────────────────────────────────────
    if let Some(v) = read_env_string("PREAPI_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("PREAPI_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = read_env_string("PREAPI_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u16("PREAPI_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Transports ──────────────────────────────────────────────────
    if let Some(v) = read_env_string("PREAPI_BUS_URL") {
        settings.bus.url = Some(v);
    }
    if let Some(v) = read_env_string("FLIP_REDIS_OPTIONS") {
        settings.ingress.legacy_endpoint = Some(v);
    }
    if let Some(v) = read_env_string("REDIS_FLIP_INSTANCES") {
        settings.ingress.endpoints = parse_list(&v);
    }

    // ── Registry / billing ──────────────────────────────────────────
    if let Some(v) = read_env_u64("PREAPI_REFRESH_INTERVAL_MS", 1000, 3_600_000) {
        settings.registry.refresh_interval_ms = v;
    }
    if let Some(v) = read_env_string("PREAPI_PRODUCT_SLUG") {
        settings.registry.product_slug = v;
    }
    if let Some(v) = read_env_string("PREAPI_BILLING_URL") {
        settings.billing.base_url = v;
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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u16(name: &str, min: u16, max: u16) -> Option<u16> {
    let val = std::env::var(name).ok()?;
    let result = parse_u16_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    use crate::errors::SettingsError;

    // -- deep_merge --

    #[test]
    fn merge_nested_objects() {
        let target = json!({"bus": {"url": null, "purchaseChannel": "auction_sell"}});
        let source = json!({"bus": {"url": "redis://x"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["bus"]["url"], "redis://x");
        assert_eq!(merged["bus"]["purchaseChannel"], "auction_sell");
    }

    #[test]
    fn merge_arrays_replace() {
        let target = json!({"endpoints": ["a", "b"]});
        let source = json!({"endpoints": ["c"]});
        assert_eq!(deep_merge(target, source)["endpoints"], json!(["c"]));
    }

    #[test]
    fn merge_null_source_preserves_target() {
        let target = json!({"port": 8088});
        let source = json!({"port": null});
        assert_eq!(deep_merge(target, source)["port"], 8088);
    }

    // -- file loading --

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.ingress.channel, "snipes");
        assert_eq!(settings.registry.refresh_interval_ms, 45_000);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "hostIdentity": "node-a",
                "fairness": {"jitterMaxMs": 6000},
                "ingress": {"endpoints": ["redis://f1"]}
            }"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.host_identity.as_deref(), Some("node-a"));
        assert_eq!(settings.fairness.jitter_max_ms, 6000);
        assert_eq!(settings.fairness.jitter_min_ms, 3000);
        assert_eq!(settings.ingress.endpoints, ["redis://f1"]);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"fairness": {"jitterMinMs": 9000}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // -- parsing --

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("8080", 1, 65535), Some(8080));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 5000), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }

    #[test]
    fn parse_list_trims_and_drops_blanks() {
        assert_eq!(
            parse_list(" redis://a:6379 , ,redis://b:6379,"),
            ["redis://a:6379", "redis://b:6379"]
        );
        assert!(parse_list("").is_empty());
    }
}
