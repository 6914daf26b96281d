//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ParleySettings::default()`]
//! 2. If `~/.parley/settings.json` exists, deep-merge user values over defaults
//! 3. Apply `PARLEY_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, LogLevel, OverflowPolicy, ParleySettings};

/// Resolve the path to the settings file (`~/.parley/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".parley").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ParleySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. Invalid JSON or a
/// configuration that fails [`ParleySettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<ParleySettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<ParleySettings> {
    let defaults = serde_json::to_value(ParleySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
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

/// Apply `PARLEY_*` environment variable overrides to loaded settings.
///
/// Invalid values are logged at `warn` and ignored (the file/default
/// value stays in effect).
pub fn apply_env_overrides(settings: &mut ParleySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// `lookup` returns the raw value for a variable name, or `None` if unset.
pub fn apply_overrides<F>(settings: &mut ParleySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PARLEY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("PARLEY_PORT", |s| parse_u16_range(s, 0, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("PARLEY_MAX_CONNECTIONS", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.parsed("PARLEY_HEARTBEAT_INTERVAL_MS", |s| {
        parse_u64_range(s, 100, 600_000)
    }) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.parsed("PARLEY_HEARTBEAT_TIMEOUT_MS", |s| {
        parse_u64_range(s, 100, 3_600_000)
    }) {
        settings.server.heartbeat_timeout_ms = v;
    }

    // ── Relay ───────────────────────────────────────────────────────
    if let Some(v) = env.parsed("PARLEY_QUEUE_CAPACITY", |s| {
        parse_usize_range(s, 1, 1_000_000)
    }) {
        settings.relay.outbound_queue_capacity = v;
    }
    if let Some(v) = env.parsed("PARLEY_MAX_MESSAGE_BYTES", |s| {
        parse_usize_range(s, 1, 64 * 1024 * 1024)
    }) {
        settings.relay.max_message_bytes = v;
    }
    if let Some(v) = env.parsed("PARLEY_MAX_ROOM_MEMBERS", |s| {
        parse_usize_range(s, 0, 1_000_000)
    }) {
        settings.relay.max_room_members = v;
    }
    if let Some(v) = env.parsed("PARLEY_OVERFLOW_POLICY", OverflowPolicy::from_name) {
        settings.relay.overflow_policy = v;
    }
    if let Some(v) = env.parsed("PARLEY_ECHO_TO_SENDER", parse_bool) {
        settings.relay.echo_to_sender = v;
    }

    // ── Security ────────────────────────────────────────────────────
    if let Some(v) = env.parsed("PARLEY_ALLOWED_HOSTS", parse_host_list) {
        settings.security.allowed_hosts = v;
    }
    if let Some(v) = env.parsed("PARLEY_REQUIRE_IDENTITY", parse_bool) {
        settings.security.require_identity = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.parsed("PARLEY_LOG_LEVEL", parse_log_level) {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("PARLEY_LOG_FORMAT", parse_log_format) {
        settings.logging.format = v;
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

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a comma-separated host allow-list. Empty entries are skipped;
/// an entirely empty list is rejected.
pub fn parse_host_list(val: &str) -> Option<Vec<String>> {
    let hosts: Vec<String> = val
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();
    (!hosts.is_empty()).then_some(hosts)
}

/// Parse a log level name.
pub fn parse_log_level(val: &str) -> Option<LogLevel> {
    serde_json::from_value(Value::String(val.trim().to_lowercase())).ok()
}

/// Parse a log format name.
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    serde_json::from_value(Value::String(val.trim().to_lowercase())).ok()
}

// ── Variable reader ─────────────────────────────────────────────────────────

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

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}
