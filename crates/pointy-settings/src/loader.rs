//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PointySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `POINTY_*` environment overrides
//! 4. Validate

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::PointySettings;

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "POINTY_SETTINGS";

/// `$POINTY_SETTINGS`, else `~/.pointy/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pointy").join("settings.json")
}

pub fn load_settings() -> Result<PointySettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` (missing file means defaults), apply env overrides, validate.
pub fn load_settings_from_path(path: &Path) -> Result<PointySettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<PointySettings> {
    let defaults = serde_json::to_value(PointySettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

/// Objects merge per key, everything else is replaced. Nulls in `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut PointySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from any variable source. Unparseable or out-of-range
/// values are logged and ignored.
pub fn apply_overrides<F>(settings: &mut PointySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.u16("POINTY_PORT", 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("POINTY_HOST") {
        settings.server.host = v;
    }

    if let Some(v) = env.string("POINTY_DB_PATH") {
        settings.store.db_path = v;
    }
    if let Some(v) = env.string("POINTY_SESSION_TABLE") {
        settings.store.session_table = v;
    }
    if let Some(v) = env.string("POINTY_LOCK_TABLE") {
        settings.store.lock_table = v;
    }
    if let Some(v) = env.string("POINTY_WATCHER_TABLE") {
        settings.store.watcher_table = v;
    }

    if let Some(v) = env.u64("POINTY_LOCK_WAIT_MS", 1, 60_000) {
        settings.coordination.lock_wait_ms = v;
    }
    if let Some(v) = env.u64("POINTY_LOCK_TIMEOUT_MS", 1, 600_000) {
        settings.coordination.lock_timeout_ms = v;
    }
    if let Some(v) = env.u64("POINTY_LOCK_EXPIRATION_MS", 1, 600_000) {
        settings.coordination.lock_expiration_ms = v;
    }
    if let Some(v) = env.u64("POINTY_SESSION_TIMEOUT_SECS", 1, 30 * 24 * 3600) {
        settings.coordination.session_timeout_secs = v;
    }

    if let Some(v) = env.string("POINTY_GATEWAY_ENDPOINT") {
        settings.gateway.endpoint = Some(v);
    }
    if let Some(v) = env.string("POINTY_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = self.string(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = self.string(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
