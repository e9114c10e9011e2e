//! Relay settings with file, environment and default layers.
//!
//! Loading flow:
//! 1. Start with compiled [`RelaySettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `AGENT_RELAY_*` environment overrides
//!
//! CLI flags are applied last by the binary.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default settings file location.
pub const DEFAULT_SETTINGS_PATH: &str = "data/agent-relay.json";

/// Shortest admin key accepted before a new one is generated.
const MIN_KEY_LEN: usize = 32;

/// Settings error.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid settings JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Listener and relay behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Admin key guarding the health endpoint.
    pub key: String,
    /// Close clients that send nothing for this long.
    pub client_idle_timeout_secs: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8004,
            log_level: "info".to_string(),
            key: String::new(),
            client_idle_timeout_secs: None,
        }
    }
}

/// CORS policy for the HTTP surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    pub enable_cors: bool,
    /// `*` or a comma-separated list of origins.
    pub allowed_origins: String,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            enable_cors: true,
            allowed_origins: "*".to_string(),
        }
    }
}

/// All relay settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    pub security: SecuritySettings,
}

/// Load settings from a file with environment overrides.
///
/// A missing file yields defaults.
///
/// # Errors
/// Returns error if the file cannot be read or is not valid JSON.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings, SettingsError> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        tracing::debug!("Loading settings from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        tracing::debug!("Settings file {} not found, using defaults", path.display());
        defaults
    };

    let mut settings: RelaySettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

/// Recursive merge of two JSON values.
///
/// Objects merge per key; anything else in `source` replaces `target`.
/// Nulls in `source` are skipped.
#[must_use]
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
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `AGENT_RELAY_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning.
pub fn apply_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = read("AGENT_RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("AGENT_RELAY_PORT") {
        match v.parse::<u16>() {
            Ok(port) if port > 0 => settings.server.port = port,
            _ => tracing::warn!("Ignoring invalid AGENT_RELAY_PORT: {v}"),
        }
    }
    if let Some(v) = read("AGENT_RELAY_LOG_LEVEL") {
        settings.server.log_level = v;
    }
    if let Some(v) = read("AGENT_RELAY_KEY") {
        settings.server.key = v;
    }
    if let Some(v) = read("AGENT_RELAY_CLIENT_IDLE_TIMEOUT") {
        match v.parse::<u64>() {
            Ok(secs) if secs > 0 => settings.server.client_idle_timeout_secs = Some(secs),
            _ => tracing::warn!("Ignoring invalid AGENT_RELAY_CLIENT_IDLE_TIMEOUT: {v}"),
        }
    }
    if let Some(v) = read("AGENT_RELAY_ENABLE_CORS") {
        match parse_bool(&v) {
            Some(enabled) => settings.security.enable_cors = enabled,
            None => tracing::warn!("Ignoring invalid AGENT_RELAY_ENABLE_CORS: {v}"),
        }
    }
}

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
#[must_use]
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Make sure an admin key of at least 32 characters is set.
///
/// A generated key is written back to `path` so it survives restarts.
/// Returns whether a new key was generated.
///
/// # Errors
/// Returns error if the settings file cannot be written.
pub fn ensure_admin_key(settings: &mut RelaySettings, path: &Path) -> Result<bool, SettingsError> {
    if settings.server.key.len() >= MIN_KEY_LEN {
        return Ok(false);
    }

    settings.server.key = uuid::Uuid::new_v4().simple().to_string();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(settings)?)?;
    Ok(true)
}
