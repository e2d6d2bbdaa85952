//! Configuration I/O - Loading and saving configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use super::types::storage::PostgresConfig;
use super::types::translator::HttpBackendConfig;
use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.json or config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    // Detect format by extension
    let config: Config = if path.extension().is_some_and(|ext| ext == "json" || ext == "json5") {
        json5::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))?
    } else if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))?
    } else {
        // Try JSON5 first, then TOML
        json5::from_str(&content)
            .or_else(|_| toml::from_str(&content).map_err(|e| Error::Config(e.to_string())))
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?
    };

    Ok(config)
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` if present, then overlays any set variables. Env vars have
/// the highest precedence: defaults < file < env.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_with(config, |name| std::env::var(name).ok());
}

/// Overlay variables from `lookup` onto the config
pub(crate) fn apply_overrides_with<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parsed = |name: &str| -> Option<String> {
        lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    };

    // Node and gateway
    if let Some(id) = parsed("TRANSLINK_NODE_ID") {
        config.node.id = Some(id);
    }
    if let Some(bind) = parsed("TRANSLINK_BIND") {
        config.gateway.bind = bind;
    }
    set_parsed(&mut config.gateway.port, parsed("TRANSLINK_PORT"));
    set_parsed(&mut config.gateway.max_connections, parsed("MAX_CONNECTIONS"));

    // Database
    if let Some(url) = parsed("DATABASE_URL") {
        let pg = config
            .storage
            .postgres
            .get_or_insert_with(|| PostgresConfig::from_url(String::new()));
        pg.url = SecretString::from(url);
    }
    if let Some(pg) = config.storage.postgres.as_mut() {
        set_parsed(&mut pg.max_connections, parsed("DATABASE_MAX_CONNECTIONS"));
    }

    // Queue and registry
    set_parsed(&mut config.queue.backend, parsed("QUEUE_BACKEND"));
    set_parsed(&mut config.registry.backend, parsed("REGISTRY_BACKEND"));
    if let Some(name) = parsed("TRANSLATION_QUEUE") {
        config.queue.request_queue = name;
    }
    if let Some(name) = parsed("RESULT_QUEUE") {
        config.queue.result_queue = name;
    }

    // Workers
    set_parsed(&mut config.workers.max_retries, parsed("MAX_RETRIES"));
    set_parsed(&mut config.workers.request_workers, parsed("REQUEST_WORKERS"));
    set_parsed(&mut config.workers.result_workers, parsed("RESULT_WORKERS"));

    // Lifetimes
    set_duration(&mut config.session.ttl, parsed("SESSION_TTL"));
    set_duration(&mut config.delivery.hold_ttl, parsed("HOLD_TTL"));

    // Translators
    if let Some(list) = parsed("ALLOWED_TRANSLATORS") {
        config.translators.allowed = list
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    let mut names: Vec<String> = config.translators.allowed.clone();
    names.extend(config.translators.backends.keys().cloned());
    names.sort();
    names.dedup();
    for name in names {
        let prefix = format!("TRANSLATOR_{}", name.to_uppercase().replace('-', "_"));
        if let Some(url) = parsed(&format!("{}_URL", prefix)) {
            let backend = config
                .translators
                .backends
                .entry(name.clone())
                .or_insert_with(|| HttpBackendConfig::new(url.clone()));
            backend.url = url;
        }
        if let Some(key) = parsed(&format!("{}_API_KEY", prefix)) {
            if let Some(backend) = config.translators.backends.get_mut(&name) {
                backend.api_key = Some(SecretString::from(key));
            }
        }
    }

    // Logging
    if let Some(level) = parsed("LOG_LEVEL") {
        config.log.level = level;
    }
    set_parsed(&mut config.log.format, parsed("LOG_FORMAT"));
}

fn set_parsed<T: FromStr>(slot: &mut T, value: Option<String>) {
    if let Some(v) = value.and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}

/// Accepts plain seconds (`"60"`) or humantime (`"1m"`, `"1h 30m"`)
fn set_duration(slot: &mut Duration, value: Option<String>) {
    let Some(value) = value else { return };
    let parsed = value
        .parse::<u64>()
        .map(Duration::from_secs)
        .ok()
        .or_else(|| humantime_serde::re::humantime::parse_duration(&value).ok());
    if let Some(d) = parsed {
        *slot = d;
    }
}

/// Save configuration to a file
pub fn save_config(config: &Config, path: &Path) -> Result<()> {
    let content = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    } else {
        serde_json::to_string_pretty(config).map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, content)?;
    Ok(())
}
