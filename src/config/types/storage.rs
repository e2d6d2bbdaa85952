//! Storage configuration types
//!
//! Configuration for the PostgreSQL connection and the registry store.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// PostgreSQL configuration
    pub postgres: Option<PostgresConfig>,
}

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Database URL
    #[serde(skip_serializing)]
    pub url: SecretString,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    30
}

impl PostgresConfig {
    /// Config with default pool settings for a URL
    pub fn from_url(url: impl Into<String>) -> Self {
        PostgresConfig {
            url: SecretString::from(url.into()),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Registry store selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackendType {
    /// In-process (single node only)
    #[default]
    Memory,
    /// PostgreSQL table with versioned rows
    Postgres,
}

impl std::str::FromStr for RegistryBackendType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "inmemory" => Ok(RegistryBackendType::Memory),
            "postgres" | "postgresql" | "pg" => Ok(RegistryBackendType::Postgres),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid registry backend: {}. Valid options: memory, postgres",
                s
            ))),
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Store backend
    #[serde(default)]
    pub backend: RegistryBackendType,
    /// Namespace prefix for all registry keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            backend: RegistryBackendType::default(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    "translink".to_string()
}
