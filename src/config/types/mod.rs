//! Configuration types module
//!
//! Core configuration types plus re-exports of the focused sections.

pub mod queue;
pub mod storage;
pub mod translator;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::NodeId;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Identity of this process in the fleet
    #[serde(default)]
    pub node: NodeConfig,

    /// Gateway (live connections, HTTP ingress)
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Session lifetime
    #[serde(default)]
    pub session: SessionConfig,

    /// Queue names and provider
    #[serde(default)]
    pub queue: queue::QueueConfig,

    /// Worker pool sizing and retry policy
    #[serde(default)]
    pub workers: queue::WorkerConfig,

    /// Result delivery and holding area
    #[serde(default)]
    pub delivery: queue::DeliveryConfig,

    /// Session registry store
    #[serde(default)]
    pub registry: storage::RegistryConfig,

    /// Database connections
    #[serde(default)]
    pub storage: storage::StorageConfig,

    /// Translator backends
    #[serde(default)]
    pub translators: translator::TranslatorsConfig,

    /// Logging
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from environment variables and files
    ///
    /// It loads configuration from:
    /// 1. Default values
    /// 2. Config file (if present)
    /// 3. Environment variable overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Node identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Stable node id; a random one is generated when unset
    pub id: Option<String>,
}

impl NodeConfig {
    /// Resolve the node id for this process
    pub fn node_id(&self) -> NodeId {
        match self.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => NodeId::from(id),
            _ => NodeId::random(),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Port to bind to
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum concurrent live connections on this node
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle time after which a live connection is closed
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Per-connection outbound buffer (messages)
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Longest accepted source text, in characters
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    /// Allowed CORS origins ("*" for any)
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            idle_timeout: default_idle_timeout(),
            outbound_buffer: default_outbound_buffer(),
            max_text_chars: default_max_text_chars(),
            cors_origins: default_cors_origins(),
        }
    }
}

fn default_port() -> u16 {
    8000
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_outbound_buffer() -> usize {
    256
}

fn default_max_text_chars() -> usize {
    10_000
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Inactivity TTL after which a session is evicted and its id retired
    #[serde(default = "default_session_ttl", with = "humantime_serde")]
    pub ttl: Duration,
    /// How often the router refreshes live sessions and evicts stale ones
    #[serde(default = "default_session_sweep", with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ttl: default_session_ttl(),
            sweep_interval: default_session_sweep(),
        }
    }
}

fn default_session_ttl() -> Duration {
    Duration::from_secs(3600)
}

fn default_session_sweep() -> Duration {
    Duration::from_secs(30)
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid log format: {}. Valid options: pretty, json",
                s
            ))),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info,translink=debug".to_string()
}
