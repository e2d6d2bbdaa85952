//! Configuration module - Modular configuration management
//!
//! Configuration is split into focused modules:
//! - types/mod.rs: Core configuration types (Config, GatewayConfig, etc.)
//! - types/queue.rs: Queue, worker pool and delivery configuration
//! - types/storage.rs: PostgreSQL and registry store configuration
//! - types/translator.rs: Translator backend configuration
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

// Re-export core config types
pub use types::{Config, GatewayConfig, LogConfig, LogFormat, NodeConfig, SessionConfig};

// Re-export queue types
pub use types::queue::{DeliveryConfig, QueueBackendType, QueueConfig, WorkerConfig};

// Re-export storage types
pub use types::storage::{PostgresConfig, RegistryBackendType, RegistryConfig, StorageConfig};

// Re-export translator types
pub use types::translator::{HttpBackendConfig, TranslatorsConfig};

// Re-export IO and utilities
pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
