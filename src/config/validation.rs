//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::queue::QueueBackendType;
use super::types::storage::RegistryBackendType;
use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " ({})", s)?;
        }
        Ok(())
    }
}

/// Validate the configuration
///
/// `distributed` is true for the split `gateway`/`worker` roles, where
/// in-process collaborators cannot be shared between processes.
pub fn validate_config(config: &Config, distributed: bool) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_storage_config(config, distributed, result);
    result = validate_worker_config(config, result);
    result = validate_delivery_config(config, result);
    result = validate_translator_config(config, result);

    result
}

fn validate_storage_config(
    config: &Config,
    distributed: bool,
    mut result: ConfigValidationResult,
) -> ConfigValidationResult {
    let needs_postgres = config.queue.backend == QueueBackendType::Postgres
        || config.registry.backend == RegistryBackendType::Postgres;

    if needs_postgres && config.storage.postgres.is_none() {
        result = result.with_error(
            ValidationIssue::new(
                "storage.postgres",
                "PostgreSQL backend selected but not configured",
            )
            .with_suggestion("Set DATABASE_URL environment variable or configure storage.postgres"),
        );
    }

    if distributed && config.queue.backend == QueueBackendType::Memory {
        result = result.with_warning(
            ValidationIssue::new(
                "queue.backend",
                "In-process queue is not shared between gateway and worker processes",
            )
            .with_suggestion("Use QUEUE_BACKEND=postgres or run `translink standalone`"),
        );
    }
    if distributed && config.registry.backend == RegistryBackendType::Memory {
        result = result.with_warning(
            ValidationIssue::new(
                "registry.backend",
                "In-process registry is not shared between nodes",
            )
            .with_suggestion("Use REGISTRY_BACKEND=postgres or run `translink standalone`"),
        );
    }

    if config.queue.request_queue == config.queue.result_queue {
        result = result.with_error(ValidationIssue::new(
            "queue.result_queue",
            "Request and result queues must have different names",
        ));
    }

    result
}

fn validate_worker_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let w = &config.workers;

    if w.request_workers == 0 {
        result = result.with_warning(ValidationIssue::new(
            "workers.request_workers",
            "No request workers; jobs will not be processed by this process",
        ));
    }
    if w.result_workers == 0 {
        result = result.with_warning(ValidationIssue::new(
            "workers.result_workers",
            "No result workers; results will not be delivered by this process",
        ));
    }
    if w.backoff_multiplier < 1.0 {
        result = result.with_error(ValidationIssue::new(
            "workers.backoff_multiplier",
            "Backoff multiplier must be at least 1.0",
        ));
    }
    if !(0.0..1.0).contains(&w.backoff_jitter) {
        result = result.with_error(ValidationIssue::new(
            "workers.backoff_jitter",
            "Backoff jitter must be in [0, 1)",
        ));
    }
    if w.initial_backoff > w.max_backoff {
        result = result.with_warning(ValidationIssue::new(
            "workers.initial_backoff",
            "Initial backoff exceeds max backoff; every retry will wait max_backoff",
        ));
    }

    result
}

fn validate_delivery_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.delivery.hold_ttl.is_zero() {
        result = result.with_warning(
            ValidationIssue::new(
                "delivery.hold_ttl",
                "Hold TTL is zero; results for reconnecting clients are dropped immediately",
            )
            .with_suggestion("Set HOLD_TTL (default 60s)"),
        );
    }
    if config.delivery.hold_capacity == 0 {
        result = result.with_error(ValidationIssue::new(
            "delivery.hold_capacity",
            "Holding area capacity must be greater than zero",
        ));
    }
    if config.session.ttl.is_zero() {
        result = result.with_error(ValidationIssue::new(
            "session.ttl",
            "Session TTL must be greater than zero",
        ));
    }
    if config.gateway.max_connections == 0 {
        result = result.with_error(ValidationIssue::new(
            "gateway.max_connections",
            "Connection limit must be greater than zero",
        ));
    }

    result
}

fn validate_translator_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.translators.allowed.is_empty() {
        result = result.with_error(
            ValidationIssue::new("translators.allowed", "No translator backends are allowed")
                .with_suggestion("Set ALLOWED_TRANSLATORS, e.g. yandex,ardrey"),
        );
    }

    for name in &config.translators.allowed {
        if !config.translators.backends.contains_key(name) {
            result = result.with_warning(
                ValidationIssue::new(
                    format!("translators.backends.{}", name),
                    format!("Translator '{}' is allowed but has no endpoint; its jobs will fail", name),
                )
                .with_suggestion(format!(
                    "Set TRANSLATOR_{}_URL",
                    name.to_uppercase().replace('-', "_")
                )),
            );
        }
    }

    for (name, backend) in &config.translators.backends {
        if url::Url::parse(&backend.url).is_err() {
            result = result.with_error(ValidationIssue::new(
                format!("translators.backends.{}.url", name),
                format!("Invalid URL: {}", backend.url),
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpBackendConfig;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config, false);

        // Default config has no endpoints configured, so only warnings
        assert!(result.errors.is_empty());
        assert!(result.valid);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.path == "translators.backends.yandex"));
    }

    #[test]
    fn test_postgres_without_database_is_an_error() {
        let mut config = Config::default();
        config.queue.backend = QueueBackendType::Postgres;
        let result = validate_config(&config, true);
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.path == "storage.postgres"));
    }

    #[test]
    fn test_distributed_memory_backends_warn() {
        let config = Config::default();
        let result = validate_config(&config, true);
        assert!(result.warnings.iter().any(|w| w.path == "queue.backend"));
        assert!(result.warnings.iter().any(|w| w.path == "registry.backend"));
    }

    #[test]
    fn test_bad_backend_url() {
        let mut config = Config::default();
        config
            .translators
            .backends
            .insert("yandex".into(), HttpBackendConfig::new("not a url"));
        let result = validate_config(&config, false);
        assert!(result
            .errors
            .iter()
            .any(|e| e.path == "translators.backends.yandex.url"));
    }
}
