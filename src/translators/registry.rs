//! Translator registry - backend selector → translator

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::HttpTranslator;
use crate::config::TranslatorsConfig;
use crate::core::Translator;
use crate::error::Result;

/// Registry of available translation backends
#[derive(Clone, Default)]
pub struct TranslatorRegistry {
    translators: HashMap<String, Arc<dyn Translator>>,
}

impl TranslatorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP translators for every configured endpoint
    pub fn from_config(config: &TranslatorsConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (name, backend) in &config.backends {
            registry.register(HttpTranslator::new(name.clone(), backend)?);
            info!(backend = %name, url = %backend.url, "translator registered");
        }
        Ok(registry)
    }

    /// Register a translator under its own name
    pub fn register<T: Translator + 'static>(&mut self, translator: T) {
        self.register_arc(Arc::new(translator));
    }

    /// Register a shared translator
    pub fn register_arc(&mut self, translator: Arc<dyn Translator>) {
        self.translators
            .insert(translator.name().to_lowercase(), translator);
    }

    /// Look up by selector (case-insensitive)
    pub fn get(&self, name: &str) -> Option<Arc<dyn Translator>> {
        self.translators.get(&name.to_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.translators.contains_key(&name.to_lowercase())
    }

    /// Get translator count
    pub fn count(&self) -> usize {
        self.translators.len()
    }

    /// List translator names
    pub fn names(&self) -> Vec<&str> {
        self.translators.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpBackendConfig;

    #[test]
    fn test_from_config() {
        let mut config = TranslatorsConfig::default();
        config
            .backends
            .insert("Yandex".into(), HttpBackendConfig::new("http://localhost:1/translate"));

        let registry = TranslatorRegistry::from_config(&config).unwrap();
        assert_eq!(registry.count(), 1);
        assert!(registry.contains("yandex"));
        assert!(registry.get("YANDEX").is_some());
        assert!(registry.get("ardrey").is_none());
    }
}
