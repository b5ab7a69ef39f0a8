//! Provider factories for building capabilities from configuration.
//!
//! A [`ProviderCatalog`] maps a provider *type* ("openai") to the factory
//! that builds it. The same type can back several registry ids, e.g. two
//! OpenAI-compatible endpoints registered as "openai" and "local".
//!
//! ## Usage
//!
//! ```ignore
//! let catalog = ProviderCatalog::with_defaults();
//! let capability = catalog.create("openai", "primary", &settings)?;
//! registry.register(capability);
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use super::{ProviderCapability, ProviderError};

/// Builds capabilities of one provider type.
pub trait ProviderFactory: Send + Sync {
    /// Unique type identifier, e.g. "anthropic".
    fn provider_type(&self) -> &'static str;

    /// Create a capability registered under `id`.
    fn create(
        &self,
        id: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn ProviderCapability>, ProviderError>;

    /// Validate settings without creating a capability.
    ///
    /// Use this for fast config validation during startup.
    fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError>;

    fn default_config(&self) -> JsonValue {
        serde_json::json!({})
    }

    fn description(&self) -> &'static str {
        "Text generation provider"
    }
}

/// Factories keyed by provider type.
#[derive(Default, Clone)]
pub struct ProviderCatalog {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. An existing factory of the same type is replaced.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    /// Create a capability of `provider_type` registered under `id`.
    pub fn create(
        &self,
        provider_type: &str,
        id: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn ProviderCapability>, ProviderError> {
        self.factory(provider_type)?.create(id, settings)
    }

    /// Validate settings for a provider type.
    pub fn validate(&self, provider_type: &str, settings: &JsonValue) -> Result<(), ProviderError> {
        self.factory(provider_type)?.validate_config(settings)
    }

    /// Provider types in alphabetical order.
    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn has_type(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    pub fn get_factory(&self, provider_type: &str) -> Option<&Arc<dyn ProviderFactory>> {
        self.factories.get(provider_type)
    }

    pub fn default_config(&self, provider_type: &str) -> Option<JsonValue> {
        self.factories
            .get(provider_type)
            .map(|f| f.default_config())
    }

    /// Catalog with the built-in `openai`, `anthropic` and `gemini` factories.
    ///
    /// All three are always present; without their cargo feature the
    /// capabilities they build report `not_implemented`.
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(super::OpenAiProviderFactory));
        catalog.register(Arc::new(super::AnthropicProviderFactory));
        catalog.register(Arc::new(super::GeminiProviderFactory));
        catalog
    }

    fn factory(&self, provider_type: &str) -> Result<&Arc<dyn ProviderFactory>, ProviderError> {
        self.factories.get(provider_type).ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "Unknown provider type: '{}'. Available: {:?}",
                provider_type,
                self.available_types()
            ))
        })
    }
}

impl std::fmt::Debug for ProviderCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCatalog")
            .field("types", &self.available_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProvider;
    use serde_json::json;

    struct ScriptedFactory;

    impl ProviderFactory for ScriptedFactory {
        fn provider_type(&self) -> &'static str {
            "scripted"
        }

        fn create(
            &self,
            id: &str,
            settings: &JsonValue,
        ) -> Result<Arc<dyn ProviderCapability>, ProviderError> {
            self.validate_config(settings)?;
            let text = settings["text"].as_str().unwrap_or_default();
            Ok(Arc::new(ScriptedProvider::ok(id, text)))
        }

        fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError> {
            if settings.get("text").is_none() {
                return Err(ProviderError::NotConfigured("text required".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_defaults_are_registered() {
        let catalog = ProviderCatalog::with_defaults();
        assert_eq!(catalog.available_types(), vec!["anthropic", "gemini", "openai"]);
        assert!(catalog.has_type("openai"));
        assert!(!catalog.has_type("cohere"));
        assert!(catalog.default_config("gemini").is_some());
    }

    #[test]
    fn test_create_uses_requested_id() {
        let mut catalog = ProviderCatalog::new();
        catalog.register(Arc::new(ScriptedFactory));

        let capability = catalog
            .create("scripted", "local", &json!({"text": "hi"}))
            .unwrap();
        assert_eq!(capability.id(), "local");
        assert!(catalog.validate("scripted", &json!({})).is_err());
    }

    #[test]
    fn test_unknown_type_lists_available() {
        let catalog = ProviderCatalog::with_defaults();
        let err = catalog.create("cohere", "cohere", &json!({})).err().unwrap();
        match err {
            ProviderError::NotConfigured(msg) => {
                assert!(msg.contains("cohere"));
                assert!(msg.contains("openai"));
            }
            other => panic!("expected NotConfigured, got {:?}", other),
        }
    }
}
