//! Runtime configuration.
//!
//! ```yaml
//! engine:
//!   call_timeout: 30s      # "0s" disables the bound
//! health:
//!   cache_ttl: 5m
//!   max_entries: 256
//! providers:               # list order is registration order
//!   - id: openai
//!     settings:
//!       model: gpt-4o-mini
//!   - id: claude
//!     type: anthropic
//!     enabled: false
//! ```

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::providers::{ProviderCatalog, ProviderRegistry};

/// Errors from loading or applying configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid provider entry '{id}': {message}")]
    InvalidProvider { id: String, message: String },

    #[error("Unknown provider type '{provider_type}' for '{id}'. Available: {available:?}")]
    UnknownProviderType {
        id: String,
        provider_type: String,
        available: Vec<String>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub engine: EngineConfig,
    pub health: HealthConfig,
    pub providers: ProviderList,
}

/// Strategy engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on one `generate` call. Zero disables it.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn call_timeout(&self) -> Option<Duration> {
        (!self.call_timeout.is_zero()).then_some(self.call_timeout)
    }

    pub fn without_timeout() -> Self {
        Self {
            call_timeout: Duration::ZERO,
        }
    }
}

/// Health probe cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    pub max_entries: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            max_entries: 256,
        }
    }
}

/// Ordered provider entries. Defaults to openai, anthropic, gemini.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderList(pub Vec<ProviderEntry>);

impl Default for ProviderList {
    fn default() -> Self {
        Self(
            ["openai", "anthropic", "gemini"]
                .into_iter()
                .map(ProviderEntry::new)
                .collect(),
        )
    }
}

impl std::ops::Deref for ProviderList {
    type Target = [ProviderEntry];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One provider to register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Registry id
    pub id: String,

    /// Factory type. Defaults to the id.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub provider_type: Option<String>,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Passed to the factory untouched
    #[serde(default = "empty_settings")]
    pub settings: JsonValue,
}

fn enabled_by_default() -> bool {
    true
}

fn empty_settings() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl ProviderEntry {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            provider_type: None,
            enabled: true,
            settings: empty_settings(),
        }
    }

    pub fn provider_type(&self) -> &str {
        self.provider_type.as_deref().unwrap_or(&self.id)
    }
}

impl RuntimeConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for entry in self.providers.iter() {
            if entry.id.trim().is_empty() {
                return Err(ConfigError::InvalidProvider {
                    id: entry.id.clone(),
                    message: "id must not be empty".to_string(),
                });
            }
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::InvalidProvider {
                    id: entry.id.clone(),
                    message: "id is listed more than once".to_string(),
                });
            }
            if !entry.settings.is_object() {
                return Err(ConfigError::InvalidProvider {
                    id: entry.id.clone(),
                    message: "settings must be a mapping".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Build the registry from the enabled entries, in list order.
    ///
    /// An entry whose factory refuses it (usually a missing API key) is
    /// skipped with a warning. An unknown provider type is an error.
    pub fn build_registry(&self, catalog: &ProviderCatalog) -> Result<ProviderRegistry, ConfigError> {
        let mut registry = ProviderRegistry::new();

        for entry in self.providers.iter() {
            if !entry.enabled {
                tracing::debug!(provider = %entry.id, "Provider disabled in config");
                continue;
            }

            let provider_type = entry.provider_type();
            if !catalog.has_type(provider_type) {
                return Err(ConfigError::UnknownProviderType {
                    id: entry.id.clone(),
                    provider_type: provider_type.to_string(),
                    available: catalog
                        .available_types()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                });
            }

            match catalog.create(provider_type, &entry.id, &entry.settings) {
                Ok(capability) => registry.register(capability),
                Err(e) => {
                    tracing::warn!(
                        provider = %entry.id,
                        provider_type = %provider_type,
                        error = %e,
                        "Provider not registered"
                    );
                }
            }
        }

        Ok(registry)
    }
}
