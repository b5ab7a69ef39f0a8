//! API credentials for provider capabilities.
//!
//! Keys are wrapped in [`SecretString`] as soon as they are read, so they
//! never show up in `Debug`/`Display` output, logs or error messages. The
//! raw value is only reachable through [`ApiCredential::expose`], which
//! should be called at the point where a request header is set.
//!
//! Lookup order for every built-in provider is the same: the `api_key`
//! setting in the provider's config block, then an environment variable.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential came from. Safe to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CredentialSource::Config => "config",
            CredentialSource::Environment => "environment",
            CredentialSource::Programmatic => "programmatic",
        };
        f.write_str(label)
    }
}

/// A provider API key that refuses to be printed.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Read `config[config_key]`, falling back to `env_var`.
    ///
    /// Empty strings count as missing in both places.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config
            .get(config_key)
            .and_then(JsonValue::as_str)
            .filter(|v| !v.is_empty())
        {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        match std::env::var(env_var) {
            Ok(value) if !value.is_empty() => {
                Ok(Self::new(value, CredentialSource::Environment, name))
            }
            _ => Err(ProviderError::NotConfigured(format!(
                "{} required: set '{}' in config or the {} environment variable",
                name, config_key, env_var
            ))),
        }
    }

    /// Whether [`ApiCredential::from_config_or_env`] would succeed.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        let in_config = config
            .get(config_key)
            .and_then(JsonValue::as_str)
            .is_some_and(|v| !v.is_empty());
        in_config || std::env::var(env_var).is_ok_and(|v| !v.is_empty())
    }

    /// The raw key. Call only where the request is built.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// First six and last two characters, for startup diagnostics.
    ///
    /// Short keys are fully masked.
    pub fn hint(&self) -> String {
        const LEFT: usize = 6;
        const RIGHT: usize = 2;

        let chars: Vec<char> = self.value.expose_secret().chars().collect();
        if chars.len() <= LEFT + RIGHT {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..LEFT].iter().collect();
        let tail: String = chars[chars.len() - RIGHT..].iter().collect();
        format!("{}…{}", head, tail)
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}
