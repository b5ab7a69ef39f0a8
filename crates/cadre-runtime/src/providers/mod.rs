//! Provider capabilities for cadre-runtime.
//!
//! A capability is one upstream text-generation service. It knows how to
//! make a call and how to report its own health; it knows nothing about
//! strategies, attempts or persistence.
//!
//! Built-in capabilities (`openai`, `anthropic`, `gemini`) are always
//! compiled. Their network path sits behind a cargo feature of the same
//! name; without it `generate` returns [`ProviderError::NotImplemented`].
//!
//! ## Security
//!
//! Credentials go through the [`secrets`] module. See [`ApiCredential`].

use async_trait::async_trait;
use cadre_core::RawOutput;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

mod anthropic;
mod factory;
mod gemini;
#[cfg(any(feature = "anthropic", feature = "openai", feature = "gemini"))]
mod http;
mod openai;
mod registry;
pub mod secrets;

pub use anthropic::{
    AnthropicProvider, AnthropicProviderFactory, ANTHROPIC_API_KEY_ENV, ANTHROPIC_MODEL_ENV,
};
pub use factory::{ProviderCatalog, ProviderFactory};
pub use gemini::{GeminiProvider, GeminiProviderFactory, GEMINI_API_KEY_ENV, GEMINI_MODEL_ENV};
pub use openai::{OpenAiProvider, OpenAiProviderFactory, OPENAI_API_KEY_ENV, OPENAI_MODEL_ENV};
pub use registry::ProviderRegistry;
pub use secrets::{ApiCredential, CredentialSource};

/// Errors raised by a capability call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// The capability exists but is intentionally stubbed.
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl ProviderError {
    pub fn is_not_implemented(&self) -> bool {
        matches!(self, ProviderError::NotImplemented(_))
    }

    /// Transient failures a capability may retry on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Per-call parameters, forwarded to the capability untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    /// Model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Temperature override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Provider-specific extras merged into the request body
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, JsonValue>,
}

impl CallParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Coarse health of a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    NotConfigured,
    /// Configured, but the capability cannot check reachability (stubbed).
    Unverified,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::NotConfigured => "not_configured",
            HealthStatus::Unverified => "unverified",
        }
    }
}

/// Result of a health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub provider: String,
    pub status: HealthStatus,
    pub configured: bool,
    pub reachable: bool,
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: HealthStatus::Healthy,
            configured: true,
            reachable: true,
            error: None,
        }
    }

    pub fn not_configured(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: HealthStatus::NotConfigured,
            configured: false,
            reachable: false,
            error: Some(error.into()),
        }
    }

    pub fn degraded(
        provider: impl Into<String>,
        configured: bool,
        error: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            status: HealthStatus::Degraded,
            configured,
            reachable: false,
            error: Some(error.into()),
        }
    }

    /// Configured, reachability unknown. Not a failure.
    pub fn unverified(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            status: HealthStatus::Unverified,
            configured: true,
            reachable: false,
            error: None,
        }
    }

    /// Report for a configured capability from the outcome of its
    /// reachability check. A not-implemented check is `unverified`.
    pub fn from_check(provider: impl Into<String>, check: Result<(), ProviderError>) -> Self {
        match check {
            Ok(()) => Self::healthy(provider),
            Err(e) if e.is_not_implemented() => Self::unverified(provider),
            Err(e) => Self::degraded(provider, true, e.to_string()),
        }
    }

    /// Healthy or unverified; only degraded and unconfigured reports fail.
    pub fn is_failing(&self) -> bool {
        matches!(self.status, HealthStatus::Degraded | HealthStatus::NotConfigured)
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// One upstream text-generation service.
///
/// # Contract
/// - `generate` returns an opaque payload or a [`ProviderError`]. Use
///   [`ProviderError::NotImplemented`] for stubbed capabilities.
/// - `health_probe` never fails; degradation goes into the report.
/// - Capabilities never persist anything. Retries, if any, happen here and
///   not in the engine.
#[async_trait]
pub trait ProviderCapability: Send + Sync {
    /// Registry id, e.g. "openai".
    fn id(&self) -> &str;

    /// Execute one generation call.
    async fn generate(&self, prompt: &str, params: &CallParams) -> Result<RawOutput, ProviderError>;

    /// Report configuration and reachability.
    async fn health_probe(&self) -> HealthReport;

    /// Model used when the call does not override it.
    fn default_model(&self) -> Option<&str> {
        None
    }
}

/// Read an optional non-empty string setting.
pub(crate) fn setting_str<'a>(settings: &'a JsonValue, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
}

/// Resolve a model name: settings, then environment, then the built-in default.
pub(crate) fn resolve_model(settings: &JsonValue, env_var: &str, default: &str) -> String {
    setting_str(settings, "model")
        .map(str::to_string)
        .or_else(|| std::env::var(env_var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| default.to_string())
}

/// Validate an optional `base_url` setting.
pub(crate) fn validate_base_url(settings: &JsonValue) -> Result<(), ProviderError> {
    if let Some(url) = setting_str(settings, "base_url") {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ProviderError::NotConfigured(
                "base_url must start with http:// or https://".to_string(),
            ));
        }
    }
    Ok(())
}
