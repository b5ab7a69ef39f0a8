//! Anthropic messages capability.
//!
//! ## Security
//!
//! The API key is held in an [`ApiCredential`] and only exposed when the
//! `x-api-key` header is set. See the [`secrets`](super::secrets) module.

use async_trait::async_trait;
use cadre_core::RawOutput;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "anthropic")]
use super::http;
use super::{
    factory::ProviderFactory,
    resolve_model,
    secrets::{ApiCredential, CredentialSource},
    setting_str, validate_base_url, CallParams, HealthReport, ProviderCapability, ProviderError,
};

/// Environment variable name for the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Environment variable overriding the default model.
pub const ANTHROPIC_MODEL_ENV: &str = "ANTHROPIC_MODEL";

const DEFAULT_MODEL: &str = "claude-opus-4-1-20250805";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1000;
const DEFAULT_MAX_RETRIES: usize = 2;

/// Anthropic Claude capability.
///
/// The Messages API requires `max_tokens`, so one is always sent: the call
/// parameter when given, otherwise the configured default.
pub struct AnthropicProvider {
    id: String,
    credential: ApiCredential,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_retries: usize,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("id", &self.id)
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            id: "anthropic".to_string(),
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "Anthropic API key",
            ),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create from a settings block with environment fallback.
    ///
    /// 1. `api_key` in the settings, else `ANTHROPIC_API_KEY`
    /// 2. `model` in the settings, else `ANTHROPIC_MODEL`, else the default
    pub fn from_config(id: &str, settings: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            settings,
            "api_key",
            ANTHROPIC_API_KEY_ENV,
            "Anthropic API key",
        )?;
        validate_base_url(settings)?;
        tracing::debug!(
            provider = %id,
            source = %credential.source(),
            key = %credential.hint(),
            "Loaded API key"
        );

        let max_tokens = settings
            .get("max_tokens")
            .and_then(JsonValue::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let max_retries = settings
            .get("max_retries")
            .and_then(JsonValue::as_u64)
            .map_or(DEFAULT_MAX_RETRIES, |v| v as usize);

        Ok(Self {
            id: id.to_string(),
            credential,
            base_url: setting_str(settings, "base_url")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: resolve_model(settings, ANTHROPIC_MODEL_ENV, DEFAULT_MODEL),
            max_tokens,
            max_retries,
        })
    }

    /// Set custom base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[cfg_attr(not(feature = "anthropic"), allow(dead_code))]
    fn request<'a>(&'a self, prompt: &'a str, params: &'a CallParams) -> MessagesRequest<'a> {
        MessagesRequest {
            model: params.model.as_deref().unwrap_or(&self.model),
            max_tokens: params.max_tokens.unwrap_or(self.max_tokens),
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            extra: &params.extra,
        }
    }

    #[cfg(feature = "anthropic")]
    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
    }

    #[cfg(feature = "anthropic")]
    async fn send_once(&self, request: &MessagesRequest<'_>) -> Result<JsonValue, ProviderError> {
        let builder = http::client()?.post(format!("{}/messages", self.base_url));
        let response = self
            .authorized(builder)
            .json(request)
            .send()
            .await
            .map_err(http::send_error)?;
        http::read_json(response).await
    }

    #[cfg(feature = "anthropic")]
    async fn check_reachable(&self) -> Result<(), ProviderError> {
        let builder = http::client()?.get(format!("{}/models", self.base_url));
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(http::send_error)?;
        http::read_json(response).await.map(|_| ())
    }

    #[cfg(not(feature = "anthropic"))]
    async fn check_reachable(&self) -> Result<(), ProviderError> {
        Err(not_compiled())
    }
}

#[cfg(not(feature = "anthropic"))]
fn not_compiled() -> ProviderError {
    ProviderError::NotImplemented(format!(
        "Anthropic support requires the 'anthropic' feature (api version {})",
        API_VERSION
    ))
}

/// Anthropic API request format.
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(flatten)]
    extra: &'a BTreeMap<String, JsonValue>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[async_trait]
impl ProviderCapability for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    #[cfg(feature = "anthropic")]
    async fn generate(&self, prompt: &str, params: &CallParams) -> Result<RawOutput, ProviderError> {
        let request = self.request(prompt, params);
        let body =
            http::with_retries(&self.id, self.max_retries, || self.send_once(&request)).await?;
        Ok(RawOutput::object(body))
    }

    #[cfg(not(feature = "anthropic"))]
    async fn generate(
        &self,
        _prompt: &str,
        _params: &CallParams,
    ) -> Result<RawOutput, ProviderError> {
        Err(not_compiled())
    }

    async fn health_probe(&self) -> HealthReport {
        // Checks only that a key is present, never logs it
        if self.credential.is_empty() {
            return HealthReport::not_configured(&self.id, "No API key configured");
        }
        HealthReport::from_check(&self.id, self.check_reachable().await)
    }

    fn default_model(&self) -> Option<&str> {
        Some(&self.model)
    }
}

/// Factory for creating Anthropic capabilities from configuration.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-ant-...",             // Optional, falls back to ANTHROPIC_API_KEY env
///   "base_url": "https://...",            // Optional, custom API endpoint
///   "model": "claude-opus-4-1-20250805",  // Optional, falls back to ANTHROPIC_MODEL env
///   "max_tokens": 1000
/// }
/// ```
pub struct AnthropicProviderFactory;

impl ProviderFactory for AnthropicProviderFactory {
    fn provider_type(&self) -> &'static str {
        "anthropic"
    }

    fn create(
        &self,
        id: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn ProviderCapability>, ProviderError> {
        let provider = AnthropicProvider::from_config(id, settings)?;
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError> {
        // Check credential availability without loading
        if !ApiCredential::is_available(settings, "api_key", ANTHROPIC_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Anthropic API key required: set 'api_key' in config or {} env",
                ANTHROPIC_API_KEY_ENV
            )));
        }
        validate_base_url(settings)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({
            "model": DEFAULT_MODEL,
            "max_tokens": DEFAULT_MAX_TOKENS
        })
    }

    fn description(&self) -> &'static str {
        "Anthropic Claude messages API"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_creation() {
        let provider = AnthropicProvider::new("test-key");
        assert_eq!(provider.id(), "anthropic");
        assert_eq!(provider.default_model(), Some(DEFAULT_MODEL));
    }

    #[test]
    fn test_request_always_sends_max_tokens() {
        let provider = AnthropicProvider::new("test-key").with_model("claude-haiku");
        let body = serde_json::to_value(provider.request("ping", &CallParams::new())).unwrap();
        assert_eq!(body["model"], "claude-haiku");
        assert_eq!(body["max_tokens"], 1000);
        assert_eq!(body["messages"][0]["content"], "ping");

        let params = CallParams::new().with_max_tokens(12);
        let body = serde_json::to_value(provider.request("ping", &params)).unwrap();
        assert_eq!(body["max_tokens"], 12);
    }

    #[test]
    fn test_from_config_with_api_key() {
        let config = json!({
            "api_key": "config-api-key",
            "base_url": "https://custom.api.com/v1"
        });
        let provider = AnthropicProvider::from_config("claude", &config).unwrap();
        assert_eq!(provider.id(), "claude");
        assert_eq!(provider.base_url, "https://custom.api.com/v1");
    }

    #[test]
    fn test_factory_validate_invalid_base_url() {
        let factory = AnthropicProviderFactory;
        let config = json!({
            "api_key": "test-key",
            "base_url": "invalid-url"
        });
        assert!(factory.validate_config(&config).is_err());
    }

    #[test]
    fn test_factory_metadata() {
        let factory = AnthropicProviderFactory;
        assert_eq!(factory.provider_type(), "anthropic");
        assert_eq!(factory.default_config()["max_tokens"], 1000);
        assert!(factory.description().contains("Anthropic"));
    }

    #[test]
    fn test_api_key_not_in_debug_output() {
        let secret_key = "sk-ant-REDACTED";
        let provider = AnthropicProvider::new(secret_key);
        let debug_output = format!("{:?}", provider);

        assert!(
            !debug_output.contains(secret_key),
            "API key was exposed in Debug output!"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_health_without_key() {
        let report = AnthropicProvider::new("").health_probe().await;
        assert!(!report.configured);
        assert!(!report.is_healthy());
    }

    #[cfg(not(feature = "anthropic"))]
    #[tokio::test]
    async fn test_stubbed_without_feature() {
        let provider = AnthropicProvider::new("test-key");
        let err = provider
            .generate("hi", &CallParams::new())
            .await
            .unwrap_err();
        assert!(err.is_not_implemented());

        let report = provider.health_probe().await;
        assert!(report.configured);
        assert_eq!(report.status, crate::providers::HealthStatus::Unverified);
        assert_eq!(report.error, None);
    }
}
