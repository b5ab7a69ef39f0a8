//! OpenAI chat-completions capability.
//!
//! Returns the response body untouched as [`RawOutput::Object`]; the
//! normalizer picks the text out of `choices[0].message.content`.

use async_trait::async_trait;
use cadre_core::RawOutput;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

#[cfg(feature = "openai")]
use super::http;
use super::{
    factory::ProviderFactory,
    resolve_model,
    secrets::{ApiCredential, CredentialSource},
    setting_str, validate_base_url, CallParams, HealthReport, ProviderCapability, ProviderError,
};

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable overriding the default model.
pub const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MAX_TOKENS: u32 = 256;
const DEFAULT_MAX_RETRIES: usize = 2;

pub struct OpenAiProvider {
    id: String,
    credential: ApiCredential,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_retries: usize,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("id", &self.id)
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiProvider {
    /// Create a provider registered as `openai` with built-in defaults.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            id: "openai".to_string(),
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "OpenAI API key",
            ),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Build from a provider settings block.
    ///
    /// Recognised keys: `api_key`, `base_url`, `model`, `max_tokens`,
    /// `max_retries`. The key falls back to `OPENAI_API_KEY` and the model
    /// to `OPENAI_MODEL`.
    pub fn from_config(id: &str, settings: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            settings,
            "api_key",
            OPENAI_API_KEY_ENV,
            "OpenAI API key",
        )?;
        validate_base_url(settings)?;
        tracing::debug!(
            provider = %id,
            source = %credential.source(),
            key = %credential.hint(),
            "Loaded API key"
        );

        Ok(Self {
            id: id.to_string(),
            credential,
            base_url: setting_str(settings, "base_url")
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: resolve_model(settings, OPENAI_MODEL_ENV, DEFAULT_MODEL),
            max_tokens: settings
                .get("max_tokens")
                .and_then(JsonValue::as_u64)
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(DEFAULT_MAX_TOKENS),
            max_retries: settings
                .get("max_retries")
                .and_then(JsonValue::as_u64)
                .map(|v| v as usize)
                .unwrap_or(DEFAULT_MAX_RETRIES),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[cfg_attr(not(feature = "openai"), allow(dead_code))]
    fn request<'a>(&'a self, prompt: &'a str, params: &'a CallParams) -> ChatRequest<'a> {
        ChatRequest {
            model: params.model.as_deref().unwrap_or(&self.model),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: params.max_tokens.unwrap_or(self.max_tokens),
            temperature: params.temperature,
            extra: &params.extra,
        }
    }

    #[cfg(feature = "openai")]
    async fn send_once(&self, request: &ChatRequest<'_>) -> Result<JsonValue, ProviderError> {
        // Only expose the credential at the point of use
        let response = http::client()?
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.credential.expose())
            .json(request)
            .send()
            .await
            .map_err(http::send_error)?;
        http::read_json(response).await
    }

    #[cfg(feature = "openai")]
    async fn check_reachable(&self) -> Result<(), ProviderError> {
        let response = http::client()?
            .get(format!("{}/models", self.base_url))
            .bearer_auth(self.credential.expose())
            .send()
            .await
            .map_err(http::send_error)?;
        http::read_json(response).await.map(|_| ())
    }

    #[cfg(not(feature = "openai"))]
    async fn check_reachable(&self) -> Result<(), ProviderError> {
        Err(not_compiled())
    }
}

#[cfg(not(feature = "openai"))]
fn not_compiled() -> ProviderError {
    ProviderError::NotImplemented("OpenAI support requires the 'openai' feature".to_string())
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(flatten)]
    extra: &'a BTreeMap<String, JsonValue>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[async_trait]
impl ProviderCapability for OpenAiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    #[cfg(feature = "openai")]
    async fn generate(&self, prompt: &str, params: &CallParams) -> Result<RawOutput, ProviderError> {
        let request = self.request(prompt, params);
        let body =
            http::with_retries(&self.id, self.max_retries, || self.send_once(&request)).await?;
        Ok(RawOutput::object(body))
    }

    #[cfg(not(feature = "openai"))]
    async fn generate(
        &self,
        _prompt: &str,
        _params: &CallParams,
    ) -> Result<RawOutput, ProviderError> {
        Err(not_compiled())
    }

    async fn health_probe(&self) -> HealthReport {
        if self.credential.is_empty() {
            return HealthReport::not_configured(&self.id, "No API key configured");
        }
        HealthReport::from_check(&self.id, self.check_reachable().await)
    }

    fn default_model(&self) -> Option<&str> {
        Some(&self.model)
    }
}

/// Factory for OpenAI capabilities.
///
/// ## Configuration Format
/// ```json
/// {
///   "api_key": "sk-...",        // Optional, falls back to OPENAI_API_KEY env
///   "base_url": "https://...",  // Optional, custom API endpoint
///   "model": "gpt-4o-mini",     // Optional, falls back to OPENAI_MODEL env
///   "max_tokens": 256,
///   "max_retries": 2
/// }
/// ```
pub struct OpenAiProviderFactory;

impl ProviderFactory for OpenAiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "openai"
    }

    fn create(
        &self,
        id: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn ProviderCapability>, ProviderError> {
        Ok(Arc::new(OpenAiProvider::from_config(id, settings)?))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(settings, "api_key", OPENAI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "OpenAI API key required: set 'api_key' in config or {} env",
                OPENAI_API_KEY_ENV
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
        "OpenAI chat completions"
    }
}
