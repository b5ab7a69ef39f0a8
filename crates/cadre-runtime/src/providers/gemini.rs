//! Google Gemini `generateContent` capability.

use async_trait::async_trait;
use cadre_core::RawOutput;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

#[cfg(feature = "gemini")]
use super::http;
use super::{
    factory::ProviderFactory,
    resolve_model,
    secrets::{ApiCredential, CredentialSource},
    setting_str, validate_base_url, CallParams, HealthReport, ProviderCapability, ProviderError,
};

/// Environment variable name for the Gemini API key.
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Environment variable overriding the default model.
pub const GEMINI_MODEL_ENV: &str = "GEMINI_MODEL";

const DEFAULT_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MAX_RETRIES: usize = 2;

pub struct GeminiProvider {
    id: String,
    credential: ApiCredential,
    base_url: String,
    model: String,
    max_retries: usize,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("id", &self.id)
            .field("credential", &self.credential)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            id: "gemini".to_string(),
            credential: ApiCredential::new(
                api_key,
                CredentialSource::Programmatic,
                "Gemini API key",
            ),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn from_config(id: &str, settings: &JsonValue) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_config_or_env(
            settings,
            "api_key",
            GEMINI_API_KEY_ENV,
            "Gemini API key",
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
            model: resolve_model(settings, GEMINI_MODEL_ENV, DEFAULT_MODEL),
            max_retries: settings
                .get("max_retries")
                .and_then(JsonValue::as_u64)
                .map_or(DEFAULT_MAX_RETRIES, |v| v as usize),
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

    #[cfg_attr(not(feature = "gemini"), allow(dead_code))]
    fn endpoint(&self, params: &CallParams) -> String {
        let model = params.model.as_deref().unwrap_or(&self.model);
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    /// Sampling parameters and call extras both land in `generationConfig`.
    #[cfg_attr(not(feature = "gemini"), allow(dead_code))]
    fn request<'a>(&self, prompt: &'a str, params: &CallParams) -> GenerateRequest<'a> {
        let mut config = Map::new();
        if let Some(temperature) = params.temperature {
            config.insert("temperature".to_string(), JsonValue::from(temperature));
        }
        if let Some(max_tokens) = params.max_tokens {
            config.insert("maxOutputTokens".to_string(), JsonValue::from(max_tokens));
        }
        for (key, value) in &params.extra {
            config.insert(key.clone(), value.clone());
        }

        GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: (!config.is_empty()).then_some(config),
        }
    }

    #[cfg(feature = "gemini")]
    async fn send_once(
        &self,
        url: &str,
        request: &GenerateRequest<'_>,
    ) -> Result<JsonValue, ProviderError> {
        let response = http::client()?
            .post(url)
            .header("x-goog-api-key", self.credential.expose())
            .json(request)
            .send()
            .await
            .map_err(http::send_error)?;
        http::read_json(response).await
    }

    #[cfg(feature = "gemini")]
    async fn check_reachable(&self) -> Result<(), ProviderError> {
        let response = http::client()?
            .get(format!("{}/models/{}", self.base_url, self.model))
            .header("x-goog-api-key", self.credential.expose())
            .send()
            .await
            .map_err(http::send_error)?;
        http::read_json(response).await.map(|_| ())
    }

    #[cfg(not(feature = "gemini"))]
    async fn check_reachable(&self) -> Result<(), ProviderError> {
        Err(not_compiled())
    }
}

#[cfg(not(feature = "gemini"))]
fn not_compiled() -> ProviderError {
    ProviderError::NotImplemented("Gemini support requires the 'gemini' feature".to_string())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<Map<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[async_trait]
impl ProviderCapability for GeminiProvider {
    fn id(&self) -> &str {
        &self.id
    }

    #[cfg(feature = "gemini")]
    async fn generate(&self, prompt: &str, params: &CallParams) -> Result<RawOutput, ProviderError> {
        let url = self.endpoint(params);
        let request = self.request(prompt, params);
        let body = http::with_retries(&self.id, self.max_retries, || {
            self.send_once(&url, &request)
        })
        .await?;
        Ok(RawOutput::object(body))
    }

    #[cfg(not(feature = "gemini"))]
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

/// Factory for Gemini capabilities.
///
/// Accepts `api_key`, `base_url`, `model` and `max_retries`.
pub struct GeminiProviderFactory;

impl ProviderFactory for GeminiProviderFactory {
    fn provider_type(&self) -> &'static str {
        "gemini"
    }

    fn create(
        &self,
        id: &str,
        settings: &JsonValue,
    ) -> Result<Arc<dyn ProviderCapability>, ProviderError> {
        Ok(Arc::new(GeminiProvider::from_config(id, settings)?))
    }

    fn validate_config(&self, settings: &JsonValue) -> Result<(), ProviderError> {
        if !ApiCredential::is_available(settings, "api_key", GEMINI_API_KEY_ENV) {
            return Err(ProviderError::NotConfigured(format!(
                "Gemini API key required: set 'api_key' in config or {} env",
                GEMINI_API_KEY_ENV
            )));
        }
        validate_base_url(settings)
    }

    fn default_config(&self) -> JsonValue {
        serde_json::json!({ "model": DEFAULT_MODEL })
    }

    fn description(&self) -> &'static str {
        "Google Gemini generateContent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_uses_call_model() {
        let provider = GeminiProvider::new("key");
        assert_eq!(
            provider.endpoint(&CallParams::new()),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert!(provider
            .endpoint(&CallParams::new().with_model("gemini-1.5-pro"))
            .ends_with("/models/gemini-1.5-pro:generateContent"));
    }

    #[test]
    fn test_request_merges_generation_config() {
        let provider = GeminiProvider::new("key");
        let params = CallParams::new()
            .with_max_tokens(32)
            .with_extra("topK", json!(4));

        let body = serde_json::to_value(provider.request("hello", &params)).unwrap();
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 32);
        assert_eq!(body["generationConfig"]["topK"], 4);
        assert!(body["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn test_request_without_params_has_no_generation_config() {
        let provider = GeminiProvider::new("key");
        let body = serde_json::to_value(provider.request("hello", &CallParams::new())).unwrap();
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn test_from_config() {
        let provider =
            GeminiProvider::from_config("gemini", &json!({"api_key": "k", "model": "gemini-2.0"}))
                .unwrap();
        assert_eq!(provider.default_model(), Some("gemini-2.0"));
    }

    #[test]
    fn test_factory_rejects_bad_base_url() {
        let factory = GeminiProviderFactory;
        assert_eq!(factory.provider_type(), "gemini");
        assert!(factory
            .validate_config(&json!({"api_key": "k", "base_url": "nope"}))
            .is_err());
    }

    #[tokio::test]
    async fn test_health_without_key() {
        let report = GeminiProvider::new("").health_probe().await;
        assert_eq!(report.provider, "gemini");
        assert!(!report.configured);
    }
}
