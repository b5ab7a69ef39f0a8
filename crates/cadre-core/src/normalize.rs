//! Output normalization.
//!
//! Providers return whatever their upstream API hands back. The normalizer
//! turns that raw payload plus the measured latency into a [`ProviderResult`].
//!
//! ## Resolution order
//!
//! 1. A per-provider override extractor, if one is registered. It replaces
//!    auto-detection entirely.
//! 2. Otherwise the [`AutoExtractor`] walks [`Shape::CHAIN`] and stops at the
//!    first shape that yields non-empty text.
//!
//! A payload that matches no shape still produces a result: the text is
//! `None` and a warning is logged. Normalization never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::types::ProviderResult;

const TEXT_KEYS: [&str; 3] = ["text", "content", "output"];

/// Raw payload returned by a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum RawOutput {
    /// Flat key/value wrapper, e.g. `{"text": .., "usage": {..}}`.
    Mapping(JsonValue),

    /// Structured upstream response body, read field by field.
    Object(JsonValue),
}

impl RawOutput {
    pub fn mapping(body: JsonValue) -> Self {
        Self::Mapping(body)
    }

    pub fn object(body: JsonValue) -> Self {
        Self::Object(body)
    }

    pub fn body(&self) -> &JsonValue {
        match self {
            RawOutput::Mapping(body) | RawOutput::Object(body) => body,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RawOutput::Mapping(_) => "mapping",
            RawOutput::Object(_) => "object",
        }
    }
}

/// One payload layout the auto-detector knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Mapping with a `text`/`content`/`output` key.
    MappingText,
    /// Object exposing a `text`/`content`/`output` field.
    AttributeText,
    /// `choices[0].message.content`
    ChatCompletion,
    /// `content: [{text}, ..]`, joined with newlines.
    MessageBlocks,
    /// `candidates[0]` with `content` or `text`.
    Candidates,
}

impl Shape {
    /// Detection order.
    pub const CHAIN: [Shape; 5] = [
        Shape::MappingText,
        Shape::AttributeText,
        Shape::ChatCompletion,
        Shape::MessageBlocks,
        Shape::Candidates,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Shape::MappingText => "mapping_text",
            Shape::AttributeText => "attribute_text",
            Shape::ChatCompletion => "chat_completion",
            Shape::MessageBlocks => "message_blocks",
            Shape::Candidates => "candidates",
        }
    }

    /// Try to read text in this shape. `None` means fall through.
    pub fn extract_text(&self, raw: &RawOutput) -> Option<String> {
        match (self, raw) {
            (Shape::MappingText, RawOutput::Mapping(body)) => first_text_key(body),
            (Shape::AttributeText, RawOutput::Object(body)) => first_text_key(body),
            (Shape::MappingText, _) | (Shape::AttributeText, _) => None,
            (Shape::ChatCompletion, raw) => chat_completion_text(raw.body()),
            (Shape::MessageBlocks, raw) => message_blocks_text(raw.body()),
            (Shape::Candidates, raw) => candidate_text(raw.body()),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Converts a raw payload into a [`ProviderResult`].
///
/// Implemented for plain closures so overrides can be registered inline.
pub trait OutputExtractor: Send + Sync {
    fn extract(&self, provider_id: &str, raw: &RawOutput, latency_ms: u64) -> ProviderResult;
}

impl<F> OutputExtractor for F
where
    F: Fn(&str, &RawOutput, u64) -> ProviderResult + Send + Sync,
{
    fn extract(&self, provider_id: &str, raw: &RawOutput, latency_ms: u64) -> ProviderResult {
        self(provider_id, raw, latency_ms)
    }
}

/// Generic multi-shape extractor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoExtractor;

impl AutoExtractor {
    /// First shape in [`Shape::CHAIN`] that yields text.
    pub fn detect(raw: &RawOutput) -> Option<(Shape, String)> {
        Shape::CHAIN
            .iter()
            .find_map(|shape| shape.extract_text(raw).map(|text| (*shape, text)))
    }
}

impl OutputExtractor for AutoExtractor {
    fn extract(&self, provider_id: &str, raw: &RawOutput, latency_ms: u64) -> ProviderResult {
        let body = raw.body();
        let text = match Self::detect(raw) {
            Some((shape, text)) => {
                tracing::trace!(provider = %provider_id, shape = %shape, "Extracted text");
                Some(text)
            }
            None => {
                tracing::warn!(
                    provider = %provider_id,
                    raw_kind = raw.kind(),
                    "No text extracted from provider output"
                );
                None
            }
        };

        let (tokens_in, tokens_out) = token_counts(body);

        ProviderResult {
            provider: provider_id.to_string(),
            model: model_name(body),
            text,
            latency_ms,
            tokens_in,
            tokens_out,
            cost_usd: body.get("cost_usd").and_then(JsonValue::as_f64),
        }
    }
}

/// Override table plus the auto-detecting default.
#[derive(Clone, Default)]
pub struct Normalizer {
    overrides: BTreeMap<String, Arc<dyn OutputExtractor>>,
    auto: AutoExtractor,
}

impl Normalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an override for one provider, replacing any previous one.
    pub fn register_override(
        &mut self,
        provider_id: impl Into<String>,
        extractor: Arc<dyn OutputExtractor>,
    ) {
        self.overrides.insert(provider_id.into(), extractor);
    }

    /// Builder form of [`Normalizer::register_override`].
    pub fn with_override(
        mut self,
        provider_id: impl Into<String>,
        extractor: Arc<dyn OutputExtractor>,
    ) -> Self {
        self.register_override(provider_id, extractor);
        self
    }

    pub fn has_override(&self, provider_id: &str) -> bool {
        self.overrides.contains_key(provider_id)
    }

    pub fn normalize(&self, provider_id: &str, raw: &RawOutput, latency_ms: u64) -> ProviderResult {
        match self.overrides.get(provider_id) {
            Some(extractor) => extractor.extract(provider_id, raw, latency_ms),
            None => self.auto.extract(provider_id, raw, latency_ms),
        }
    }
}

impl fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Normalizer")
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

// Shape readers

fn non_empty_str(value: Option<&JsonValue>) -> Option<String> {
    value
        .and_then(JsonValue::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn first_text_key(body: &JsonValue) -> Option<String> {
    TEXT_KEYS.iter().find_map(|key| non_empty_str(body.get(key)))
}

fn chat_completion_text(body: &JsonValue) -> Option<String> {
    let first = body.get("choices")?.as_array()?.first()?;
    non_empty_str(first.get("message")?.get("content"))
}

fn message_blocks_text(body: &JsonValue) -> Option<String> {
    let blocks = body.get("content")?.as_array()?;
    let parts: Vec<&str> = blocks
        .iter()
        .filter_map(|block| block.get("text").and_then(JsonValue::as_str))
        .filter(|t| !t.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

fn candidate_text(body: &JsonValue) -> Option<String> {
    let first = body.get("candidates")?.as_array()?.first()?;
    if let Some(text) = non_empty_str(first.get("content")) {
        return Some(text);
    }
    if let Some(text) = non_empty_str(first.get("text")) {
        return Some(text);
    }
    // Structured content: {"parts": [{"text": ..}, ..]}
    let parts = first.get("content")?.get("parts")?.as_array()?;
    let joined: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(JsonValue::as_str))
        .collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

fn model_name(body: &JsonValue) -> Option<String> {
    non_empty_str(body.get("model")).or_else(|| non_empty_str(body.get("modelVersion")))
}

fn token_counts(body: &JsonValue) -> (Option<u64>, Option<u64>) {
    let as_u64 = |v: Option<&JsonValue>| v.and_then(JsonValue::as_u64);
    let usage = body.get("usage");
    let usage_field = |keys: &[&str]| {
        usage.and_then(|u| keys.iter().find_map(|k| as_u64(u.get(*k))))
    };
    let metadata = body.get("usageMetadata");
    let metadata_field = |key: &str| metadata.and_then(|m| as_u64(m.get(key)));

    let tokens_in = as_u64(body.get("tokens_in"))
        .or_else(|| usage_field(&["prompt_tokens", "input_tokens"]))
        .or_else(|| metadata_field("promptTokenCount"));
    let tokens_out = as_u64(body.get("tokens_out"))
        .or_else(|| usage_field(&["completion_tokens", "output_tokens"]))
        .or_else(|| metadata_field("candidatesTokenCount"));

    (tokens_in, tokens_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mapping_with_usage() {
        let raw = RawOutput::mapping(json!({
            "text": "hi",
            "usage": {"prompt_tokens": 3, "completion_tokens": 5}
        }));
        let result = Normalizer::new().normalize("openai", &raw, 42);

        assert_eq!(result.provider, "openai");
        assert_eq!(result.text.as_deref(), Some("hi"));
        assert_eq!(result.tokens_in, Some(3));
        assert_eq!(result.tokens_out, Some(5));
        assert_eq!(result.latency_ms, 42);
    }

    #[test]
    fn test_mapping_prefers_direct_token_keys() {
        let raw = RawOutput::mapping(json!({
            "output": "done",
            "model": "wrapper-1",
            "tokens_in": 7,
            "tokens_out": 1,
            "cost_usd": 0.002,
            "usage": {"prompt_tokens": 100, "completion_tokens": 100}
        }));
        let result = Normalizer::new().normalize("w", &raw, 0);
        assert_eq!(result.text.as_deref(), Some("done"));
        assert_eq!(result.model.as_deref(), Some("wrapper-1"));
        assert_eq!(result.tokens_in, Some(7));
        assert_eq!(result.tokens_out, Some(1));
        assert_eq!(result.cost_usd, Some(0.002));
    }

    #[test]
    fn test_empty_text_key_falls_through_to_next_key() {
        let raw = RawOutput::mapping(json!({"text": "", "content": "from content"}));
        let (shape, text) = AutoExtractor::detect(&raw).unwrap();
        assert_eq!(shape, Shape::MappingText);
        assert_eq!(text, "from content");
    }

    #[test]
    fn test_attribute_text_only_for_objects() {
        let body = json!({"text": "plain"});
        assert_eq!(
            Shape::AttributeText.extract_text(&RawOutput::object(body.clone())),
            Some("plain".to_string())
        );
        assert_eq!(
            Shape::AttributeText.extract_text(&RawOutput::mapping(body)),
            None
        );
    }

    #[test]
    fn test_chat_completion_shape() {
        let raw = RawOutput::object(json!({
            "model": "gpt-4o-mini",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "pong"}}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2}
        }));
        assert_eq!(
            AutoExtractor::detect(&raw).map(|(s, _)| s),
            Some(Shape::ChatCompletion)
        );
        let result = Normalizer::new().normalize("openai", &raw, 5);
        assert_eq!(result.text.as_deref(), Some("pong"));
        assert_eq!(result.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(result.tokens_in, Some(9));
    }

    #[test]
    fn test_message_blocks_joined_with_newlines() {
        let raw = RawOutput::object(json!({
            "model": "claude",
            "content": [
                {"type": "text", "text": "first"},
                {"type": "tool_use", "id": "x"},
                {"type": "text", "text": "second"}
            ],
            "usage": {"input_tokens": 11, "output_tokens": 4}
        }));
        let result = Normalizer::new().normalize("anthropic", &raw, 1);
        assert_eq!(result.text.as_deref(), Some("first\nsecond"));
        assert_eq!(result.tokens_in, Some(11));
        assert_eq!(result.tokens_out, Some(4));
    }

    #[test]
    fn test_candidates_with_parts() {
        let raw = RawOutput::object(json!({
            "modelVersion": "gemini-1.5-flash",
            "candidates": [{"content": {"parts": [{"text": "a"}, {"text": "b"}]}}],
            "usageMetadata": {"promptTokenCount": 6, "candidatesTokenCount": 2}
        }));
        let result = Normalizer::new().normalize("gemini", &raw, 1);
        assert_eq!(result.text.as_deref(), Some("ab"));
        assert_eq!(result.model.as_deref(), Some("gemini-1.5-flash"));
        assert_eq!(result.tokens_in, Some(6));
        assert_eq!(result.tokens_out, Some(2));
    }

    #[test]
    fn test_candidates_with_text_field() {
        let raw = RawOutput::object(json!({"candidates": [{"text": "plain candidate"}]}));
        assert_eq!(
            AutoExtractor::detect(&raw),
            Some((Shape::Candidates, "plain candidate".to_string()))
        );
    }

    #[test]
    fn test_miss_keeps_metadata_and_null_text() {
        let raw = RawOutput::object(json!({"model": "odd", "data": [1, 2, 3]}));
        let result = Normalizer::new().normalize("odd", &raw, 8);
        assert_eq!(result.text, None);
        assert_eq!(result.model.as_deref(), Some("odd"));
        assert_eq!(result.latency_ms, 8);
    }

    #[test]
    fn test_override_bypasses_detection() {
        let normalizer = Normalizer::new().with_override(
            "custom",
            Arc::new(|id: &str, raw: &RawOutput, latency: u64| ProviderResult {
                text: raw
                    .body()
                    .get("answer")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
                ..ProviderResult::empty(id, latency)
            }),
        );
        assert!(normalizer.has_override("custom"));

        // Would match MappingText under auto-detection
        let raw = RawOutput::mapping(json!({"text": "ignored", "answer": "42"}));
        let result = normalizer.normalize("custom", &raw, 3);
        assert_eq!(result.text.as_deref(), Some("42"));

        // Other providers still auto-detect
        let other = normalizer.normalize("other", &raw, 3);
        assert_eq!(other.text.as_deref(), Some("ignored"));
    }
}
