//! Scripted capability for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cadre_core::RawOutput;
use serde_json::json;

use crate::providers::{CallParams, HealthReport, ProviderCapability, ProviderError};

#[derive(Debug, Clone)]
enum Script {
    Return(RawOutput),
    Fail(ProviderError),
    Panic,
}

/// A capability that plays back one fixed outcome after an optional delay.
#[derive(Debug)]
pub(crate) struct ScriptedProvider {
    id: String,
    script: Script,
    delay: Duration,
    calls: AtomicUsize,
    probes: AtomicUsize,
}

impl ScriptedProvider {
    fn scripted(id: &str, script: Script) -> Self {
        Self {
            id: id.to_string(),
            script,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    /// Returns a mapping payload carrying `text`, a model and token usage.
    pub(crate) fn ok(id: &str, text: &str) -> Self {
        Self::with_raw(
            id,
            RawOutput::mapping(json!({
                "text": text,
                "model": format!("{}-model", id),
                "usage": {"prompt_tokens": 3, "completion_tokens": 5}
            })),
        )
    }

    pub(crate) fn with_raw(id: &str, raw: RawOutput) -> Self {
        Self::scripted(id, Script::Return(raw))
    }

    pub(crate) fn failing(id: &str, message: &str) -> Self {
        Self::scripted(id, Script::Fail(ProviderError::HttpError(message.to_string())))
    }

    pub(crate) fn not_implemented(id: &str) -> Self {
        Self::scripted(
            id,
            Script::Fail(ProviderError::NotImplemented(format!("{} is a stub", id))),
        )
    }

    pub(crate) fn panicking(id: &str) -> Self {
        Self::scripted(id, Script::Panic)
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderCapability for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, _prompt: &str, _params: &CallParams) -> Result<RawOutput, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            Script::Return(raw) => Ok(raw.clone()),
            Script::Fail(err) => Err(err.clone()),
            Script::Panic => panic!("scripted panic in {}", self.id),
        }
    }

    async fn health_probe(&self) -> HealthReport {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.script {
            Script::Fail(err) => HealthReport::degraded(&self.id, true, err.to_string()),
            _ => HealthReport::healthy(&self.id),
        }
    }
}
