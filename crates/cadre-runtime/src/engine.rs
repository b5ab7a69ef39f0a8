//! Strategy engine.
//!
//! Runs one of three policies over the provider registry and returns a
//! [`StrategyExecution`]:
//! - `single`: one named provider, one attempt
//! - `fallback`: preferred provider first, then the rest in registration
//!   order, stopping at the first success
//! - `all`: every provider concurrently; waits for all of them, then picks
//!   the first success by registration order
//!
//! Per-provider failures never escape. They are recorded as `error` or
//! `not_implemented` attempts. The engine performs no retries and no
//! persistence.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::Instant;

use cadre_core::{
    AttemptLedger, AttemptStatus, LedgerError, Normalizer, ProviderResult, StrategyExecution,
    StrategyKind,
};

use crate::config::EngineConfig;
use crate::providers::{CallParams, ProviderCapability, ProviderError, ProviderRegistry};

/// Errors from the strategy engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown provider '{id}'. Registered: {registered:?}")]
    UnknownProvider { id: String, registered: Vec<String> },

    #[error("Attempt ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// How one call ended.
#[derive(Debug)]
enum CallOutcome {
    Returned(ProviderResult),
    Failed {
        status: AttemptStatus,
        latency_ms: u64,
        error: String,
    },
}

impl CallOutcome {
    fn succeeded(&self) -> bool {
        matches!(self, CallOutcome::Returned(_))
    }
}

/// Multi-provider strategy engine.
///
/// Cheap to clone. The registry is shared read-only; build a new engine to
/// change it.
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    registry: Arc<ProviderRegistry>,
    normalizer: Arc<Normalizer>,
    config: EngineConfig,
}

impl StrategyEngine {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            normalizer: Arc::new(Normalizer::new()),
            config: EngineConfig::default(),
        }
    }

    pub fn builder() -> StrategyEngineBuilder {
        StrategyEngineBuilder::new()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Call exactly one provider.
    ///
    /// An unregistered id fails immediately with
    /// [`EngineError::UnknownProvider`] and records nothing. A failed call
    /// is one failed attempt and no winner.
    pub async fn single(
        &self,
        provider_id: &str,
        prompt: &str,
        params: &CallParams,
    ) -> Result<StrategyExecution, EngineError> {
        let capability = self
            .registry
            .get(provider_id)
            .ok_or_else(|| self.unknown_provider(provider_id))?;

        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::debug!(strategy = "single", provider = %provider_id, "Strategy started");

        let mut ledger = AttemptLedger::sequential();
        let outcome = self.invoke(provider_id, capability.as_ref(), prompt, params).await;
        record(&mut ledger, 0, provider_id, outcome)?;

        self.seal(ledger, StrategyKind::Single, started_at, clock)
    }

    /// Try `preferred`, then every other provider in registration order,
    /// until one succeeds.
    ///
    /// Providers after the winner are never called. An unregistered
    /// `preferred` is recorded as an `error` attempt and the walk continues.
    pub async fn fallback(
        &self,
        prompt: &str,
        preferred: &str,
        params: &CallParams,
    ) -> Result<StrategyExecution, EngineError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::debug!(strategy = "fallback", preferred = %preferred, "Strategy started");

        let mut ledger = AttemptLedger::sequential();
        for id in self.registry.fallback_order(preferred) {
            let seq = ledger.next_seq();

            let Some(capability) = self.registry.get(id) else {
                tracing::warn!(provider = %id, seq, "Preferred provider is not registered");
                ledger.record_failure(
                    seq,
                    id,
                    AttemptStatus::Error,
                    None,
                    format!("Unknown provider: {}", id),
                )?;
                continue;
            };

            let outcome = self.invoke(id, capability.as_ref(), prompt, params).await;
            let succeeded = outcome.succeeded();
            record(&mut ledger, seq, id, outcome)?;
            if succeeded {
                break;
            }
        }

        self.seal(ledger, StrategyKind::Fallback, started_at, clock)
    }

    /// Call every registered provider concurrently.
    ///
    /// Each provider runs as its own task and owns the ledger slot at its
    /// registration position. The engine waits for every task to settle;
    /// the winner is the first success by position, not by completion time.
    /// Dropping the returned future cancels the tasks still running.
    pub async fn all(
        &self,
        prompt: &str,
        params: &CallParams,
    ) -> Result<StrategyExecution, EngineError> {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::debug!(strategy = "all", providers = self.registry.len(), "Strategy started");

        let prompt: Arc<str> = Arc::from(prompt);
        let params = Arc::new(params.clone());
        let ids: Vec<String> = self.registry.ids().into_iter().map(str::to_string).collect();

        // Dropping the set aborts every unit still in flight
        let mut units = JoinSet::new();
        for (seq, (id, capability)) in self.registry.iter().enumerate() {
            let engine = self.clone();
            let id = id.to_string();
            let capability = Arc::clone(capability);
            let prompt = Arc::clone(&prompt);
            let params = Arc::clone(&params);
            units.spawn(async move {
                let outcome = engine
                    .invoke(&id, capability.as_ref(), &prompt, &params)
                    .await;
                (seq, outcome)
            });
        }

        let mut slots: Vec<Option<CallOutcome>> = ids.iter().map(|_| None).collect();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((seq, outcome)) => slots[seq] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "Provider task did not complete"),
            }
        }

        let mut ledger = AttemptLedger::with_slots(ids.len()).keep_text(true);
        for (seq, (id, slot)) in ids.iter().zip(slots).enumerate() {
            let outcome = slot.unwrap_or_else(|| CallOutcome::Failed {
                status: AttemptStatus::Error,
                latency_ms: elapsed_ms(clock),
                error: "Provider task did not complete".to_string(),
            });
            record(&mut ledger, seq as u32, id, outcome)?;
        }

        self.seal(ledger, StrategyKind::All, started_at, clock)
    }

    /// One timed, bounded call followed by normalization. A panic inside
    /// `generate` becomes an `error` outcome.
    async fn invoke(
        &self,
        id: &str,
        capability: &dyn ProviderCapability,
        prompt: &str,
        params: &CallParams,
    ) -> CallOutcome {
        let clock = Instant::now();
        let call = AssertUnwindSafe(capability.generate(prompt, params)).catch_unwind();
        let settled = match self.config.call_timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Ok(Err(ProviderError::Timeout(limit)))),
            None => call.await,
        };
        let latency_ms = elapsed_ms(clock);

        match settled {
            Ok(Ok(raw)) => CallOutcome::Returned(self.normalizer.normalize(id, &raw, latency_ms)),
            Ok(Err(e)) => CallOutcome::Failed {
                status: if e.is_not_implemented() {
                    AttemptStatus::NotImplemented
                } else {
                    AttemptStatus::Error
                },
                latency_ms,
                error: e.to_string(),
            },
            Err(panic) => {
                tracing::error!(provider = %id, "Provider panicked during generate");
                CallOutcome::Failed {
                    status: AttemptStatus::Error,
                    latency_ms,
                    error: format!("Provider panicked: {}", panic_message(panic.as_ref())),
                }
            }
        }
    }

    fn seal(
        &self,
        ledger: AttemptLedger,
        strategy: StrategyKind,
        started_at: chrono::DateTime<Utc>,
        clock: Instant,
    ) -> Result<StrategyExecution, EngineError> {
        let execution = ledger.finish(strategy, started_at, elapsed_ms(clock))?;
        tracing::debug!(
            strategy = %strategy,
            attempts = execution.attempts().len(),
            winner = execution.winner().map(|w| w.provider.as_str()).unwrap_or("none"),
            elapsed_ms = execution.elapsed_ms(),
            "Strategy finished"
        );
        Ok(execution)
    }

    fn unknown_provider(&self, id: &str) -> EngineError {
        EngineError::UnknownProvider {
            id: id.to_string(),
            registered: self.registry.ids().into_iter().map(str::to_string).collect(),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

fn record(
    ledger: &mut AttemptLedger,
    seq: u32,
    id: &str,
    outcome: CallOutcome,
) -> Result<(), LedgerError> {
    match outcome {
        CallOutcome::Returned(result) => {
            tracing::debug!(
                provider = %id,
                seq,
                status = "ok",
                latency_ms = result.latency_ms,
                has_text = result.has_text(),
                "Provider attempt succeeded"
            );
            ledger.record_success(seq, result)
        }
        CallOutcome::Failed {
            status,
            latency_ms,
            error,
        } => {
            if status == AttemptStatus::NotImplemented {
                tracing::info!(provider = %id, seq, status = %status, "Provider not implemented");
            } else {
                tracing::warn!(
                    provider = %id,
                    seq,
                    status = %status,
                    latency_ms,
                    error = %error,
                    "Provider attempt failed"
                );
            }
            ledger.record_failure(seq, id, status, Some(latency_ms), error)
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Builder for [`StrategyEngine`].
#[derive(Default)]
pub struct StrategyEngineBuilder {
    registry: ProviderRegistry,
    normalizer: Normalizer,
    config: EngineConfig,
}

impl StrategyEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn provider(mut self, capability: Arc<dyn ProviderCapability>) -> Self {
        self.registry.register(capability);
        self
    }

    pub fn normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    pub fn build(self) -> StrategyEngine {
        StrategyEngine {
            registry: Arc::new(self.registry),
            normalizer: Arc::new(self.normalizer),
            config: self.config,
        }
    }
}
