//! # cadre-runtime
//!
//! Async half of Cadre: provider capabilities, the ordered registry and
//! the strategy engine that runs `single`, `fallback` and `all` over it.
//!
//! The deterministic pieces (normalizer, attempt ledger, execution types)
//! live in `cadre-core` and are re-exported here for convenience.
//!
//! ## Features
//!
//! - `openai`, `anthropic`, `gemini`: enable the HTTP path of the matching
//!   capability. Without them the capability is registered but every call
//!   records `not_implemented`.
//! - `all-providers`: all of the above.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cadre_runtime::{CallParams, ProviderCatalog, RuntimeConfig, StrategyEngine};
//!
//! let config = RuntimeConfig::from_file("cadre.yaml")?;
//! let registry = config.build_registry(&ProviderCatalog::with_defaults())?;
//! let engine = StrategyEngine::builder()
//!     .registry(registry)
//!     .config(config.engine.clone())
//!     .build();
//!
//! let execution = engine.fallback("Say hi", "openai", &CallParams::new()).await?;
//! println!("{:?}", execution.winner());
//! ```

pub mod config;
pub mod detached;
pub mod engine;
pub mod health;
pub mod providers;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, EngineConfig, HealthConfig, ProviderEntry, RuntimeConfig};
pub use detached::{DetachedStats, DetachedTasks};
pub use engine::{EngineError, StrategyEngine, StrategyEngineBuilder};
pub use health::HealthMonitor;
pub use providers::{
    CallParams, HealthReport, HealthStatus, ProviderCapability, ProviderCatalog, ProviderError,
    ProviderFactory, ProviderRegistry,
};

pub use cadre_core::{
    Attempt, AttemptStatus, ExecutionTotals, Normalizer, ProviderResult, RawOutput,
    StrategyExecution, StrategyKind, UsageRecord,
};
