//! # cadre-core
//!
//! Deterministic half of Cadre's multi-provider response orchestration.
//!
//! This crate never talks to the network. It defines:
//! - The execution data model ([`ProviderResult`], [`Attempt`], [`StrategyExecution`])
//! - The [`Normalizer`] that turns raw provider payloads into results
//! - The [`AttemptLedger`] that orders attempts and picks the winner
//! - The [`UsageRecord`] a caller persists once per request
//!
//! The async strategy engine lives in `cadre-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use cadre_core::{Normalizer, RawOutput};
//! use serde_json::json;
//!
//! let raw = RawOutput::mapping(json!({
//!     "text": "hi",
//!     "usage": {"prompt_tokens": 3, "completion_tokens": 5}
//! }));
//! let result = Normalizer::new().normalize("openai", &raw, 120);
//!
//! assert_eq!(result.text.as_deref(), Some("hi"));
//! assert_eq!(result.tokens_in, Some(3));
//! ```

pub mod ledger;
pub mod normalize;
pub mod types;
pub mod usage;

// Re-export main types at crate root
pub use ledger::{AttemptLedger, LedgerError};
pub use normalize::{AutoExtractor, Normalizer, OutputExtractor, RawOutput, Shape};
pub use types::{
    Attempt, AttemptStatus, ExecutionTotals, ProviderResult, StrategyExecution, StrategyKind,
};
pub use usage::{AttemptSummary, UsageRecord};
