//! The single durable record a caller writes per logical request.
//!
//! One request may fan out to many attempts, but it is persisted once.
//! This module only builds the value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttemptStatus, ExecutionTotals, StrategyExecution, StrategyKind};

/// Per-attempt line inside a [`UsageRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptSummary {
    pub seq: u32,
    pub provider: String,
    pub status: AttemptStatus,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Usage row for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub request_id: String,
    pub strategy: StrategyKind,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub winner_provider: Option<String>,
    pub winner_model: Option<String>,
    pub totals: ExecutionTotals,
    pub attempts: Vec<AttemptSummary>,
}

impl UsageRecord {
    pub fn from_execution(request_id: impl Into<String>, execution: &StrategyExecution) -> Self {
        let winner = execution.winner();
        Self {
            request_id: request_id.into(),
            strategy: execution.strategy(),
            started_at: execution.started_at(),
            elapsed_ms: execution.elapsed_ms(),
            winner_provider: winner.map(|w| w.provider.clone()),
            winner_model: winner.and_then(|w| w.model.clone()),
            totals: execution.totals(),
            attempts: execution
                .attempts()
                .iter()
                .map(|a| AttemptSummary {
                    seq: a.seq,
                    provider: a.provider.clone(),
                    status: a.status,
                    latency_ms: a.latency_ms,
                    error: a.error.clone(),
                })
                .collect(),
        }
    }
}
