//! Data model shared by every strategy.
//!
//! All of these are plain values: the engine builds them once per call and
//! hands them to the caller, which owns persistence and formatting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The policy that decides which providers are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Exactly one named provider.
    Single,
    /// Preferred provider first, then the rest in registration order.
    Fallback,
    /// Every registered provider concurrently.
    All,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Single => "single",
            StrategyKind::Fallback => "fallback",
            StrategyKind::All => "all",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// The call returned. Text may still be absent on a normalization miss.
    Ok,
    /// The call raised.
    Error,
    /// The capability is intentionally stubbed. Not a reachability failure.
    NotImplemented,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Ok => "ok",
            AttemptStatus::Error => "error",
            AttemptStatus::NotImplemented => "not_implemented",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AttemptStatus::Ok)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized output of a single successful call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    /// Registry id of the provider that answered
    pub provider: String,

    /// Model reported by the provider, if any
    pub model: Option<String>,

    /// Generated text. `None` when no known shape yielded text.
    pub text: Option<String>,

    /// Wall-clock time of the call
    pub latency_ms: u64,

    /// Prompt/input tokens
    pub tokens_in: Option<u64>,

    /// Completion/output tokens
    pub tokens_out: Option<u64>,

    /// Cost reported by the provider wrapper
    pub cost_usd: Option<f64>,
}

impl ProviderResult {
    /// A result carrying only the provider id and timing.
    pub fn empty(provider: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            provider: provider.into(),
            model: None,
            text: None,
            latency_ms,
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
        }
    }

    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// One recorded call within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    /// Position in try/registration order, never completion order
    pub seq: u32,
    pub provider: String,
    pub model: Option<String>,
    /// Only retained by the fan-out strategy
    pub text: Option<String>,
    pub status: AttemptStatus,
    pub latency_ms: Option<u64>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
    pub cost_usd: Option<f64>,
    pub error: Option<String>,
}

impl Attempt {
    /// Attempt for a call that returned.
    pub fn succeeded(seq: u32, result: &ProviderResult, keep_text: bool) -> Self {
        Self {
            seq,
            provider: result.provider.clone(),
            model: result.model.clone(),
            text: if keep_text { result.text.clone() } else { None },
            status: AttemptStatus::Ok,
            latency_ms: Some(result.latency_ms),
            tokens_in: result.tokens_in,
            tokens_out: result.tokens_out,
            cost_usd: result.cost_usd,
            error: None,
        }
    }

    /// Attempt for a call that raised or was not implemented.
    pub fn failed(
        seq: u32,
        provider: impl Into<String>,
        status: AttemptStatus,
        latency_ms: Option<u64>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            seq,
            provider: provider.into(),
            model: None,
            text: None,
            status,
            latency_ms,
            tokens_in: None,
            tokens_out: None,
            cost_usd: None,
            error: Some(error.into()),
        }
    }
}

/// Sums over the attempts of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTotals {
    pub attempts: u32,
    pub ok: u32,
    pub errors: u32,
    pub not_implemented: u32,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost_usd: f64,
}

/// The immutable result of one strategy invocation.
///
/// Attempts are always ordered by `seq`. There is at most one winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyExecution {
    strategy: StrategyKind,
    started_at: DateTime<Utc>,
    elapsed_ms: u64,
    winner: Option<ProviderResult>,
    attempts: Vec<Attempt>,
}

impl StrategyExecution {
    /// Build an execution. Attempts are sorted by sequence number.
    pub fn new(
        strategy: StrategyKind,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
        winner: Option<ProviderResult>,
        mut attempts: Vec<Attempt>,
    ) -> Self {
        attempts.sort_by_key(|a| a.seq);
        Self {
            strategy,
            started_at,
            elapsed_ms,
            winner,
            attempts,
        }
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn winner(&self) -> Option<&ProviderResult> {
        self.winner.as_ref()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    /// The attempt that produced the winner.
    pub fn winner_attempt(&self) -> Option<&Attempt> {
        let winner = self.winner.as_ref()?;
        self.attempts
            .iter()
            .find(|a| a.status.is_ok() && a.provider == winner.provider)
    }

    /// Token, cost and status counts. Absent values are skipped.
    pub fn totals(&self) -> ExecutionTotals {
        let mut totals = ExecutionTotals::default();
        for attempt in &self.attempts {
            totals.attempts += 1;
            match attempt.status {
                AttemptStatus::Ok => totals.ok += 1,
                AttemptStatus::Error => totals.errors += 1,
                AttemptStatus::NotImplemented => totals.not_implemented += 1,
            }
            totals.tokens_in += attempt.tokens_in.unwrap_or(0);
            totals.tokens_out += attempt.tokens_out.unwrap_or(0);
            totals.cost_usd += attempt.cost_usd.unwrap_or(0.0);
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(provider: &str) -> ProviderResult {
        ProviderResult {
            provider: provider.to_string(),
            model: Some("m-1".to_string()),
            text: Some("hello".to_string()),
            latency_ms: 12,
            tokens_in: Some(3),
            tokens_out: Some(5),
            cost_usd: Some(0.25),
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&AttemptStatus::NotImplemented).unwrap();
        assert_eq!(json, "\"not_implemented\"");
        assert_eq!(AttemptStatus::Ok.to_string(), "ok");
        assert_eq!(StrategyKind::Fallback.to_string(), "fallback");
    }

    #[test]
    fn test_succeeded_attempt_drops_text_unless_kept() {
        let r = result("a");
        assert_eq!(Attempt::succeeded(0, &r, false).text, None);
        assert_eq!(
            Attempt::succeeded(0, &r, true).text.as_deref(),
            Some("hello")
        );
    }

    #[test]
    fn test_execution_sorts_attempts() {
        let attempts = vec![
            Attempt::failed(2, "c", AttemptStatus::Error, None, "boom"),
            Attempt::succeeded(0, &result("a"), true),
            Attempt::failed(1, "b", AttemptStatus::NotImplemented, None, "stub"),
        ];
        let exec = StrategyExecution::new(StrategyKind::All, Utc::now(), 40, None, attempts);
        let seqs: Vec<u32> = exec.attempts().iter().map(|a| a.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_totals_skip_missing_values() {
        let attempts = vec![
            Attempt::succeeded(0, &result("a"), true),
            Attempt::succeeded(1, &result("b"), true),
            Attempt::failed(2, "c", AttemptStatus::Error, Some(4), "boom"),
            Attempt::failed(3, "d", AttemptStatus::NotImplemented, None, "stub"),
        ];
        let exec = StrategyExecution::new(
            StrategyKind::All,
            Utc::now(),
            40,
            Some(result("a")),
            attempts,
        );
        let totals = exec.totals();
        assert_eq!(totals.attempts, 4);
        assert_eq!(totals.ok, 2);
        assert_eq!(totals.errors, 1);
        assert_eq!(totals.not_implemented, 1);
        assert_eq!(totals.tokens_in, 6);
        assert_eq!(totals.tokens_out, 10);
        assert!((totals.cost_usd - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_winner_attempt_matches_winner_provider() {
        let attempts = vec![
            Attempt::failed(0, "a", AttemptStatus::Error, None, "boom"),
            Attempt::succeeded(1, &result("b"), false),
        ];
        let exec = StrategyExecution::new(
            StrategyKind::Fallback,
            Utc::now(),
            10,
            Some(result("b")),
            attempts,
        );
        assert_eq!(exec.winner_attempt().map(|a| a.seq), Some(1));
    }
}
