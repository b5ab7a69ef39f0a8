//! Attempt ledger: the ordered record of every call in one execution.
//!
//! The ledger is addressed by sequence number, not by arrival. Concurrent
//! units each own exactly one slot, so whatever order they settle in, the
//! assembled attempts come out in registration order.
//!
//! Winner selection is fixed policy: the first successful slot by sequence
//! number wins. Completion timing never participates.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Attempt, AttemptStatus, ProviderResult, StrategyExecution, StrategyKind};

/// Errors from misusing the ledger.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Sequence {seq} is outside the ledger (capacity {capacity})")]
    SlotOutOfRange { seq: u32, capacity: usize },

    #[error("Sequence {seq} was recorded twice")]
    SlotTaken { seq: u32 },

    #[error("Sequence {seq} was never recorded")]
    SlotMissing { seq: u32 },
}

#[derive(Debug, Clone)]
struct Entry {
    attempt: Attempt,
    result: Option<ProviderResult>,
}

/// Slot-per-sequence record of attempts.
#[derive(Debug, Clone)]
pub struct AttemptLedger {
    slots: Vec<Option<Entry>>,
    fixed: bool,
    keep_text: bool,
}

impl AttemptLedger {
    /// A ledger that grows by one slot per recorded attempt.
    ///
    /// Used by sequential strategies, which only know their attempt count
    /// once they stop.
    pub fn sequential() -> Self {
        Self {
            slots: Vec::new(),
            fixed: false,
            keep_text: false,
        }
    }

    /// A ledger with exactly `count` slots, one per registered provider.
    pub fn with_slots(count: usize) -> Self {
        Self {
            slots: vec![None; count],
            fixed: true,
            keep_text: false,
        }
    }

    /// Retain generated text on successful attempts.
    pub fn keep_text(mut self, keep: bool) -> Self {
        self.keep_text = keep;
        self
    }

    /// Sequence number the next sequential attempt should use.
    pub fn next_seq(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots that have been recorded.
    pub fn recorded(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Record a call that returned.
    pub fn record_success(&mut self, seq: u32, result: ProviderResult) -> Result<(), LedgerError> {
        let attempt = Attempt::succeeded(seq, &result, self.keep_text);
        self.place(Entry {
            attempt,
            result: Some(result),
        })
    }

    /// Record a call that raised or was not implemented.
    pub fn record_failure(
        &mut self,
        seq: u32,
        provider: &str,
        status: AttemptStatus,
        latency_ms: Option<u64>,
        error: impl Into<String>,
    ) -> Result<(), LedgerError> {
        debug_assert!(!status.is_ok(), "failures cannot carry the ok status");
        let attempt = Attempt::failed(seq, provider, status, latency_ms, error);
        self.place(Entry {
            attempt,
            result: None,
        })
    }

    fn place(&mut self, entry: Entry) -> Result<(), LedgerError> {
        let seq = entry.attempt.seq;
        let index = seq as usize;

        if !self.fixed && index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }

        let capacity = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(LedgerError::SlotOutOfRange { seq, capacity })?;

        if slot.is_some() {
            return Err(LedgerError::SlotTaken { seq });
        }
        *slot = Some(entry);
        Ok(())
    }

    /// Sequence number of the first successful slot.
    pub fn winning_seq(&self) -> Option<u32> {
        self.slots
            .iter()
            .flatten()
            .find(|e| e.attempt.status.is_ok() && e.result.is_some())
            .map(|e| e.attempt.seq)
    }

    /// Assemble the final execution. Every slot must have been recorded.
    pub fn finish(
        self,
        strategy: StrategyKind,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
    ) -> Result<StrategyExecution, LedgerError> {
        let mut attempts = Vec::with_capacity(self.slots.len());
        let mut winner = None;

        for (index, slot) in self.slots.into_iter().enumerate() {
            let entry = slot.ok_or(LedgerError::SlotMissing { seq: index as u32 })?;
            if winner.is_none() && entry.attempt.status.is_ok() {
                winner = entry.result;
            }
            attempts.push(entry.attempt);
        }

        Ok(StrategyExecution::new(
            strategy, started_at, elapsed_ms, winner, attempts,
        ))
    }
}
