//! Deduplicating token accumulator
//!
//! Records are keyed by their identifier and kept in arrival order. The
//! first record seen under an identifier is the one that stays. Once the
//! store holds `target` records the accumulator reports completion, and that
//! flag never goes back.

use std::sync::Arc;

use indexmap::{IndexMap, map::Entry};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{Identifier, Record, record_identifier};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccumulatorError {
    #[error("Target must be greater than 0")]
    ZeroTarget,
}

/// Result of a single merge call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Records inserted by this call
    pub added: usize,
    /// Records dropped because no identifier field was usable
    pub skipped: usize,
    /// Store size after the call
    pub total: usize,
    /// Completion flag after the call
    pub done: bool,
}

#[derive(Debug, Clone)]
pub struct TokenAccumulator {
    store: IndexMap<Identifier, Record>,
    target: usize,
    done: bool,
}

impl TokenAccumulator {
    pub fn new(target: usize) -> Result<Self, AccumulatorError> {
        if target == 0 {
            return Err(AccumulatorError::ZeroTarget);
        }

        Ok(Self {
            store: IndexMap::new(),
            target,
            done: false,
        })
    }

    /// Merge a batch of records, first-seen wins.
    pub fn merge(&mut self, records: &[Record]) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        for record in records {
            let Some(identifier) = record_identifier(record) else {
                outcome.skipped += 1;
                continue;
            };

            if let Entry::Vacant(slot) = self.store.entry(identifier) {
                slot.insert(record.clone());
                outcome.added += 1;
            }
        }

        if !self.done && self.store.len() >= self.target {
            self.done = true;
            debug!("Target of {} records reached", self.target);
        }

        outcome.total = self.store.len();
        outcome.done = self.done;
        outcome
    }

    /// Up to `target` records in insertion order.
    pub fn snapshot(&self) -> Vec<Record> {
        self.store.values().take(self.target).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub const fn is_done(&self) -> bool {
        self.done
    }

    pub const fn target(&self) -> usize {
        self.target
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.store.contains_key(identifier)
    }
}

/// Accumulator handle shared by every concurrent batch attempt.
///
/// A merge holds the write lock for the whole call, so the presence check,
/// the insertion and the threshold check of one merge never interleave with
/// another merge.
#[derive(Debug, Clone)]
pub struct SharedAccumulator {
    inner: Arc<RwLock<TokenAccumulator>>,
}

impl SharedAccumulator {
    pub fn new(target: usize) -> Result<Self, AccumulatorError> {
        Ok(Self::from(TokenAccumulator::new(target)?))
    }

    pub async fn merge(&self, records: &[Record]) -> MergeOutcome {
        self.inner.write().await.merge(records)
    }

    pub async fn snapshot(&self) -> Vec<Record> {
        self.inner.read().await.snapshot()
    }

    pub async fn is_done(&self) -> bool {
        self.inner.read().await.is_done()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

impl From<TokenAccumulator> for SharedAccumulator {
    fn from(accumulator: TokenAccumulator) -> Self {
        Self {
            inner: Arc::new(RwLock::new(accumulator)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(records: &[Record]) -> Vec<String> {
        records
            .iter()
            .filter_map(record_identifier)
            .map(|id| id.to_string())
            .collect()
    }

    #[test]
    fn zero_target_is_rejected() {
        assert_eq!(TokenAccumulator::new(0).unwrap_err(), AccumulatorError::ZeroTarget);
        assert_eq!(TokenAccumulator::new(4).unwrap().target(), 4);
    }

    #[test]
    fn merging_twice_adds_nothing_the_second_time() {
        let mut acc = TokenAccumulator::new(10).unwrap();
        let batch = vec![json!({"id": "a"}), json!({"id": "b"})];

        assert_eq!(acc.merge(&batch).added, 2);
        let before = acc.snapshot();

        let second = acc.merge(&batch);
        assert_eq!(second.added, 0);
        assert_eq!(second.total, 2);
        assert_eq!(acc.snapshot(), before);
    }

    #[test]
    fn first_seen_record_is_kept_across_calls() {
        let mut acc = TokenAccumulator::new(10).unwrap();
        acc.merge(&[json!({"coinMint": "X", "name": "first"})]);
        acc.merge(&[json!({"coinMint": "X", "name": "second"})]);

        assert_eq!(acc.len(), 1);
        assert_eq!(acc.snapshot()[0]["name"], "first");
    }

    #[test]
    fn first_seen_record_is_kept_within_a_call() {
        let mut acc = TokenAccumulator::new(10).unwrap();
        let outcome = acc.merge(&[
            json!({"id": "X", "v": 1}),
            json!({"id": "X", "v": 2}),
        ]);

        assert_eq!(outcome.added, 1);
        assert_eq!(acc.snapshot(), vec![json!({"id": "X", "v": 1})]);
    }

    #[test]
    fn records_without_identifier_are_skipped() {
        let mut acc = TokenAccumulator::new(10).unwrap();
        let outcome = acc.merge(&[json!({"name": "anonymous"}), json!({"address": "B"})]);

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.skipped, 1);
        assert!(acc.contains(&Identifier::from("B")));
    }

    #[test]
    fn numeric_and_text_ids_are_separate_tokens() {
        let mut acc = TokenAccumulator::new(10).unwrap();
        let outcome = acc.merge(&[json!({"id": 1}), json!({"id": "1"})]);

        assert_eq!((outcome.added, outcome.total), (2, 2));
    }

    #[test]
    fn zero_id_falls_back_to_address() {
        let mut acc = TokenAccumulator::new(10).unwrap();
        let outcome = acc.merge(&[
            json!({"id": 0, "address": "X"}),
            json!({"id": 0, "address": "Y"}),
        ]);

        assert_eq!(outcome.added, 2);
        assert!(acc.contains(&Identifier::from("X")));
        assert!(acc.contains(&Identifier::from("Y")));
    }

    #[test]
    fn snapshot_is_truncated_to_target_in_insertion_order() {
        let mut acc = TokenAccumulator::new(3).unwrap();
        acc.merge(&[json!({"id": "c"}), json!({"id": "a"})]);
        acc.merge(&[json!({"id": "b"}), json!({"id": "d"})]);

        assert_eq!(acc.len(), 4);
        assert_eq!(ids(&acc.snapshot()), vec!["c", "a", "b"]);
    }

    #[test]
    fn done_flips_when_threshold_is_crossed_and_stays() {
        let mut acc = TokenAccumulator::new(2).unwrap();
        assert!(!acc.merge(&[json!({"id": 1})]).done);
        assert!(acc.merge(&[json!({"id": 2})]).done);
        assert!(acc.merge(&[]).done);
        assert!(acc.merge(&[json!({"id": 1})]).done);
        assert!(acc.is_done());
    }

    #[test]
    fn end_to_end_three_batches() {
        let mut acc = TokenAccumulator::new(5).unwrap();

        let first = acc.merge(&[json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]);
        assert_eq!((first.total, first.done), (3, false));

        let second = acc.merge(&[json!({"id": 3}), json!({"id": 4})]);
        assert_eq!((second.added, second.total, second.done), (1, 4, false));

        let third = acc.merge(&[json!({"id": 5}), json!({"id": 6})]);
        assert_eq!((third.total, third.done), (6, true));
        assert_eq!(acc.snapshot().len(), 5);
    }

    #[tokio::test]
    async fn concurrent_merges_never_duplicate() {
        let shared = SharedAccumulator::new(1_000).unwrap();
        let mut handles = Vec::new();

        for worker in 0..8 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                let batch: Vec<Record> = (0..100)
                    .map(|i| json!({"id": i, "worker": worker}))
                    .collect();
                shared.merge(&batch).await
            }));
        }

        let mut added = 0;
        for handle in handles {
            added += handle.await.unwrap().added;
        }

        assert_eq!(added, 100);
        assert_eq!(shared.len().await, 100);
        assert!(!shared.is_done().await);
    }
}
