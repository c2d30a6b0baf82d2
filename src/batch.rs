//! Decode batch staging.
//!
//! A [`BatchBuilder`] assembles the `(token, position, sequence ids,
//! want_logits)` entries handed to one forward-pass invocation of the
//! model executor. It is a pure staging structure: step-scoped, cleared
//! and refilled between steps, and ignorant of model internals.
//!
//! Capacity is fixed at construction (from `GenerationConfig::n_batch`);
//! exceeding it is an error, never a silent truncation.

use crate::core::sequence::SequenceId;
use crate::error::{Error, Result};
use crate::vocab::TokenId;

/// One token slot of a decode batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Token id to feed at this position.
    pub token: TokenId,
    /// Position within the owning sequences (monotonic per sequence).
    pub pos: usize,
    /// Sequences this entry belongs to (never empty).
    pub seq_ids: Vec<SequenceId>,
    /// Whether the executor should return logits for this entry.
    pub want_logits: bool,
}

/// Fixed-capacity staging structure for one forward pass.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    entries: Vec<BatchEntry>,
    capacity: usize,
}

impl BatchBuilder {
    /// Create a builder holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Reset to zero entries, keeping the capacity.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Append one entry.
    ///
    /// Fails with [`Error::CapacityExceeded`] when the batch is full and
    /// [`Error::EmptySequenceSet`] when `seq_ids` is empty; staged entries
    /// are left intact in both cases.
    pub fn add(
        &mut self,
        token: TokenId,
        pos: usize,
        seq_ids: &[SequenceId],
        want_logits: bool,
    ) -> Result<()> {
        if self.entries.len() >= self.capacity {
            return Err(Error::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        if seq_ids.is_empty() {
            return Err(Error::EmptySequenceSet);
        }

        self.entries.push(BatchEntry {
            token,
            pos,
            seq_ids: seq_ids.to_vec(),
            want_logits,
        });
        Ok(())
    }

    /// Current entry count.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured maximum entry count.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Staged entries in insertion order.
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Number of entries with logits requested; the executor returns one
    /// logits vector per such entry, in batch order.
    pub fn num_logit_entries(&self) -> usize {
        self.entries.iter().filter(|e| e.want_logits).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_clear_resets_size() {
        let mut batch = BatchBuilder::new(4);
        batch.add(7, 0, &[1], true).unwrap();
        batch.add(9, 1, &[1], false).unwrap();
        assert_eq!(batch.size(), 2);

        batch.clear();
        assert_eq!(batch.size(), 0);
        assert!(batch.is_empty());
        assert_eq!(batch.capacity(), 4);
    }

    #[test]
    fn capacity_exceeded_keeps_prior_entries() {
        let mut batch = BatchBuilder::new(2);
        batch.add(1, 0, &[0], false).unwrap();
        batch.add(2, 1, &[0], true).unwrap();

        let err = batch.add(3, 2, &[0], true).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::CapacityExceeded { capacity: 2 }
        ));
        assert_eq!(batch.size(), 2);
        assert_eq!(batch.entries()[1].token, 2);
    }

    #[test]
    fn empty_sequence_set_rejected() {
        let mut batch = BatchBuilder::new(2);
        let err = batch.add(1, 0, &[], true).unwrap_err();
        assert!(matches!(err, crate::error::Error::EmptySequenceSet));
        assert_eq!(batch.size(), 0);
    }

    #[test]
    fn logit_entries_counted() {
        let mut batch = BatchBuilder::new(8);
        batch.add(1, 0, &[0], false).unwrap();
        batch.add(2, 1, &[0], true).unwrap();
        batch.add(3, 2, &[0, 1], true).unwrap();
        assert_eq!(batch.num_logit_entries(), 2);
    }
}
