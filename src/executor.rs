//! Model executor interface.
//!
//! Tensor arithmetic, attention, and KV-cache storage live behind this
//! trait; this crate only stages batches for it and consumes the logits
//! it returns. One `forward` call is one blocking step: the executor
//! computes logits for every entry that requested them, in batch order.

use crate::batch::BatchBuilder;
use crate::error::Result;
use crate::kv::KVCacheView;

/// External model executor consumed by the generation loop.
pub trait ModelExecutor {
    /// Run one forward pass over the staged batch.
    ///
    /// Returns one logits vector (length = vocabulary size) per entry
    /// with `want_logits` set, in the order those entries were added.
    fn forward(&mut self, batch: &BatchBuilder) -> Result<Vec<Vec<f32>>>;

    /// Snapshot the current KV cache occupancy. Produced on demand and
    /// reflecting the executor's state at call time.
    fn cache_snapshot(&self) -> KVCacheView;

    /// Defragment the KV cache when fragmentation exceeds `threshold`.
    fn cache_defragment(&mut self, threshold: f32);

    /// Drop a sequence's entries at positions `from..` from the cache.
    ///
    /// Used to roll back rejected speculative tokens.
    fn cache_truncate(&mut self, seq_id: crate::core::sequence::SequenceId, from: usize);
}
