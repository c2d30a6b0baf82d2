//! Core data structures: sequence lifecycle tracking.

pub mod sequence;

pub use sequence::{FinishReason, Sequence, SequenceId, SequenceStatus};
