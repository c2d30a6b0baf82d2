//! Sampling: per-sequence state and the logit-to-token pipeline.

pub mod pipeline;
pub mod state;

pub use pipeline::{softmax_probs, Candidate, SamplingPipeline};
pub use state::SamplingState;
