//! Speculative decoding configuration.

use serde::{Deserialize, Serialize};

/// Configuration for draft-model speculative decoding.
///
/// A small draft model proposes `n_draft` tokens which the target model
/// verifies in a single batched pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeculativeConfig {
    /// Draft model path.
    pub draft_model: String,

    /// Number of tokens to draft per step.
    pub n_draft: usize,

    /// Acceptance split probability: a draft token survives while the
    /// target assigns it at least `p_split` times the draft's own
    /// probability.
    pub p_split: f32,

    /// Use the stochastic acceptance test (accept with probability
    /// `min(1, p_target / p_draft)`) instead of the ratio threshold.
    pub stochastic: bool,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            draft_model: String::new(),
            n_draft: 5,
            p_split: 0.1,
            stochastic: false,
        }
    }
}

impl SpeculativeConfig {
    /// Create a config for the given draft model.
    pub fn new(draft_model: impl Into<String>) -> Self {
        Self {
            draft_model: draft_model.into(),
            ..Default::default()
        }
    }

    /// Set the number of draft tokens per step.
    pub fn n_draft(mut self, n: usize) -> Self {
        self.n_draft = n;
        self
    }

    /// Set the acceptance split probability.
    pub fn p_split(mut self, p: f32) -> Self {
        self.p_split = p;
        self
    }

    /// Enable the stochastic acceptance test.
    pub fn stochastic(mut self, on: bool) -> Self {
        self.stochastic = on;
        self
    }
}
