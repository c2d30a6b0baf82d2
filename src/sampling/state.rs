//! Per-sequence sampling state.

use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::GenerationConfig;
use crate::vocab::TokenId;

/// Mutable sampling state owned by exactly one sequence.
///
/// Holds the ring buffer of recently emitted tokens feeding the
/// repetition penalties, the mirostat running error accumulator, and a
/// private random source so sequences stay independently reproducible.
/// Created when a sequence starts generating and dropped when it ends.
#[derive(Debug, Clone)]
pub struct SamplingState {
    /// Last `window` emitted tokens, oldest first.
    recent: VecDeque<TokenId>,
    /// Penalty window size; 0 disables the ring buffer.
    window: usize,
    /// Mirostat running error accumulator.
    mu: f32,
    /// Private random source.
    rng: StdRng,
}

impl SamplingState {
    /// Create state for the sequence at `seq_index`.
    ///
    /// The RNG seed derives from the global seed plus the sequence index,
    /// so results are deterministic regardless of how sequences are
    /// scheduled across workers. Mirostat `mu` starts at `2 * tau`.
    pub fn new(config: &GenerationConfig, seq_index: u64) -> Self {
        let window = config.penalty_window();
        Self {
            recent: VecDeque::with_capacity(window),
            window,
            mu: 2.0 * config.sampling.mirostat_tau,
            rng: StdRng::seed_from_u64(config.sequence_seed(seq_index)),
        }
    }

    /// Record an emitted (or prompt) token in the penalty window.
    pub fn accept(&mut self, token: TokenId) {
        if self.window == 0 {
            return;
        }
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(token);
    }

    /// Mirror another state's penalty window, keeping this state's RNG
    /// and mirostat accumulator. Used to resynchronize a draft model's
    /// sampling context with the accepted sequence context.
    pub(crate) fn sync_window(&mut self, other: &SamplingState) {
        self.recent.clear();
        let skip = other.recent.len().saturating_sub(self.window);
        self.recent.extend(other.recent.iter().skip(skip).copied());
    }

    /// Occurrence counts over the penalty window.
    pub fn occurrence_counts(&self) -> HashMap<TokenId, usize> {
        let mut counts = HashMap::with_capacity(self.recent.len());
        for &token in &self.recent {
            *counts.entry(token).or_insert(0) += 1;
        }
        counts
    }

    /// Number of tokens currently in the window.
    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    /// Current mirostat error accumulator.
    pub fn mu(&self) -> f32 {
        self.mu
    }

    pub(crate) fn set_mu(&mut self, mu: f32) {
        self.mu = mu;
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}
