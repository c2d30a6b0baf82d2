//! Logit-to-token sampling pipeline.
//!
//! Per sequence and per step, raw logits pass through a filter chain
//! before one token is drawn:
//!
//! ```text
//! Logits [vocab_size]
//!     │
//!     ▼ Repetition / frequency / presence penalties
//!     ▼ Dynamic temperature (optional)
//!     ▼ Top-k → Tail-free → Typical → Top-p → Min-p
//!     ▼ Temperature softmax (+ quadratic smoothing)
//!     ▼ Draw from the sequence's private RNG
//! Selected token
//! ```
//!
//! Mirostat v1/v2 replace the middle filters entirely: they estimate a
//! cutoff from the running error accumulator `mu` and update it after
//! every draw. Every stage keeps at least one candidate, so the chain
//! can never empty the distribution.

use rand::distributions::{Distribution, WeightedIndex};

use crate::config::{MirostatMode, SamplingParams};
use crate::error::{Error, Result};
use crate::sampling::state::SamplingState;
use crate::vocab::TokenId;

/// Effective temperatures get clamped away from zero before dividing.
const MIN_TEMPERATURE: f32 = 1e-5;

/// Number of top probabilities used for the mirostat v1 Zipf estimate.
const MIROSTAT_ESTIMATE_TOKENS: usize = 100;

/// One surviving (token, score) pair.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Token id.
    pub id: TokenId,
    /// Working score, initially the raw logit.
    pub logit: f32,
    /// Probability, valid after the most recent softmax.
    pub p: f32,
}

/// Configurable logit-to-token transformation.
///
/// The pipeline itself is immutable and shareable; all mutable per-draw
/// state (penalty window, mirostat `mu`, RNG) lives in the sequence's
/// [`SamplingState`].
#[derive(Debug, Clone)]
pub struct SamplingPipeline {
    params: SamplingParams,
}

impl SamplingPipeline {
    /// Create a pipeline from sampling parameters.
    pub fn new(params: SamplingParams) -> Self {
        Self { params }
    }

    /// The parameters this pipeline applies.
    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Select one token from raw logits, mutating the sequence state:
    /// the ring buffer gains the chosen token and `mu` is updated when
    /// mirostat is active.
    pub fn sample(&self, logits: &[f32], state: &mut SamplingState) -> Result<TokenId> {
        if logits.is_empty() {
            return Err(Error::EmptyCandidateSet);
        }

        let mut cands: Vec<Candidate> = logits
            .iter()
            .enumerate()
            .map(|(id, &logit)| Candidate {
                id: id as TokenId,
                logit,
                p: 0.0,
            })
            .collect();
        let mut sorted = false;

        // Penalties index candidates by token id, so they run before any
        // reordering.
        self.apply_penalties(&mut cands, state);

        let p = &self.params;

        // Temperature 0 short-circuits to deterministic argmax over the
        // penalized logits.
        if p.temperature <= 0.0 {
            let token = argmax(&cands);
            state.accept(token);
            return Ok(token);
        }

        let mut temp_applied = false;
        if p.dynatemp_range > 0.0 {
            self.apply_dynamic_temperature(&mut cands, &mut sorted);
            temp_applied = true;
        }

        let token = match p.mirostat {
            MirostatMode::Off => {
                self.apply_top_k(&mut cands, &mut sorted);
                self.apply_tail_free(&mut cands, &mut sorted);
                self.apply_typical(&mut cands, &mut sorted);
                self.apply_top_p(&mut cands, &mut sorted);
                self.apply_min_p(&mut cands, &mut sorted);

                if !temp_applied {
                    scale_logits(&mut cands, p.temperature);
                }
                self.apply_smoothing(&mut cands, &mut sorted);

                softmax(&mut cands, &mut sorted);
                let idx = draw(&cands, state)?;
                cands[idx].id
            }
            MirostatMode::V1 => {
                if !temp_applied {
                    scale_logits(&mut cands, p.temperature);
                }
                self.sample_mirostat_v1(&mut cands, &mut sorted, state)?
            }
            MirostatMode::V2 => {
                if !temp_applied {
                    scale_logits(&mut cands, p.temperature);
                }
                self.sample_mirostat_v2(&mut cands, &mut sorted, state)?
            }
        };

        state.accept(token);
        Ok(token)
    }

    /// Stage 1: repetition, frequency, and presence penalties over the
    /// ring-buffer contents. Logits below zero are scaled up in
    /// magnitude, logits above zero scaled down, preserving rank order
    /// within the penalized set.
    fn apply_penalties(&self, cands: &mut [Candidate], state: &SamplingState) {
        let p = &self.params;
        let inert =
            p.repeat_penalty == 1.0 && p.frequency_penalty == 0.0 && p.presence_penalty == 0.0;
        if inert || state.recent_len() == 0 {
            return;
        }

        for (&token, &count) in &state.occurrence_counts() {
            let Some(cand) = cands.get_mut(token as usize) else {
                continue;
            };
            if cand.logit <= 0.0 {
                cand.logit *= p.repeat_penalty;
            } else {
                cand.logit /= p.repeat_penalty;
            }
            cand.logit -= count as f32 * p.frequency_penalty
                + if count > 0 { p.presence_penalty } else { 0.0 };
        }
    }

    /// Stage 2: entropy-driven dynamic temperature. The effective
    /// temperature interpolates between `temp - range` and `temp + range`
    /// by the distribution's normalized entropy, shaped by the exponent,
    /// and replaces the flat temperature for this step.
    fn apply_dynamic_temperature(&self, cands: &mut Vec<Candidate>, sorted: &mut bool) {
        if cands.len() <= 1 {
            return;
        }
        let p = &self.params;
        let min_temp = (p.temperature - p.dynatemp_range).max(0.0);
        let max_temp = (p.temperature + p.dynatemp_range).max(0.0);

        softmax(cands, sorted);
        let entropy: f32 = cands
            .iter()
            .filter(|c| c.p > 0.0)
            .map(|c| -c.p * c.p.ln())
            .sum();
        let max_entropy = (cands.len() as f32).ln();
        let normalized = (entropy / max_entropy).clamp(0.0, 1.0);

        let dyn_temp =
            (min_temp + (max_temp - min_temp) * normalized.powf(p.dynatemp_exponent))
                .max(MIN_TEMPERATURE);
        for c in cands.iter_mut() {
            c.logit /= dyn_temp;
        }
        softmax(cands, sorted);
    }

    /// Stage 3: keep the k highest-scoring candidates (k <= 0 retains the
    /// whole vocabulary, always at least one survives).
    fn apply_top_k(&self, cands: &mut Vec<Candidate>, sorted: &mut bool) {
        let k = match self.params.top_k {
            k if k <= 0 => cands.len(),
            k => k as usize,
        };
        let k = k.clamp(1, cands.len());
        if k == cands.len() {
            return;
        }
        sort_by_logit(cands, sorted);
        cands.truncate(k);
        debug_assert!(!cands.is_empty());
    }

    /// Stage 4: tail-free sampling. Drops the tail whose cumulative
    /// |second derivative| mass over the sorted probability curve exceeds
    /// `z`.
    fn apply_tail_free(&self, cands: &mut Vec<Candidate>, sorted: &mut bool) {
        let z = self.params.tail_free_z;
        if z >= 1.0 || cands.len() <= 2 {
            return;
        }
        softmax(cands, sorted);

        let first: Vec<f32> = cands.windows(2).map(|w| w[0].p - w[1].p).collect();
        let mut second: Vec<f32> = first.windows(2).map(|w| (w[0] - w[1]).abs()).collect();

        let sum: f32 = second.iter().sum();
        if sum > 1e-6 {
            for d in &mut second {
                *d /= sum;
            }
        } else {
            let uniform = 1.0 / second.len() as f32;
            second.fill(uniform);
        }

        let mut cum = 0.0;
        let mut last = cands.len();
        for (i, d) in second.iter().enumerate() {
            cum += d;
            if cum > z {
                last = i.max(1);
                break;
            }
        }
        cands.truncate(last);
        debug_assert!(!cands.is_empty());
    }

    /// Stage 5: locally typical sampling. Orders tokens by how close
    /// their surprise is to the distribution's entropy and keeps the
    /// smallest set reaching `typical_p` cumulative probability.
    fn apply_typical(&self, cands: &mut Vec<Candidate>, sorted: &mut bool) {
        let typ = self.params.typical_p;
        if typ >= 1.0 || cands.len() <= 1 {
            return;
        }
        softmax(cands, sorted);

        let entropy: f32 = cands
            .iter()
            .filter(|c| c.p > 0.0)
            .map(|c| -c.p * c.p.ln())
            .sum();

        let mut order: Vec<usize> = (0..cands.len()).collect();
        order.sort_by(|&a, &b| {
            let da = (-cands[a].p.ln() - entropy).abs();
            let db = (-cands[b].p.ln() - entropy).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut cum = 0.0;
        let mut last = order.len();
        for (rank, &idx) in order.iter().enumerate() {
            cum += cands[idx].p;
            if cum > typ {
                last = rank + 1;
                break;
            }
        }

        let kept: Vec<Candidate> = order[..last].iter().map(|&i| cands[i]).collect();
        *cands = kept;
        debug_assert!(!cands.is_empty());
        // Candidates are now in typicality order, not logit order.
        *sorted = false;
    }

    /// Stage 6: nucleus filter. Keeps the smallest probability-sorted
    /// prefix whose cumulative probability reaches `top_p`.
    fn apply_top_p(&self, cands: &mut Vec<Candidate>, sorted: &mut bool) {
        let top_p = self.params.top_p;
        if top_p >= 1.0 {
            return;
        }
        softmax(cands, sorted);

        let mut cum = 0.0;
        let mut last = cands.len();
        for (i, c) in cands.iter().enumerate() {
            cum += c.p;
            if cum >= top_p {
                last = i + 1;
                break;
            }
        }
        cands.truncate(last);
        debug_assert!(!cands.is_empty());
    }

    /// Stage 7: drop tokens whose probability falls below `min_p` times
    /// the maximum probability.
    fn apply_min_p(&self, cands: &mut Vec<Candidate>, sorted: &mut bool) {
        let min_p = self.params.min_p;
        if min_p <= 0.0 || cands.len() <= 1 {
            return;
        }
        softmax(cands, sorted);

        let threshold = min_p * cands[0].p;
        let last = cands
            .iter()
            .position(|c| c.p < threshold)
            .unwrap_or(cands.len())
            .max(1);
        cands.truncate(last);
        debug_assert!(!cands.is_empty());
    }

    /// Quadratic logit smoothing about the maximum, rank-preserving.
    fn apply_smoothing(&self, cands: &mut Vec<Candidate>, sorted: &mut bool) {
        let s = self.params.smoothing_factor;
        if s <= 0.0 || cands.len() <= 1 {
            return;
        }
        sort_by_logit(cands, sorted);
        let h = cands[0].logit;
        for c in cands.iter_mut() {
            c.logit = h - s * (c.logit - h).powi(2);
        }
    }

    /// Mirostat 1.0: estimate a Zipf exponent from the head of the
    /// distribution, derive a top-k cutoff from `mu`, draw, then move
    /// `mu` toward the target surprise `tau`.
    fn sample_mirostat_v1(
        &self,
        cands: &mut Vec<Candidate>,
        sorted: &mut bool,
        state: &mut SamplingState,
    ) -> Result<TokenId> {
        let p = &self.params;
        let n = cands.len();
        softmax(cands, sorted);

        let m = MIROSTAT_ESTIMATE_TOKENS.min(n);
        let mut sum_ti_bi = 0.0f32;
        let mut sum_ti_sq = 0.0f32;
        for i in 0..m.saturating_sub(1) {
            let t_i = ((i + 2) as f32 / (i + 1) as f32).ln();
            let b_i = (cands[i].p / cands[i + 1].p).ln();
            sum_ti_bi += t_i * b_i;
            sum_ti_sq += t_i * t_i;
        }
        let s_hat = sum_ti_bi / sum_ti_sq;
        let eps_hat = s_hat - 1.0;

        let mu = state.mu();
        let k = ((eps_hat * mu.exp2()) / (1.0 - (n as f32).powf(-eps_hat))).powf(1.0 / s_hat);
        // Flat heads make the Zipf estimate degenerate; fall back to the
        // whole distribution.
        let k = if k.is_finite() { k as usize } else { n };
        cands.truncate(k.clamp(1, n));
        debug_assert!(!cands.is_empty());

        *sorted = true;
        let mut resorted = true;
        softmax(cands, &mut resorted);

        let idx = draw(cands, state)?;
        let token = cands[idx].id;
        let surprise = -cands[idx].p.log2();
        state.set_mu(mu - p.mirostat_eta * (surprise - p.mirostat_tau));
        Ok(token)
    }

    /// Mirostat 2.0: truncate the sorted distribution at the first token
    /// whose surprise exceeds `mu`, draw, update `mu`.
    fn sample_mirostat_v2(
        &self,
        cands: &mut Vec<Candidate>,
        sorted: &mut bool,
        state: &mut SamplingState,
    ) -> Result<TokenId> {
        let p = &self.params;
        softmax(cands, sorted);

        let mu = state.mu();
        let cut = cands
            .iter()
            .position(|c| -c.p.log2() > mu)
            .unwrap_or(cands.len())
            .max(1);
        cands.truncate(cut);
        debug_assert!(!cands.is_empty());

        let mut resorted = true;
        softmax(cands, &mut resorted);

        let idx = draw(cands, state)?;
        let token = cands[idx].id;
        let surprise = -cands[idx].p.log2();
        state.set_mu(mu - p.mirostat_eta * (surprise - p.mirostat_tau));
        Ok(token)
    }
}

/// Sort candidates by logit, descending, once.
fn sort_by_logit(cands: &mut [Candidate], sorted: &mut bool) {
    if *sorted {
        return;
    }
    cands.sort_by(|a, b| b.logit.partial_cmp(&a.logit).unwrap_or(std::cmp::Ordering::Equal));
    *sorted = true;
}

/// Softmax over candidate logits, shifted by the maximum to guard
/// against underflow. Leaves candidates sorted by logit descending.
fn softmax(cands: &mut Vec<Candidate>, sorted: &mut bool) {
    sort_by_logit(cands, sorted);
    let max = cands[0].logit;
    let mut sum = 0.0f32;
    for c in cands.iter_mut() {
        c.p = (c.logit - max).exp();
        sum += c.p;
    }
    for c in cands.iter_mut() {
        c.p /= sum;
    }
}

/// Divide all logits by a temperature (clamped away from zero).
fn scale_logits(cands: &mut [Candidate], temperature: f32) {
    let t = temperature.max(MIN_TEMPERATURE);
    if (t - 1.0).abs() < f32::EPSILON {
        return;
    }
    for c in cands.iter_mut() {
        c.logit /= t;
    }
}

/// Argmax by working score.
fn argmax(cands: &[Candidate]) -> TokenId {
    cands
        .iter()
        .max_by(|a, b| a.logit.partial_cmp(&b.logit).unwrap_or(std::cmp::Ordering::Equal))
        .map(|c| c.id)
        .unwrap_or(0)
}

/// Draw one index from the candidates' probabilities using the
/// sequence's private RNG.
fn draw(cands: &[Candidate], state: &mut SamplingState) -> Result<usize> {
    let dist = WeightedIndex::new(cands.iter().map(|c| c.p))
        .map_err(|_| Error::EmptyCandidateSet)?;
    Ok(dist.sample(state.rng()))
}

/// Max-shifted softmax over a raw logits slice, for callers that need
/// the full distribution rather than a draw (speculative verification).
pub fn softmax_probs(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}
