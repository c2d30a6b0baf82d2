//! Speculative decoding coordinator.
//!
//! Each generation step runs the state machine
//! `Propose -> Verify -> Accept/Reject -> Advance`:
//!
//! 1. **Propose**: the draft model runs autoregressively for up to
//!    `n_draft` steps through the sampling pipeline, building a chain of
//!    candidate tokens.
//! 2. **Verify**: one target batch carries the continuation of the
//!    accepted prefix plus the whole draft chain, logits requested at
//!    every chained position.
//! 3. **Accept/Reject**: the chain is walked front to back; a token
//!    survives while the target's probability for it is at least
//!    `p_split` times the draft's, stopping at the first rejection.
//! 4. **Advance**: accepted tokens plus one freshly target-sampled token
//!    are appended; rejected cache entries are rolled back; the draft
//!    tree is discarded.
//!
//! When nothing is accepted the step still advances by exactly one
//! target-sampled token, so throughput never drops below plain decoding.

use rand::Rng;
use tracing::debug;

use crate::batch::BatchBuilder;
use crate::config::GenerationConfig;
use crate::core::sequence::{FinishReason, Sequence, SequenceId};
use crate::error::{Error, Result};
use crate::executor::ModelExecutor;
use crate::sampling::{softmax_probs, SamplingPipeline, SamplingState};
use crate::vocab::TokenId;

use super::config::SpeculativeConfig;

/// Sequence-index offset for the draft model's private sampling state.
const DRAFT_STATE_INDEX: u64 = u64::MAX;

/// Base for synthetic sequence ids tagging draft branches inside a
/// verification batch.
const BRANCH_SEQ_BASE: SequenceId = 1 << 32;

/// One draft-proposed candidate chain.
#[derive(Debug, Clone)]
pub struct DraftBranch {
    /// Synthetic sequence id, meaningful only inside the verification
    /// batch that carries this branch.
    pub batch_seq_id: SequenceId,
    /// Proposed tokens, in chain order.
    pub tokens: Vec<TokenId>,
    /// Draft-model probability of each proposed token.
    pub probs: Vec<f32>,
}

/// Step-scoped set of draft proposals: created empty, populated during
/// Propose, consumed during Accept/Reject, then discarded.
#[derive(Debug, Clone, Default)]
pub struct DraftTree {
    branches: Vec<DraftBranch>,
}

impl DraftTree {
    /// Open a new branch and return it for filling.
    pub fn new_branch(&mut self) -> &mut DraftBranch {
        let idx = self.branches.len();
        self.branches.push(DraftBranch {
            batch_seq_id: BRANCH_SEQ_BASE + idx as SequenceId,
            tokens: Vec::new(),
            probs: Vec::new(),
        });
        &mut self.branches[idx]
    }

    /// Proposed branches in order.
    pub fn branches(&self) -> &[DraftBranch] {
        &self.branches
    }
}

/// Cumulative acceptance statistics across steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpeculativeStats {
    /// Tokens proposed by the draft model.
    pub n_drafted: usize,
    /// Draft tokens accepted by the target model.
    pub n_accepted: usize,
    /// Speculative steps taken.
    pub n_steps: usize,
}

impl SpeculativeStats {
    /// Fraction of drafted tokens that were accepted.
    pub fn accept_rate(&self) -> f32 {
        if self.n_drafted == 0 {
            0.0
        } else {
            self.n_accepted as f32 / self.n_drafted as f32
        }
    }
}

/// Drives draft proposal and target verification over two executors.
pub struct SpeculativeCoordinator<T, D> {
    config: GenerationConfig,
    spec: SpeculativeConfig,
    target: T,
    draft: D,
    target_pipeline: SamplingPipeline,
    draft_pipeline: SamplingPipeline,
    draft_state: SamplingState,
    batch: BatchBuilder,
    eos: Option<TokenId>,
    /// Next position each executor's cache expects for the sequence.
    n_past_target: usize,
    n_past_draft: usize,
    stats: SpeculativeStats,
}

impl<T: ModelExecutor, D: ModelExecutor> SpeculativeCoordinator<T, D> {
    /// Create a coordinator; fails when the config carries no
    /// speculative section.
    pub fn new(
        config: GenerationConfig,
        target: T,
        draft: D,
        eos: Option<TokenId>,
    ) -> Result<Self> {
        let spec = config
            .speculative
            .clone()
            .ok_or_else(|| Error::Config("speculative decoding not configured".into()))?;
        let draft_state = SamplingState::new(&config, DRAFT_STATE_INDEX);
        let pipeline = SamplingPipeline::new(config.sampling.clone());
        let batch = BatchBuilder::new(config.n_batch);
        Ok(Self {
            config,
            spec,
            target,
            draft,
            draft_pipeline: pipeline.clone(),
            target_pipeline: pipeline,
            draft_state,
            batch,
            eos,
            n_past_target: 0,
            n_past_draft: 0,
            stats: SpeculativeStats::default(),
        })
    }

    /// Acceptance statistics so far.
    pub fn stats(&self) -> SpeculativeStats {
        self.stats
    }

    /// Access the target executor.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Run one speculative step for `seq`, returning the tokens emitted
    /// (at least one).
    pub fn step(&mut self, seq: &mut Sequence) -> Result<Vec<TokenId>> {
        if seq.total_len() == 0 {
            return Err(Error::Config("sequence has no tokens to continue".into()));
        }
        seq.set_running();
        let total = seq.total_len();

        let mut tree = DraftTree::default();
        self.propose(seq, total, &mut tree)?;
        let branch = &tree.branches()[0];
        let target_logits = self.verify(seq, total, branch)?;
        let emitted = self.resolve(seq, total, branch, &target_logits)?;

        self.stats.n_steps += 1;
        debug!(
            step = self.stats.n_steps,
            drafted = branch.tokens.len(),
            emitted = emitted.len(),
            accept_rate = self.stats.accept_rate(),
            "speculative step"
        );

        if let Some(limit) = self.config.n_predict {
            if !seq.is_finished() && seq.output_len() >= limit {
                seq.set_finished(FinishReason::MaxTokens);
            }
        }
        Ok(emitted)
    }

    /// Propose: run the draft model `n_draft` steps (or until draft EOS).
    fn propose(&mut self, seq: &Sequence, total: usize, tree: &mut DraftTree) -> Result<()> {
        let seq_id = seq.seq_id();

        // The draft's penalty window must reflect the accepted context
        // (prompt plus emitted tokens), not its own past proposals, some
        // of which were rejected. Within the chain below, drafted tokens
        // still penalize their successors.
        self.draft_state.sync_window(seq.sampling());

        // Catch the draft cache up on tokens it has not seen, requesting
        // logits only after the sequence tail.
        self.batch.clear();
        for pos in self.n_past_draft..total {
            self.batch
                .add(token_at(seq, pos), pos, &[seq_id], pos == total - 1)?;
        }
        let mut cur_logits = last_logits(self.draft.forward(&self.batch)?)?;
        self.n_past_draft = total;

        let branch = tree.new_branch();
        for i in 0..self.spec.n_draft {
            let probs = softmax_probs(&cur_logits);
            let token = self.draft_pipeline.sample(&cur_logits, &mut self.draft_state)?;
            branch.probs.push(probs[token as usize]);
            branch.tokens.push(token);
            self.stats.n_drafted += 1;

            if Some(token) == self.eos || i + 1 == self.spec.n_draft {
                break;
            }

            self.batch.clear();
            self.batch.add(token, total + i, &[seq_id], true)?;
            cur_logits = last_logits(self.draft.forward(&self.batch)?)?;
            self.n_past_draft = total + i + 1;
        }
        Ok(())
    }

    /// Verify: one target batch over the accepted prefix continuation
    /// plus the whole draft chain, logits at every chained position.
    fn verify(&mut self, seq: &Sequence, total: usize, branch: &DraftBranch) -> Result<Vec<Vec<f32>>> {
        let seq_id = seq.seq_id();

        self.batch.clear();
        for pos in self.n_past_target..total {
            self.batch
                .add(token_at(seq, pos), pos, &[seq_id], pos == total - 1)?;
        }
        for (i, &token) in branch.tokens.iter().enumerate() {
            self.batch
                .add(token, total + i, &[seq_id, branch.batch_seq_id], true)?;
        }

        let logits = self.target.forward(&self.batch)?;
        if logits.len() != branch.tokens.len() + 1 {
            return Err(Error::Executor(format!(
                "target returned {} logit vectors, expected {}",
                logits.len(),
                branch.tokens.len() + 1
            )));
        }
        self.n_past_target = total + branch.tokens.len();
        Ok(logits)
    }

    /// Accept/Reject and Advance: walk the chain, append survivors, and
    /// on rejection (or after full acceptance) sample one token from the
    /// target's distribution at that point.
    fn resolve(
        &mut self,
        seq: &mut Sequence,
        total: usize,
        branch: &DraftBranch,
        target_logits: &[Vec<f32>],
    ) -> Result<Vec<TokenId>> {
        let mut emitted = Vec::new();
        let mut n_accepted = 0;

        for (i, &token) in branch.tokens.iter().enumerate() {
            let p_target = softmax_probs(&target_logits[i])[token as usize];
            let p_draft = branch.probs[i];
            let accept = if self.spec.stochastic {
                let ratio = if p_draft > 0.0 { p_target / p_draft } else { 1.0 };
                seq.sampling_mut().rng().gen::<f32>() < ratio.min(1.0)
            } else {
                p_target >= self.spec.p_split * p_draft
            };
            if !accept {
                break;
            }

            seq.sampling_mut().accept(token);
            seq.append_token(token);
            emitted.push(token);
            n_accepted += 1;
            self.stats.n_accepted += 1;

            if Some(token) == self.eos && !self.config.ignore_eos {
                seq.set_finished(FinishReason::EndOfSequence);
                self.rollback(seq.seq_id(), total + n_accepted);
                return Ok(emitted);
            }
        }

        // One extra token from the target's distribution at the
        // resolution point: the correction on rejection, the bonus token
        // on full acceptance.
        let final_token = self
            .target_pipeline
            .sample(&target_logits[n_accepted], seq.sampling_mut())?;
        seq.append_token(final_token);
        emitted.push(final_token);

        if Some(final_token) == self.eos && !self.config.ignore_eos {
            seq.set_finished(FinishReason::EndOfSequence);
        }

        // The final token occupies position `total + n_accepted`; both
        // caches must forget anything at or past it.
        self.rollback(seq.seq_id(), total + n_accepted);
        Ok(emitted)
    }

    fn rollback(&mut self, seq_id: SequenceId, cut: usize) {
        if cut < self.n_past_target {
            self.target.cache_truncate(seq_id, cut);
            self.n_past_target = cut;
        }
        if cut < self.n_past_draft {
            self.draft.cache_truncate(seq_id, cut);
            self.n_past_draft = cut;
        }
    }
}

/// Token at an absolute position of the sequence (prompt then output).
fn token_at(seq: &Sequence, pos: usize) -> TokenId {
    if pos < seq.prompt_len() {
        seq.prompt_token_ids()[pos]
    } else {
        seq.output_token_ids()[pos - seq.prompt_len()]
    }
}

fn last_logits(mut logits: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    if logits.is_empty() {
        return Err(Error::Executor("executor returned no logits".into()));
    }
    Ok(logits.swap_remove(logits.len() - 1))
}
