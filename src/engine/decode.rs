//! Non-speculative generation loop.
//!
//! One step = one batch submission = one blocking executor call = one
//! synchronous sampling pass. Parallelism across sequences is expressed
//! by packing every active sequence's pending tokens into one shared
//! batch; sampling state stays per-sequence, so the post-logits work
//! could fan out to workers without sharing.
//!
//! ```text
//!   add_sequence()            step()
//!        │                      │
//!        ▼                      ▼
//!   ┌──────────┐         ┌─────────────┐
//!   │ Sequence │ ──────► │ BatchBuilder│──► executor.forward()
//!   │  (state) │         └─────────────┘          │
//!   └──────────┘                ▲                 ▼
//!        ▲                      │         ┌──────────────┐
//!        │                      └──clear──│   Sampling   │
//!        └───────append token────────────│   Pipeline   │
//!                                         └──────────────┘
//! ```

use std::collections::HashMap;

use tracing::debug;

use crate::batch::BatchBuilder;
use crate::config::GenerationConfig;
use crate::core::sequence::{FinishReason, Sequence, SequenceId};
use crate::error::{Error, Result};
use crate::executor::ModelExecutor;
use crate::kv::KVCacheView;
use crate::sampling::SamplingPipeline;
use crate::vocab::TokenId;

/// Tokens produced by one step, plus the sequences that finished.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
    /// `(sequence, token)` pairs emitted this step, in batch order.
    pub tokens: Vec<(SequenceId, TokenId)>,
    /// Sequences that reached a finish condition this step.
    pub finished: Vec<SequenceId>,
}

impl StepOutput {
    /// Whether the step produced nothing.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Drives the per-step batch/sample loop over one model executor.
pub struct DecodeEngine<E> {
    config: GenerationConfig,
    executor: E,
    pipeline: SamplingPipeline,
    batch: BatchBuilder,
    sequences: HashMap<SequenceId, Sequence>,
    /// Active sequences in admission order; batch packing follows it.
    running: Vec<SequenceId>,
    /// Next cache position per sequence.
    n_past: HashMap<SequenceId, usize>,
    next_seq_id: SequenceId,
    eos: Option<TokenId>,
}

impl<E: ModelExecutor> DecodeEngine<E> {
    /// Create an engine over an executor. `eos` comes from the
    /// vocabulary tables, if defined.
    pub fn new(config: GenerationConfig, executor: E, eos: Option<TokenId>) -> Self {
        let pipeline = SamplingPipeline::new(config.sampling.clone());
        let batch = BatchBuilder::new(config.n_batch);
        Self {
            config,
            executor,
            pipeline,
            batch,
            sequences: HashMap::new(),
            running: Vec::new(),
            n_past: HashMap::new(),
            next_seq_id: 0,
            eos,
        }
    }

    /// Admit a sequence for generation.
    ///
    /// Fails when the prompt is empty or `n_parallel` sequences are
    /// already active.
    pub fn add_sequence(&mut self, prompt: Vec<TokenId>) -> Result<SequenceId> {
        if prompt.is_empty() {
            return Err(Error::Config("prompt must not be empty".into()));
        }
        let active = self
            .running
            .iter()
            .filter(|id| !self.sequences[id].is_finished())
            .count();
        if active >= self.config.n_parallel {
            return Err(Error::Config(format!(
                "already decoding {active} sequences (n_parallel = {})",
                self.config.n_parallel
            )));
        }

        let seq_id = self.next_seq_id;
        self.next_seq_id += 1;
        let mut seq = Sequence::new(seq_id, prompt, &self.config);
        seq.set_running();
        self.sequences.insert(seq_id, seq);
        self.running.push(seq_id);
        self.n_past.insert(seq_id, 0);
        Ok(seq_id)
    }

    /// Run one generation step for every active sequence.
    ///
    /// The first step of a fresh sequence doubles as its prefill: all
    /// unseen tokens are packed into the shared batch with logits
    /// requested only at the tail.
    pub fn step(&mut self) -> Result<StepOutput> {
        let active: Vec<SequenceId> = self
            .running
            .iter()
            .copied()
            .filter(|id| !self.sequences[id].is_finished())
            .collect();
        let mut output = StepOutput::default();
        if active.is_empty() {
            return Ok(output);
        }

        self.batch.clear();
        for &seq_id in &active {
            let seq = &self.sequences[&seq_id];
            let total = seq.total_len();
            let from = self.n_past[&seq_id];
            for pos in from..total {
                let token = if pos < seq.prompt_len() {
                    seq.prompt_token_ids()[pos]
                } else {
                    seq.output_token_ids()[pos - seq.prompt_len()]
                };
                self.batch
                    .add(token, pos, &[seq_id], pos == total - 1)?;
            }
        }

        let all_logits = self.executor.forward(&self.batch)?;
        if all_logits.len() != active.len() {
            return Err(Error::Executor(format!(
                "executor returned {} logit vectors, expected {}",
                all_logits.len(),
                active.len()
            )));
        }

        for (&seq_id, logits) in active.iter().zip(&all_logits) {
            let seq = self
                .sequences
                .get_mut(&seq_id)
                .ok_or(Error::SequenceNotFound(seq_id))?;
            let token = self.pipeline.sample(logits, seq.sampling_mut())?;
            seq.append_token(token);
            // The freshly sampled token has not been fed yet.
            self.n_past.insert(seq_id, seq.total_len() - 1);
            output.tokens.push((seq_id, token));

            if Some(token) == self.eos && !self.config.ignore_eos {
                seq.set_finished(FinishReason::EndOfSequence);
            } else if let Some(limit) = self.config.n_predict {
                if seq.output_len() >= limit {
                    seq.set_finished(FinishReason::MaxTokens);
                }
            }
            if seq.is_finished() {
                output.finished.push(seq_id);
            }
        }

        if let Some(threshold) = self.config.defrag_threshold {
            debug!(threshold, "requesting KV cache defragmentation");
            self.executor.cache_defragment(threshold);
        }

        Ok(output)
    }

    /// Whether any admitted sequence is still generating.
    pub fn has_unfinished(&self) -> bool {
        self.running
            .iter()
            .any(|id| !self.sequences[id].is_finished())
    }

    /// Look up a sequence.
    pub fn sequence(&self, seq_id: SequenceId) -> Result<&Sequence> {
        self.sequences
            .get(&seq_id)
            .ok_or(Error::SequenceNotFound(seq_id))
    }

    /// Remove a sequence, returning it.
    pub fn remove_sequence(&mut self, seq_id: SequenceId) -> Result<Sequence> {
        self.running.retain(|&id| id != seq_id);
        self.n_past.remove(&seq_id);
        self.sequences
            .remove(&seq_id)
            .ok_or(Error::SequenceNotFound(seq_id))
    }

    /// Abort a sequence between steps.
    pub fn abort_sequence(&mut self, seq_id: SequenceId) -> Result<()> {
        self.sequences
            .get_mut(&seq_id)
            .ok_or(Error::SequenceNotFound(seq_id))?
            .set_finished(FinishReason::Aborted);
        Ok(())
    }

    /// Snapshot the executor's cache occupancy for diagnostics.
    pub fn cache_snapshot(&self) -> KVCacheView {
        self.executor.cache_snapshot()
    }

    /// The run configuration.
    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Access the executor.
    pub fn executor(&self) -> &E {
        &self.executor
    }
}
