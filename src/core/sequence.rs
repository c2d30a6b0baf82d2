//! Sequence tracking for generation.
//!
//! A sequence represents one running generation: its prompt and output
//! tokens, its lifecycle status, and the sampling state it exclusively
//! owns. Cancellation (stop condition, length limit) is decided by the
//! caller between steps and surfaces here as a finish transition; a
//! sequence is never aborted mid-pipeline.

use crate::config::GenerationConfig;
use crate::sampling::SamplingState;
use crate::vocab::TokenId;

/// Unique identifier for a sequence.
pub type SequenceId = u64;

/// Lifecycle status of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceStatus {
    /// Created, prompt not yet submitted.
    Waiting,
    /// Actively generating tokens.
    Running,
    /// Generation complete.
    Finished,
}

/// Reason a sequence stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// End-of-sequence token emitted.
    EndOfSequence,
    /// Maximum token limit reached.
    MaxTokens,
    /// A stop sequence was matched by the caller.
    StopSequence,
    /// Aborted by the caller.
    Aborted,
}

/// One generation request with its exclusively owned sampling state.
#[derive(Debug, Clone)]
pub struct Sequence {
    seq_id: SequenceId,
    prompt_token_ids: Vec<TokenId>,
    output_token_ids: Vec<TokenId>,
    sampling: SamplingState,
    status: SequenceStatus,
    finish_reason: Option<FinishReason>,
}

impl Sequence {
    /// Create a sequence; the prompt tokens are fed into the penalty
    /// window so repetition penalties see the prompt from step one.
    pub fn new(seq_id: SequenceId, prompt_token_ids: Vec<TokenId>, config: &GenerationConfig) -> Self {
        let mut sampling = SamplingState::new(config, seq_id);
        for &token in &prompt_token_ids {
            sampling.accept(token);
        }
        Self {
            seq_id,
            prompt_token_ids,
            output_token_ids: Vec::new(),
            sampling,
            status: SequenceStatus::Waiting,
            finish_reason: None,
        }
    }

    /// Sequence id.
    pub fn seq_id(&self) -> SequenceId {
        self.seq_id
    }

    /// Prompt token ids.
    pub fn prompt_token_ids(&self) -> &[TokenId] {
        &self.prompt_token_ids
    }

    /// Generated token ids.
    pub fn output_token_ids(&self) -> &[TokenId] {
        &self.output_token_ids
    }

    /// Prompt length.
    pub fn prompt_len(&self) -> usize {
        self.prompt_token_ids.len()
    }

    /// Number of generated tokens.
    pub fn output_len(&self) -> usize {
        self.output_token_ids.len()
    }

    /// Prompt plus output length; also the next position to decode at.
    pub fn total_len(&self) -> usize {
        self.prompt_len() + self.output_len()
    }

    /// Most recent token (output tail, else prompt tail).
    pub fn last_token(&self) -> Option<TokenId> {
        self.output_token_ids
            .last()
            .or_else(|| self.prompt_token_ids.last())
            .copied()
    }

    /// Record a generated token.
    pub fn append_token(&mut self, token: TokenId) {
        self.output_token_ids.push(token);
    }

    /// Current status.
    pub fn status(&self) -> SequenceStatus {
        self.status
    }

    /// Transition to running.
    pub fn set_running(&mut self) {
        if self.status == SequenceStatus::Waiting {
            self.status = SequenceStatus::Running;
        }
    }

    /// Finish with the given reason. Idempotent: the first reason wins.
    pub fn set_finished(&mut self, reason: FinishReason) {
        if self.status != SequenceStatus::Finished {
            self.status = SequenceStatus::Finished;
            self.finish_reason = Some(reason);
        }
    }

    /// Whether generation is complete.
    pub fn is_finished(&self) -> bool {
        self.status == SequenceStatus::Finished
    }

    /// Why the sequence finished, if it has.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// The sequence's sampling state.
    pub fn sampling(&self) -> &SamplingState {
        &self.sampling
    }

    /// Mutable sampling state; exclusively owned, one worker at a time.
    pub fn sampling_mut(&mut self) -> &mut SamplingState {
        &mut self.sampling
    }
}
