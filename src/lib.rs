//! nano-decode: per-step generation control for LLM inference.
//!
//! This crate implements the generation-control core of an
//! autoregressive inference engine:
//! - Batch staging for multi-sequence forward passes
//! - A multi-stage logit-to-token sampling pipeline, including the
//!   mirostat adaptive-entropy strategies
//! - Speculative (draft/target) decoding coordination
//! - Text/token conversion over external vocabulary tables
//! - Read-only KV cache occupancy dumps
//!
//! Tensor arithmetic, attention, and cache storage live behind the
//! [`executor::ModelExecutor`] trait and are not implemented here.

pub mod batch;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod executor;
pub mod kv;
pub mod sampling;
pub mod speculative;
pub mod vocab;

pub use batch::{BatchBuilder, BatchEntry};
pub use config::{GenerationConfig, MirostatMode, SamplingParams};
pub use core::sequence::{FinishReason, Sequence, SequenceId, SequenceStatus};
pub use engine::{DecodeEngine, StepOutput};
pub use error::{Error, Result};
pub use executor::ModelExecutor;
pub use kv::{KVCacheCell, KVCacheInspector, KVCacheView};
pub use sampling::{SamplingPipeline, SamplingState};
pub use speculative::{SpeculativeConfig, SpeculativeCoordinator};
pub use vocab::{TokenCodec, TokenId, VocabKind, Vocabulary};
