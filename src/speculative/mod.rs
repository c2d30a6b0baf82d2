//! Speculative decoding.
//!
//! A cheap draft model proposes several tokens per step; the target
//! model verifies the whole chain in one batched pass and keeps the
//! longest accepted prefix. Correctness is never traded for speed: a
//! step with zero accepted drafts still advances by one target-sampled
//! token.

pub mod config;
pub mod engine;

pub use config::SpeculativeConfig;
pub use engine::{DraftBranch, DraftTree, SpeculativeCoordinator, SpeculativeStats};
