//! Generation engine.
//!
//! This module contains the non-speculative step loop tying the batch
//! builder, the executor, and the sampling pipeline together.

pub mod decode;

pub use decode::{DecodeEngine, StepOutput};
