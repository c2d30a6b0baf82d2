//! Error types for nano-decode.

use thiserror::Error;

/// Result type alias for nano-decode operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nano-decode.
#[derive(Error, Debug)]
pub enum Error {
    /// Batch add beyond the configured capacity.
    ///
    /// Fatal to the current step: the caller must shrink the request or
    /// build the batch with a larger capacity. Entries already staged are
    /// left intact.
    #[error("batch capacity exceeded ({capacity} entries)")]
    CapacityExceeded {
        /// Configured maximum number of entries.
        capacity: usize,
    },

    /// A batch entry was added with no owning sequences.
    #[error("batch entry has an empty sequence id set")]
    EmptySequenceSet,

    /// A filter stage eliminated every candidate.
    ///
    /// Production stages clamp to keep at least one candidate, so this
    /// surfacing at runtime indicates a defect in a filter stage.
    #[error("sampling eliminated all candidates")]
    EmptyCandidateSet,

    /// Detokenization hit an id outside the vocabulary range.
    #[error("token {0} outside vocabulary range")]
    InvalidVocabularyToken(u32),

    /// Tokenization could not consume the input.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Sequence not known to the engine.
    #[error("sequence {0} not found")]
    SequenceNotFound(u64),

    /// Model executor reported a failure.
    #[error("executor error: {0}")]
    Executor(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
