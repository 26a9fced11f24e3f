use thiserror::Error;

/// Errors raised while preparing decoder inputs or driving a decode loop.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WrapperError {
    /// Without a pad id per-sample lengths are ambiguous, so only one sample is allowed.
    #[error("padding is disabled but the batch holds {batch} samples (expected 1)")]
    PaddingDisabledBatch { batch: usize },

    #[error("input_ids has an empty sequence axis")]
    EmptySequence,

    #[error("cached state was provided without an input_seq_index in the generator state")]
    MissingSequenceIndex,

    #[error("input_seq_index entry {index} is out of range for a cached batch of {batch}")]
    SequenceIndexOutOfRange { index: i64, batch: usize },

    #[error("input batch {input} does not match input_seq_index length {index}")]
    BatchMismatch { input: usize, index: usize },

    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("sequence buffer is full (max length {max_length})")]
    SequenceFull { max_length: usize },

    #[error("forward is not implemented for {model}")]
    ForwardUnimplemented { model: &'static str },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("tensor data conversion failed: {0}")]
    Data(String),
}

pub type Result<T> = core::result::Result<T, WrapperError>;
