use std::time::Duration;

use thiserror::Error;

/// Errors raised by [`Tensor`](crate::tensor::Tensor) operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TensorError {
    #[error("shape {shape:?} holds {expected} elements but data has {actual}")]
    ElementCount {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("shape {0:?} describes more elements than fit in memory")]
    ShapeOverflow(Vec<usize>),

    #[error("dimension {dim} out of range for rank {rank}")]
    DimOutOfRange { dim: usize, rank: usize },

    #[error("range {start}..{end} out of bounds for dimension {dim} of size {size}")]
    OutOfBounds {
        dim: usize,
        start: usize,
        end: usize,
        size: usize,
    },

    #[error("cannot concatenate shapes {left:?} and {right:?} along dimension {dim}")]
    ShapeMismatch {
        dim: usize,
        left: Vec<usize>,
        right: Vec<usize>,
    },

    #[error("dtype mismatch: {0} vs {1}")]
    DTypeMismatch(&'static str, &'static str),

    #[error("nothing to concatenate")]
    Empty,

    #[error("unsupported dtype {0}")]
    UnsupportedDType(String),

    #[error("tensor library error: {0}")]
    Library(String),
}

/// Errors on the framed IPC channel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A complete frame arrived but its payload could not be decoded.
    /// The stream is still aligned on frame boundaries.
    #[error("corrupt frame: {0}")]
    Corrupt(#[from] rmp_serde::decode::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),

    #[error("no server listening at {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Whether the failure means nothing is listening on the address.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A request that decoded cleanly but cannot be scheduled.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("request has no input slots")]
    NoInputs,

    #[error("input slot `{0}` is a scalar; every slot needs a batch dimension")]
    Scalar(String),

    #[error("input slot `{slot}` has {rows} rows, expected {expected}")]
    RaggedBatch {
        slot: String,
        rows: usize,
        expected: usize,
    },

    #[error("request has zero rows")]
    Empty,
}

/// Raised by a [`ComputeBackend`](crate::backend::ComputeBackend) when a batch
/// could not be executed. Transient: the affected requests are resent.
#[derive(Debug, Error)]
pub enum ComputeFailure {
    #[error("compute backend failed: {0}")]
    Backend(String),

    #[error("failed to collate batch: {0}")]
    Collate(#[from] TensorError),

    #[error("input slot `{0}` is missing from part of the batch")]
    MissingSlot(String),

    #[error("backend returned {actual} rows for a batch of {expected}")]
    RowCount { expected: usize, actual: usize },
}

impl ComputeFailure {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load compute backend: {0}")]
    Load(#[from] ComputeFailure),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("server at {address} did not come up within {waited:?}")]
    ServerUnavailable { address: String, waited: Duration },

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("failed to get a valid response after {0} attempts")]
    RetryBudgetExhausted(usize),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
