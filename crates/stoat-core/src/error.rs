use crate::shape::Shape;

/// All errors that can occur within stoat.
///
/// A single error type across the workspace keeps propagation simple.
/// Every variant is a programming error from the caller's point of view:
/// there is no retry or partial-failure semantics anywhere in the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors in an operation.
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank (number of dimensions).
    #[error("{op}: rank mismatch, expected rank {expected}, got {got}")]
    RankMismatch {
        op: &'static str,
        expected: usize,
        got: usize,
    },

    /// Element count mismatch when creating a tensor from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// A tensor list does not match the declared layer list.
    #[error("{what}: expected {expected} tensors, got {got}")]
    TensorCountMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// The net was used before `build()`.
    #[error("net is not built")]
    NotBuilt,

    /// Cannot give every compute replica at least one sample.
    #[error("batch size {batch} lower than computing service parallelism {replicas}")]
    BatchTooSmall { batch: usize, replicas: usize },

    /// A layer name lookup failed.
    #[error("unknown layer: {0}")]
    UnknownLayer(String),

    /// Checkpoint or plot file I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout stoat.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
