//! Error taxonomy for node execution and the host boundary.

use crate::{DType, Shape};

/// Every variant aborts the whole call. At the C boundary they all collapse
/// to a non-zero status; the detail is only reported through `tracing`.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("improper {name} dimensions: {dims}")]
    ShapeMismatch { name: String, dims: Shape },

    #[error("improper {name} precision: expected {expected}, found {found}")]
    PrecisionMismatch {
        name: String,
        expected: DType,
        found: DType,
    },

    #[error("improper {name} data length: expected {expected} bytes, found {found}")]
    DataLengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unexpected input {0}")]
    UnknownInput(String),

    #[error("input {0} supplied more than once")]
    DuplicateInput(String),

    #[error("lacking input {0}")]
    MissingInput(&'static str),

    #[error("failed to allocate {bytes} bytes")]
    AllocationFailure { bytes: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
