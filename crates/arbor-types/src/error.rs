use thiserror::Error;

/// Errors produced by value-model operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid same-name-sibling index: {0} (must be 1 or greater)")]
    InvalidSnsIndex(u32),

    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("a property requires at least one value")]
    EmptyProperty,

    #[error("a location requires at least a path, an id, or one identification property")]
    EmptyLocation,
}
