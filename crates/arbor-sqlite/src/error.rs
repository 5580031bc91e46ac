use arbor_requests::RequestError;
use arbor_types::NodeId;

/// Errors from the sqlite storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An underlying sqlite failure.
    #[error("sql error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// Property payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored data is malformed (bad UUID text, missing large value, ...).
    #[error("corrupt row for node {node}: {reason}")]
    Corrupt { node: NodeId, reason: String },
}

impl From<StoreError> for RequestError {
    fn from(error: StoreError) -> Self {
        RequestError::Storage(error.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
