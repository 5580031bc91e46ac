use arbor_connector::ConnectorError;
use arbor_requests::RequestError;
use thiserror::Error;

/// Failures surfaced to façade callers.
///
/// Request-level errors recorded during execution are unwrapped from the
/// request and returned as [`GraphError::Request`]; pool- and
/// connector-level failures abort before any request reaches a store.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error(transparent)]
    Type(#[from] arbor_types::TypeError),

    /// A verb was used in a way the façade can reject locally, before
    /// submitting anything.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

pub type GraphResult<T> = Result<T, GraphError>;
