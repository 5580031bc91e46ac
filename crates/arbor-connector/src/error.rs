use thiserror::Error;

/// Connector-level failures: the request never reached a store, or the
/// store's transport failed underneath it.
///
/// Request-level failures (not-found, invalid path, ...) are recorded on the
/// request itself as `RequestError` and never surface here.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("no source is registered with the name {0:?}")]
    SourceNotFound(String),

    /// The pool was exhausted and no connection was released within the
    /// configured maximum wait.
    #[error("no connection to source {source_name:?} became available within {waited_ms} ms")]
    ConnectionUnavailable { source_name: String, waited_ms: u64 },

    /// Connecting to the source failed `attempts` times in a row. Fatal for
    /// this acquire; the pool does not retry further (callers may).
    #[error("source {source_name:?} is unavailable after {attempts} failed connection attempts: {reason}")]
    SourceUnavailable {
        source_name: String,
        attempts: u32,
        reason: String,
    },

    #[error("connection pool for source {0:?} is shut down")]
    PoolShutDown(String),

    /// Constructor-level argument checks, raised synchronously.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A connection died mid-execution (transport or internal failure).
    #[error("connector failure: {0}")]
    Connector(String),
}

pub type ConnectorResult<T> = Result<T, ConnectorError>;
