use arbor_types::{Location, NodeId, TypeError};
use thiserror::Error;

/// Errors recorded on a request during execution.
///
/// These are *request-level* failures: the store executed the request and
/// determined it cannot succeed. Connector-level failures (source down, pool
/// exhausted) never reach a request's error slot.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RequestError {
    /// The location resolves to nothing. Carries the lowest existing
    /// ancestor path when the store can determine it.
    #[error("no node exists at {location}")]
    NotFound {
        location: Location,
        lowest_existing: Option<arbor_types::Path>,
    },

    /// The path is malformed or semantically illegal, e.g. moving a node
    /// beneath its own descendant.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("workspace {0:?} was not found")]
    WorkspaceNotFound(String),

    #[error("workspace {0:?} already exists")]
    WorkspaceAlreadyExists(String),

    /// An id-preserving copy would collide with an existing node in the
    /// destination workspace.
    #[error("node id {id} already exists in workspace {workspace:?}")]
    IdCollision { id: NodeId, workspace: String },

    /// A structural conflict was detected mid-operation.
    #[error("concurrent modification of {0}")]
    ConcurrentModification(Location),

    /// Constructor-level argument checks: empty required fields,
    /// non-positive sizes. Raised synchronously, never deferred.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Type(#[from] TypeError),

    /// The source does not implement the requested capability.
    #[error("source {source_name:?} does not support {operation}")]
    Unsupported {
        source_name: String,
        operation: &'static str,
    },

    /// A backing-store failure (e.g. an SQL error) surfaced through the
    /// request that triggered it.
    #[error("storage error: {0}")]
    Storage(String),
}

impl RequestError {
    /// Not-found without ancestor information.
    pub fn not_found(location: Location) -> Self {
        Self::NotFound {
            location,
            lowest_existing: None,
        }
    }
}

pub type RequestResult<T> = Result<T, RequestError>;
