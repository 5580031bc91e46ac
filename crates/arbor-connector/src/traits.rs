use std::time::Duration;

use arbor_requests::Request;

use crate::context::ExecutionContext;
use crate::error::ConnectorResult;

/// What a backing store can do.
///
/// Callers consult capabilities before issuing requests a store cannot
/// honor; a store receiving a request outside its capability set records an
/// `Unsupported` error on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub same_name_siblings: bool,
    pub updates: bool,
    pub references: bool,
    pub creating_workspaces: bool,
    pub locks: bool,
    pub queries: bool,
    pub searches: bool,
    pub events: bool,
}

impl Capabilities {
    /// A read-only store with none of the optional features.
    pub const fn read_only() -> Self {
        Self {
            same_name_siblings: false,
            updates: false,
            references: false,
            creating_workspaces: false,
            locks: false,
            queries: false,
            searches: false,
            events: false,
        }
    }

    /// The capability set shared by both built-in stores: writable trees
    /// with same-name siblings, references, and workspace creation.
    pub const fn writable_tree() -> Self {
        Self {
            same_name_siblings: true,
            updates: true,
            references: true,
            creating_workspaces: true,
            locks: false,
            queries: false,
            searches: false,
            events: false,
        }
    }
}

/// How long results produced through a connection may be cached by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CachePolicy {
    pub time_to_live: Duration,
}

/// A live handle to one backing store.
///
/// Connections are single-threaded by construction: `execute` takes `&mut
/// self`, so requests on one connection run strictly in sequence. A
/// composite request's sub-requests execute in list order on the owning
/// connection.
pub trait Connection: Send {
    /// The name of the source this connection belongs to.
    fn source_name(&self) -> &str;

    /// Execute one request, mutating its outcome slots in place.
    ///
    /// Returns `Err` only for connector-level failures (the store became
    /// unreachable, a transaction could not be opened). Request-level
    /// failures are recorded on the request and return `Ok`.
    fn execute(
        &mut self,
        context: &ExecutionContext,
        request: &mut Request,
    ) -> ConnectorResult<()>;

    /// Liveness check, bounded by `timeout`. `true` means the connection is
    /// usable.
    fn ping(&self, timeout: Duration) -> bool;

    /// Release resources. Called once when the pool discards the
    /// connection; implementations must tolerate repeated calls.
    fn close(&mut self) {}

    /// The cache policy for results read through this connection, if the
    /// store defines one.
    fn default_cache_policy(&self) -> Option<CachePolicy> {
        None
    }
}

/// A named factory for [`Connection`]s.
pub trait Source: Send + Sync {
    /// The registered name of this source.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Open a fresh connection. The pool calls this on demand, retrying up
    /// to the larger of its configured failed-attempt limit and this
    /// source's [`retry_limit`](Source::retry_limit).
    fn connect(&self) -> ConnectorResult<Box<dyn Connection>>;

    /// The default workspace name for connections to this source.
    fn default_workspace(&self) -> &str;

    /// How many failed connect attempts this source asks its callers to
    /// tolerate before giving up.
    fn retry_limit(&self) -> u32 {
        0
    }
}
