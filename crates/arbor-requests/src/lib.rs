//! Request model for the Arbor content store.
//!
//! Every operation against a backing store (reading nodes, creating and
//! mutating branches, managing workspaces) is expressed as one variant of
//! the closed [`Request`] enum. A store's processor executes a request by
//! matching on the variant and filling in its outcome slots in place.
//!
//! # Contract
//!
//! Once executed, every request has either a non-error outcome (its "actual"
//! location or equivalent result) or a recorded [`RequestError`]: never
//! both, never neither. Read requests that match nothing complete with an
//! empty, non-error result. A [`CompositeRequest`] wraps an ordered list of
//! sub-requests that execute strictly in order on the owning connection.

pub mod error;
pub mod request;

pub use error::{RequestError, RequestResult};
pub use request::{
    BranchNode, CompositeRequest, CopyBranchRequest, CreateNodeRequest, CreateWorkspaceRequest,
    DeleteBranchRequest, DestroyWorkspaceRequest, GetWorkspacesRequest, MoveBranchRequest,
    ReadAllChildrenRequest, ReadAllPropertiesRequest, ReadBlockOfChildrenRequest,
    ReadBranchRequest, ReadNextBlockOfChildrenRequest, ReadNodeRequest, ReadPropertyRequest,
    Request, UpdatePropertiesRequest, VerifyWorkspaceRequest,
};
