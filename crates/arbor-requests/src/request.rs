//! The closed set of request variants and their outcome slots.
//!
//! Each variant owns a payload struct with typed inputs, slots the executing
//! store fills in (`actual` locations, collected properties/children), and an
//! error slot. Processors receive `&mut Request`, match once, and mutate the
//! payload in place.

use std::collections::BTreeMap;

use arbor_types::{Location, Name, Property};

use crate::error::RequestError;

/// Read a node's properties and immediate children in one round trip.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadNodeRequest {
    pub at: Location,
    pub workspace: String,
    /// Matched properties, appended during execution.
    pub properties: Vec<Property>,
    /// Matched child locations, appended in child order during execution.
    pub children: Vec<Location>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl ReadNodeRequest {
    pub fn new(at: Location, workspace: impl Into<String>) -> Self {
        Self {
            at,
            workspace: workspace.into(),
            properties: Vec::new(),
            children: Vec::new(),
            actual: None,
            error: None,
        }
    }
}

/// Read all properties of a node.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadAllPropertiesRequest {
    pub of: Location,
    pub workspace: String,
    pub properties: Vec<Property>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl ReadAllPropertiesRequest {
    pub fn new(of: Location, workspace: impl Into<String>) -> Self {
        Self {
            of,
            workspace: workspace.into(),
            properties: Vec::new(),
            actual: None,
            error: None,
        }
    }
}

/// Read one property of a node by name.
///
/// A missing property is an empty, non-error result (the node itself must
/// exist).
#[derive(Clone, Debug, PartialEq)]
pub struct ReadPropertyRequest {
    pub of: Location,
    pub workspace: String,
    pub name: Name,
    pub property: Option<Property>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl ReadPropertyRequest {
    pub fn new(of: Location, workspace: impl Into<String>, name: Name) -> Self {
        Self {
            of,
            workspace: workspace.into(),
            name,
            property: None,
            actual: None,
            error: None,
        }
    }
}

/// Read all children of a node, in child order.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadAllChildrenRequest {
    pub of: Location,
    pub workspace: String,
    pub children: Vec<Location>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl ReadAllChildrenRequest {
    pub fn new(of: Location, workspace: impl Into<String>) -> Self {
        Self {
            of,
            workspace: workspace.into(),
            children: Vec::new(),
            actual: None,
            error: None,
        }
    }
}

/// Read a bounded block of children starting at a 0-based child index.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadBlockOfChildrenRequest {
    pub of: Location,
    pub workspace: String,
    pub start_index: usize,
    pub count: usize,
    pub children: Vec<Location>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl ReadBlockOfChildrenRequest {
    pub fn new(
        of: Location,
        workspace: impl Into<String>,
        start_index: usize,
        count: usize,
    ) -> Self {
        Self {
            of,
            workspace: workspace.into(),
            start_index,
            count,
            children: Vec::new(),
            actual: None,
            error: None,
        }
    }
}

/// Read a bounded block of children following a given sibling.
///
/// `actual` resolves the `after` sibling, not the parent.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadNextBlockOfChildrenRequest {
    pub after: Location,
    pub workspace: String,
    pub count: usize,
    pub children: Vec<Location>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl ReadNextBlockOfChildrenRequest {
    pub fn new(after: Location, workspace: impl Into<String>, count: usize) -> Self {
        Self {
            after,
            workspace: workspace.into(),
            count,
            children: Vec::new(),
            actual: None,
            error: None,
        }
    }
}

/// One node of a materialized branch read: its resolved location, its
/// properties, and the locations of its immediate children.
#[derive(Clone, Debug, PartialEq)]
pub struct BranchNode {
    pub location: Location,
    pub properties: Vec<Property>,
    pub children: Vec<Location>,
}

/// Read a subtree to a bounded depth (0 = the root node only).
///
/// Nodes are appended in level order, parents before descendants and
/// siblings in child order, so the collected list is deterministic for an
/// unchanged tree.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadBranchRequest {
    pub at: Location,
    pub workspace: String,
    pub max_depth: usize,
    pub nodes: Vec<BranchNode>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl ReadBranchRequest {
    pub fn new(at: Location, workspace: impl Into<String>, max_depth: usize) -> Self {
        Self {
            at,
            workspace: workspace.into(),
            max_depth,
            nodes: Vec::new(),
            actual: None,
            error: None,
        }
    }
}

/// Create a node under a parent, appended as the last child. The store
/// assigns the same-name-sibling index and a fresh node id.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateNodeRequest {
    pub under: Location,
    pub workspace: String,
    pub name: Name,
    pub properties: Vec<Property>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl CreateNodeRequest {
    pub fn new(
        under: Location,
        workspace: impl Into<String>,
        name: Name,
        properties: Vec<Property>,
    ) -> Self {
        Self {
            under,
            workspace: workspace.into(),
            name,
            properties,
            actual: None,
            error: None,
        }
    }
}

/// Set and/or remove properties on a node in one operation.
///
/// A `Some(property)` entry replaces any property with that name; a `None`
/// entry removes it. Removing an absent property is a no-op, not an error.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdatePropertiesRequest {
    pub on: Location,
    pub workspace: String,
    pub updates: BTreeMap<Name, Option<Property>>,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl UpdatePropertiesRequest {
    pub fn new(
        on: Location,
        workspace: impl Into<String>,
        updates: BTreeMap<Name, Option<Property>>,
    ) -> Self {
        Self {
            on,
            workspace: workspace.into(),
            updates,
            actual: None,
            error: None,
        }
    }
}

/// Move a branch beneath a new parent within one workspace, optionally
/// before a named sibling and/or under a new name.
///
/// The moved node keeps its id and properties; same-name-sibling indexes are
/// recomputed at both the old and new parent.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveBranchRequest {
    pub from: Location,
    pub into: Location,
    pub before: Option<Location>,
    pub desired_name: Option<Name>,
    pub workspace: String,
    /// The source location as resolved before the move.
    pub actual_old: Option<Location>,
    /// The branch root's location after the move.
    pub actual_new: Option<Location>,
    pub error: Option<RequestError>,
}

impl MoveBranchRequest {
    pub fn new(from: Location, into: Location, workspace: impl Into<String>) -> Self {
        Self {
            from,
            into,
            before: None,
            desired_name: None,
            workspace: workspace.into(),
            actual_old: None,
            actual_new: None,
            error: None,
        }
    }
}

/// Copy a branch, possibly into another workspace.
///
/// With `preserve_ids` the copies keep the source ids (the caller must
/// guarantee the destination has no colliding node); otherwise every copied
/// node gets a fresh id and reference values pointing inside the copied
/// subgraph are rewritten to the corresponding new ids.
#[derive(Clone, Debug, PartialEq)]
pub struct CopyBranchRequest {
    pub from: Location,
    pub from_workspace: String,
    pub into: Location,
    pub into_workspace: String,
    pub desired_name: Option<Name>,
    pub preserve_ids: bool,
    /// The source location as resolved at execution.
    pub actual_old: Option<Location>,
    /// The location of the new copy.
    pub actual_new: Option<Location>,
    pub error: Option<RequestError>,
}

impl CopyBranchRequest {
    pub fn new(
        from: Location,
        from_workspace: impl Into<String>,
        into: Location,
        into_workspace: impl Into<String>,
    ) -> Self {
        Self {
            from,
            from_workspace: from_workspace.into(),
            into,
            into_workspace: into_workspace.into(),
            desired_name: None,
            preserve_ids: false,
            actual_old: None,
            actual_new: None,
            error: None,
        }
    }
}

/// Delete a branch (the node and its whole subtree).
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteBranchRequest {
    pub at: Location,
    pub workspace: String,
    pub actual: Option<Location>,
    pub error: Option<RequestError>,
}

impl DeleteBranchRequest {
    pub fn new(at: Location, workspace: impl Into<String>) -> Self {
        Self {
            at,
            workspace: workspace.into(),
            actual: None,
            error: None,
        }
    }
}

/// List the names of all workspaces in the source.
#[derive(Clone, Debug, PartialEq)]
pub struct GetWorkspacesRequest {
    pub names: Option<Vec<String>>,
    pub error: Option<RequestError>,
}

impl GetWorkspacesRequest {
    pub fn new() -> Self {
        Self {
            names: None,
            error: None,
        }
    }
}

impl Default for GetWorkspacesRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a workspace name (or the source default when `None`) to its
/// actual name and root location.
#[derive(Clone, Debug, PartialEq)]
pub struct VerifyWorkspaceRequest {
    pub name: Option<String>,
    pub actual_name: Option<String>,
    pub actual_root: Option<Location>,
    pub error: Option<RequestError>,
}

impl VerifyWorkspaceRequest {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            actual_name: None,
            actual_root: None,
            error: None,
        }
    }
}

/// Create a new, empty workspace.
#[derive(Clone, Debug, PartialEq)]
pub struct CreateWorkspaceRequest {
    pub desired_name: String,
    pub actual_name: Option<String>,
    pub actual_root: Option<Location>,
    pub error: Option<RequestError>,
}

impl CreateWorkspaceRequest {
    pub fn new(desired_name: impl Into<String>) -> Self {
        Self {
            desired_name: desired_name.into(),
            actual_name: None,
            actual_root: None,
            error: None,
        }
    }
}

/// Destroy a workspace and all of its content.
#[derive(Clone, Debug, PartialEq)]
pub struct DestroyWorkspaceRequest {
    pub name: String,
    /// The root location of the destroyed workspace.
    pub actual_root: Option<Location>,
    pub error: Option<RequestError>,
}

impl DestroyWorkspaceRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actual_root: None,
            error: None,
        }
    }
}

/// An ordered batch of sub-requests executed as one submission.
///
/// Processors unpack a composite transparently: sub-requests run strictly in
/// list order on the owning connection.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositeRequest {
    pub requests: Vec<Request>,
}

impl CompositeRequest {
    /// Wrap a list of requests. A batch of exactly one request should be
    /// submitted directly instead; [`Request::batch`] does so.
    pub fn new(requests: Vec<Request>) -> Self {
        Self { requests }
    }

    /// The error of the first failed sub-request, if any.
    pub fn first_error(&self) -> Option<&RequestError> {
        self.requests.iter().find_map(Request::error)
    }
}

/// All operations understood by a backing store.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    ReadNode(ReadNodeRequest),
    ReadAllProperties(ReadAllPropertiesRequest),
    ReadProperty(ReadPropertyRequest),
    ReadAllChildren(ReadAllChildrenRequest),
    ReadBlockOfChildren(ReadBlockOfChildrenRequest),
    ReadNextBlockOfChildren(ReadNextBlockOfChildrenRequest),
    ReadBranch(ReadBranchRequest),
    CreateNode(CreateNodeRequest),
    UpdateProperties(UpdatePropertiesRequest),
    MoveBranch(MoveBranchRequest),
    CopyBranch(CopyBranchRequest),
    DeleteBranch(DeleteBranchRequest),
    GetWorkspaces(GetWorkspacesRequest),
    VerifyWorkspace(VerifyWorkspaceRequest),
    CreateWorkspace(CreateWorkspaceRequest),
    DestroyWorkspace(DestroyWorkspaceRequest),
    Composite(CompositeRequest),
}

impl Request {
    /// Wrap queued operations for a single submission: the one request when
    /// exactly one is queued, a [`CompositeRequest`] otherwise.
    pub fn batch(mut requests: Vec<Request>) -> Request {
        if requests.len() == 1 {
            requests.remove(0)
        } else {
            Request::Composite(CompositeRequest::new(requests))
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ReadNode(_) => "ReadNode",
            Self::ReadAllProperties(_) => "ReadAllProperties",
            Self::ReadProperty(_) => "ReadProperty",
            Self::ReadAllChildren(_) => "ReadAllChildren",
            Self::ReadBlockOfChildren(_) => "ReadBlockOfChildren",
            Self::ReadNextBlockOfChildren(_) => "ReadNextBlockOfChildren",
            Self::ReadBranch(_) => "ReadBranch",
            Self::CreateNode(_) => "CreateNode",
            Self::UpdateProperties(_) => "UpdateProperties",
            Self::MoveBranch(_) => "MoveBranch",
            Self::CopyBranch(_) => "CopyBranch",
            Self::DeleteBranch(_) => "DeleteBranch",
            Self::GetWorkspaces(_) => "GetWorkspaces",
            Self::VerifyWorkspace(_) => "VerifyWorkspace",
            Self::CreateWorkspace(_) => "CreateWorkspace",
            Self::DestroyWorkspace(_) => "DestroyWorkspace",
            Self::Composite(_) => "Composite",
        }
    }

    /// Returns `true` if executing this request cannot change the store.
    pub fn is_read_only(&self) -> bool {
        match self {
            Self::ReadNode(_)
            | Self::ReadAllProperties(_)
            | Self::ReadProperty(_)
            | Self::ReadAllChildren(_)
            | Self::ReadBlockOfChildren(_)
            | Self::ReadNextBlockOfChildren(_)
            | Self::ReadBranch(_)
            | Self::GetWorkspaces(_)
            | Self::VerifyWorkspace(_) => true,
            Self::CreateNode(_)
            | Self::UpdateProperties(_)
            | Self::MoveBranch(_)
            | Self::CopyBranch(_)
            | Self::DeleteBranch(_)
            | Self::CreateWorkspace(_)
            | Self::DestroyWorkspace(_) => false,
            Self::Composite(composite) => composite.requests.iter().all(Request::is_read_only),
        }
    }

    /// The recorded error, if execution failed. For a composite, the first
    /// failed sub-request's error.
    pub fn error(&self) -> Option<&RequestError> {
        match self {
            Self::ReadNode(r) => r.error.as_ref(),
            Self::ReadAllProperties(r) => r.error.as_ref(),
            Self::ReadProperty(r) => r.error.as_ref(),
            Self::ReadAllChildren(r) => r.error.as_ref(),
            Self::ReadBlockOfChildren(r) => r.error.as_ref(),
            Self::ReadNextBlockOfChildren(r) => r.error.as_ref(),
            Self::ReadBranch(r) => r.error.as_ref(),
            Self::CreateNode(r) => r.error.as_ref(),
            Self::UpdateProperties(r) => r.error.as_ref(),
            Self::MoveBranch(r) => r.error.as_ref(),
            Self::CopyBranch(r) => r.error.as_ref(),
            Self::DeleteBranch(r) => r.error.as_ref(),
            Self::GetWorkspaces(r) => r.error.as_ref(),
            Self::VerifyWorkspace(r) => r.error.as_ref(),
            Self::CreateWorkspace(r) => r.error.as_ref(),
            Self::DestroyWorkspace(r) => r.error.as_ref(),
            Self::Composite(c) => c.first_error(),
        }
    }

    /// Record an error on this request, replacing any outcome.
    pub fn set_error(&mut self, error: RequestError) {
        match self {
            Self::ReadNode(r) => r.error = Some(error),
            Self::ReadAllProperties(r) => r.error = Some(error),
            Self::ReadProperty(r) => r.error = Some(error),
            Self::ReadAllChildren(r) => r.error = Some(error),
            Self::ReadBlockOfChildren(r) => r.error = Some(error),
            Self::ReadNextBlockOfChildren(r) => r.error = Some(error),
            Self::ReadBranch(r) => r.error = Some(error),
            Self::CreateNode(r) => r.error = Some(error),
            Self::UpdateProperties(r) => r.error = Some(error),
            Self::MoveBranch(r) => r.error = Some(error),
            Self::CopyBranch(r) => r.error = Some(error),
            Self::DeleteBranch(r) => r.error = Some(error),
            Self::GetWorkspaces(r) => r.error = Some(error),
            Self::VerifyWorkspace(r) => r.error = Some(error),
            Self::CreateWorkspace(r) => r.error = Some(error),
            Self::DestroyWorkspace(r) => r.error = Some(error),
            // Composite errors live on the failed sub-request.
            Self::Composite(_) => {}
        }
    }

    /// Returns `true` once the request has an outcome or an error.
    pub fn is_completed(&self) -> bool {
        if self.error().is_some() {
            return true;
        }
        match self {
            Self::ReadNode(r) => r.actual.is_some(),
            Self::ReadAllProperties(r) => r.actual.is_some(),
            Self::ReadProperty(r) => r.actual.is_some(),
            Self::ReadAllChildren(r) => r.actual.is_some(),
            Self::ReadBlockOfChildren(r) => r.actual.is_some(),
            Self::ReadNextBlockOfChildren(r) => r.actual.is_some(),
            Self::ReadBranch(r) => r.actual.is_some(),
            Self::CreateNode(r) => r.actual.is_some(),
            Self::UpdateProperties(r) => r.actual.is_some(),
            Self::MoveBranch(r) => r.actual_new.is_some(),
            Self::CopyBranch(r) => r.actual_new.is_some(),
            Self::DeleteBranch(r) => r.actual.is_some(),
            Self::GetWorkspaces(r) => r.names.is_some(),
            Self::VerifyWorkspace(r) => r.actual_name.is_some(),
            Self::CreateWorkspace(r) => r.actual_name.is_some(),
            Self::DestroyWorkspace(r) => r.actual_root.is_some(),
            Self::Composite(c) => c.requests.iter().all(Request::is_completed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::Path;

    fn loc(path: &str) -> Location {
        Location::from_path(Path::parse(path).unwrap())
    }

    fn name(s: &str) -> Name {
        Name::local(s).unwrap()
    }

    // -----------------------------------------------------------------------
    // Completion contract
    // -----------------------------------------------------------------------

    #[test]
    fn fresh_requests_are_incomplete() {
        let requests = vec![
            Request::ReadNode(ReadNodeRequest::new(loc("/a"), "main")),
            Request::CreateNode(CreateNodeRequest::new(loc("/"), "main", name("a"), vec![])),
            Request::DeleteBranch(DeleteBranchRequest::new(loc("/a"), "main")),
            Request::GetWorkspaces(GetWorkspacesRequest::new()),
        ];
        for request in requests {
            assert!(!request.is_completed(), "{} incomplete", request.type_name());
            assert!(request.error().is_none());
        }
    }

    #[test]
    fn setting_the_actual_location_completes_a_read() {
        let mut read = ReadNodeRequest::new(loc("/a"), "main");
        read.actual = Some(loc("/a"));
        let request = Request::ReadNode(read);
        assert!(request.is_completed());
        assert!(request.error().is_none());
    }

    #[test]
    fn empty_read_result_is_success() {
        // A node with no children: the children list stays empty, and only
        // the actual location marks completion.
        let mut read = ReadAllChildrenRequest::new(loc("/a"), "main");
        read.actual = Some(loc("/a"));
        let request = Request::ReadAllChildren(read);
        assert!(request.is_completed());
        assert!(request.error().is_none());
    }

    #[test]
    fn recording_an_error_completes_a_request() {
        let mut request = Request::DeleteBranch(DeleteBranchRequest::new(loc("/a"), "main"));
        request.set_error(RequestError::not_found(loc("/a")));
        assert!(request.is_completed());
        assert!(matches!(
            request.error(),
            Some(RequestError::NotFound { .. })
        ));
    }

    #[test]
    fn move_completes_only_with_the_new_location() {
        let mut mv = MoveBranchRequest::new(loc("/a"), loc("/b"), "main");
        mv.actual_old = Some(loc("/a"));
        assert!(!Request::MoveBranch(mv.clone()).is_completed());
        mv.actual_new = Some(loc("/b/a"));
        assert!(Request::MoveBranch(mv).is_completed());
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    #[test]
    fn batch_of_one_stays_bare() {
        let single = Request::batch(vec![Request::GetWorkspaces(GetWorkspacesRequest::new())]);
        assert_eq!(single.type_name(), "GetWorkspaces");
    }

    #[test]
    fn batch_of_many_becomes_composite() {
        let batched = Request::batch(vec![
            Request::CreateNode(CreateNodeRequest::new(loc("/"), "main", name("a"), vec![])),
            Request::DeleteBranch(DeleteBranchRequest::new(loc("/b"), "main")),
        ]);
        let Request::Composite(composite) = &batched else {
            panic!("expected a composite, got {}", batched.type_name());
        };
        assert_eq!(composite.requests.len(), 2);
        assert!(!batched.is_read_only());
    }

    #[test]
    fn composite_error_is_first_sub_error() {
        let ok = Request::GetWorkspaces({
            let mut r = GetWorkspacesRequest::new();
            r.names = Some(vec!["main".into()]);
            r
        });
        let mut failed = Request::DeleteBranch(DeleteBranchRequest::new(loc("/a"), "main"));
        failed.set_error(RequestError::WorkspaceNotFound("other".into()));
        let composite = Request::Composite(CompositeRequest::new(vec![ok, failed]));
        assert!(composite.is_completed());
        assert!(matches!(
            composite.error(),
            Some(RequestError::WorkspaceNotFound(_))
        ));
    }

    #[test]
    fn composite_read_only_requires_all_reads() {
        let reads = Request::Composite(CompositeRequest::new(vec![
            Request::ReadNode(ReadNodeRequest::new(loc("/a"), "main")),
            Request::ReadAllChildren(ReadAllChildrenRequest::new(loc("/a"), "main")),
        ]));
        assert!(reads.is_read_only());

        let mixed = Request::Composite(CompositeRequest::new(vec![
            Request::ReadNode(ReadNodeRequest::new(loc("/a"), "main")),
            Request::DeleteBranch(DeleteBranchRequest::new(loc("/a"), "main")),
        ]));
        assert!(!mixed.is_read_only());
    }
}
