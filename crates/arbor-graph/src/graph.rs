//! The [`Graph`] façade and its fluent operation builders.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use arbor_connector::{ExecutionContext, SourceRegistry};
use arbor_requests::{
    CopyBranchRequest, CreateNodeRequest, CreateWorkspaceRequest, DeleteBranchRequest,
    DestroyWorkspaceRequest, GetWorkspacesRequest, MoveBranchRequest, ReadAllChildrenRequest,
    ReadAllPropertiesRequest, ReadBlockOfChildrenRequest, ReadBranchRequest,
    ReadNextBlockOfChildrenRequest, ReadNodeRequest, ReadPropertyRequest, Request,
    UpdatePropertiesRequest, VerifyWorkspaceRequest,
};
use arbor_types::{Location, Name, Path, Property, PropertyValue};

use crate::batch::Batch;
use crate::error::{GraphError, GraphResult};
use crate::results::{Node, Subgraph};

/// A handle to one source and one workspace within it.
///
/// Every verb acquires a pooled connection, submits one request, and drains
/// the result; the façade itself holds no locks and no tree state, so any
/// number of `Graph` values (and clones) may be used concurrently.
#[derive(Clone)]
pub struct Graph {
    registry: Arc<SourceRegistry>,
    source_name: String,
    workspace: String,
    context: ExecutionContext,
}

impl Graph {
    /// Connect to a registered source, bound to its default workspace.
    pub fn connect(registry: Arc<SourceRegistry>, source_name: &str) -> GraphResult<Self> {
        Self::connect_with_context(registry, source_name, ExecutionContext::new())
    }

    /// Connect with a caller-supplied execution context (deterministic id
    /// assignment in tests).
    pub fn connect_with_context(
        registry: Arc<SourceRegistry>,
        source_name: &str,
        context: ExecutionContext,
    ) -> GraphResult<Self> {
        let mut graph = Self {
            registry,
            source_name: source_name.to_string(),
            workspace: String::new(),
            context,
        };
        let request = graph.submit(Request::VerifyWorkspace(VerifyWorkspaceRequest::new(None)))?;
        let Request::VerifyWorkspace(verified) = request else {
            unreachable!("submit returns the request it was given");
        };
        graph.workspace = verified
            .actual_name
            .ok_or_else(|| GraphError::InvalidOperation("source has no default workspace".into()))?;
        debug!(
            source = graph.source_name,
            workspace = graph.workspace,
            "connected graph"
        );
        Ok(graph)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The workspace this graph currently operates on.
    pub fn current_workspace(&self) -> &str {
        &self.workspace
    }

    pub(crate) fn workspace_name(&self) -> String {
        self.workspace.clone()
    }

    /// Submit one request and surface any recorded error as a typed
    /// failure.
    pub(crate) fn submit(&self, mut request: Request) -> GraphResult<Request> {
        let mut connection = self.registry.connect(&self.source_name)?;
        connection.execute(&self.context, &mut request)?;
        if let Some(error) = request.error() {
            return Err(GraphError::Request(error.clone()));
        }
        Ok(request)
    }

    // -------------------------------------------------------------------
    // Workspaces
    // -------------------------------------------------------------------

    /// The names of all workspaces in the source.
    pub fn workspaces(&self) -> GraphResult<Vec<String>> {
        let request = self.submit(Request::GetWorkspaces(GetWorkspacesRequest::new()))?;
        let Request::GetWorkspaces(list) = request else {
            unreachable!()
        };
        Ok(list.names.unwrap_or_default())
    }

    /// Switch this graph to another (existing) workspace.
    pub fn use_workspace(&mut self, name: &str) -> GraphResult<&mut Self> {
        let request = self.submit(Request::VerifyWorkspace(VerifyWorkspaceRequest::new(Some(
            name.to_string(),
        ))))?;
        let Request::VerifyWorkspace(verified) = request else {
            unreachable!()
        };
        if let Some(actual) = verified.actual_name {
            self.workspace = actual;
        }
        Ok(self)
    }

    /// Create a workspace and return its root location. The graph keeps
    /// operating on its current workspace.
    pub fn create_workspace(&self, name: &str) -> GraphResult<Location> {
        let request =
            self.submit(Request::CreateWorkspace(CreateWorkspaceRequest::new(name)))?;
        let Request::CreateWorkspace(created) = request else {
            unreachable!()
        };
        created
            .actual_root
            .ok_or_else(|| GraphError::InvalidOperation("workspace creation reported no root".into()))
    }

    pub fn destroy_workspace(&self, name: &str) -> GraphResult<()> {
        self.submit(Request::DestroyWorkspace(DestroyWorkspaceRequest::new(
            name,
        )))?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// Read the node at a location: properties and child locations.
    pub fn node_at(&self, at: impl Into<Location>) -> GraphResult<Node> {
        let request = self.submit(Request::ReadNode(ReadNodeRequest::new(
            at.into(),
            self.workspace_name(),
        )))?;
        let Request::ReadNode(read) = request else {
            unreachable!()
        };
        Node::from_read(read)
            .ok_or_else(|| GraphError::InvalidOperation("read completed without a location".into()))
    }

    pub fn properties_of(&self, of: impl Into<Location>) -> GraphResult<Vec<Property>> {
        let request = self.submit(Request::ReadAllProperties(ReadAllPropertiesRequest::new(
            of.into(),
            self.workspace_name(),
        )))?;
        let Request::ReadAllProperties(read) = request else {
            unreachable!()
        };
        Ok(read.properties)
    }

    /// All properties of a node, keyed by name.
    pub fn properties_by_name_of(
        &self,
        of: impl Into<Location>,
    ) -> GraphResult<BTreeMap<Name, Property>> {
        Ok(self
            .properties_of(of)?
            .into_iter()
            .map(|property| (property.name().clone(), property))
            .collect())
    }

    /// One property by name; `Ok(None)` when the node has no such property.
    pub fn property_of(
        &self,
        of: impl Into<Location>,
        name: impl AsRef<str>,
    ) -> GraphResult<Option<Property>> {
        let name = Name::parse(name.as_ref())?;
        let request = self.submit(Request::ReadProperty(ReadPropertyRequest::new(
            of.into(),
            self.workspace_name(),
            name,
        )))?;
        let Request::ReadProperty(read) = request else {
            unreachable!()
        };
        Ok(read.property)
    }

    /// All children of a node, in child order.
    pub fn children_of(&self, of: impl Into<Location>) -> GraphResult<Vec<Location>> {
        let request = self.submit(Request::ReadAllChildren(ReadAllChildrenRequest::new(
            of.into(),
            self.workspace_name(),
        )))?;
        let Request::ReadAllChildren(read) = request else {
            unreachable!()
        };
        Ok(read.children)
    }

    /// A bounded block of children starting at a 0-based index.
    pub fn children_block(
        &self,
        of: impl Into<Location>,
        start_index: usize,
        count: usize,
    ) -> GraphResult<Vec<Location>> {
        let request = self.submit(Request::ReadBlockOfChildren(ReadBlockOfChildrenRequest::new(
            of.into(),
            self.workspace_name(),
            start_index,
            count,
        )))?;
        let Request::ReadBlockOfChildren(read) = request else {
            unreachable!()
        };
        Ok(read.children)
    }

    /// A bounded block of children following the given sibling.
    pub fn children_after(
        &self,
        after: impl Into<Location>,
        count: usize,
    ) -> GraphResult<Vec<Location>> {
        let request = self.submit(Request::ReadNextBlockOfChildren(
            ReadNextBlockOfChildrenRequest::new(after.into(), self.workspace_name(), count),
        ))?;
        let Request::ReadNextBlockOfChildren(read) = request else {
            unreachable!()
        };
        Ok(read.children)
    }

    /// Read a subtree: `graph.subgraph_of_depth(2).at(path)?` materializes
    /// the node, its children, and its grandchildren.
    pub fn subgraph_of_depth(&self, depth: usize) -> AtDepth<'_> {
        AtDepth { graph: self, depth }
    }

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Create a node at the given absolute path (the parent must exist).
    pub fn create(&self, path: Path, properties: Vec<Property>) -> GraphResult<Location> {
        let request = self.submit(build_create(&path, properties, self.workspace_name())?)?;
        let Request::CreateNode(created) = request else {
            unreachable!()
        };
        created
            .actual
            .ok_or_else(|| GraphError::InvalidOperation("create reported no location".into()))
    }

    /// [`create`](Self::create) with a path string.
    pub fn create_at(&self, path: &str, properties: Vec<Property>) -> GraphResult<Location> {
        self.create(Path::parse(path)?, properties)
    }

    /// Delete the branch at a location.
    pub fn delete_at(&self, at: impl Into<Location>) -> GraphResult<()> {
        self.submit(Request::DeleteBranch(DeleteBranchRequest::new(
            at.into(),
            self.workspace_name(),
        )))?;
        Ok(())
    }

    /// Move a branch: `graph.move_branch(from).into(new_parent)?`. Optional
    /// `.before(..)` and `.named(..)` refine the destination.
    pub fn move_branch(&self, from: impl Into<Location>) -> MoveTo<'_> {
        MoveTo {
            graph: self,
            from: from.into(),
            before: None,
            new_name: None,
        }
    }

    /// Copy a branch: `graph.copy_branch(from).to(new_parent)?`. Optional
    /// workspace overrides, `.named(..)`, and `.preserving_ids()`.
    pub fn copy_branch(&self, from: impl Into<Location>) -> CopyTo<'_> {
        CopyTo {
            graph: self,
            from: from.into(),
            from_workspace: self.workspace_name(),
            into_workspace: self.workspace_name(),
            desired_name: None,
            preserve_ids: false,
        }
    }

    /// Set a property: `graph.set("title").on(path).to("Hello")?`.
    pub fn set(&self, name: impl AsRef<str>) -> SetProperty<'_> {
        SetProperty {
            graph: self,
            name: Name::parse(name.as_ref()),
        }
    }

    /// Remove a property: `graph.remove_property("title").from(path)?`.
    pub fn remove_property(&self, name: impl AsRef<str>) -> RemoveProperty<'_> {
        RemoveProperty {
            graph: self,
            name: Name::parse(name.as_ref()),
        }
    }

    /// Start accumulating operations for one batched submission.
    pub fn batch(&self) -> Batch<'_> {
        Batch::new(self)
    }
}

/// Builds the create request shared by [`Graph::create`] and the batch.
pub(crate) fn build_create(
    path: &Path,
    properties: Vec<Property>,
    workspace: String,
) -> GraphResult<Request> {
    let Some(parent) = path.parent() else {
        return Err(GraphError::InvalidOperation(
            "the root node always exists and cannot be created".into(),
        ));
    };
    let name = path
        .last_segment()
        .map(|segment| segment.name().clone())
        .ok_or_else(|| GraphError::InvalidOperation("a created node needs a name".into()))?;
    Ok(Request::CreateNode(CreateNodeRequest::new(
        Location::from_path(parent),
        workspace,
        name,
        properties,
    )))
}

/// Terminal builder for [`Graph::subgraph_of_depth`].
pub struct AtDepth<'g> {
    graph: &'g Graph,
    depth: usize,
}

impl AtDepth<'_> {
    pub fn at(self, at: impl Into<Location>) -> GraphResult<Subgraph> {
        let request = self.graph.submit(Request::ReadBranch(ReadBranchRequest::new(
            at.into(),
            self.graph.workspace_name(),
            self.depth,
        )))?;
        let Request::ReadBranch(read) = request else {
            unreachable!()
        };
        Subgraph::from_read(read)
            .ok_or_else(|| GraphError::InvalidOperation("read completed without a location".into()))
    }
}

/// Builder for [`Graph::move_branch`].
pub struct MoveTo<'g> {
    graph: &'g Graph,
    from: Location,
    before: Option<Location>,
    new_name: Option<Name>,
}

impl MoveTo<'_> {
    /// Place the moved branch before this sibling of the new parent.
    pub fn before(mut self, sibling: impl Into<Location>) -> Self {
        self.before = Some(sibling.into());
        self
    }

    /// Rename the branch as part of the move.
    pub fn named(mut self, name: impl AsRef<str>) -> GraphResult<Self> {
        self.new_name = Some(Name::parse(name.as_ref())?);
        Ok(self)
    }

    /// Execute the move; returns the branch root's new location.
    pub fn into(self, new_parent: impl Into<Location>) -> GraphResult<Location> {
        let mut request =
            MoveBranchRequest::new(self.from, new_parent.into(), self.graph.workspace_name());
        request.before = self.before;
        request.desired_name = self.new_name;
        let request = self.graph.submit(Request::MoveBranch(request))?;
        let Request::MoveBranch(moved) = request else {
            unreachable!()
        };
        moved
            .actual_new
            .ok_or_else(|| GraphError::InvalidOperation("move reported no location".into()))
    }
}

/// Builder for [`Graph::copy_branch`].
pub struct CopyTo<'g> {
    graph: &'g Graph,
    from: Location,
    from_workspace: String,
    into_workspace: String,
    desired_name: Option<Name>,
    preserve_ids: bool,
}

impl CopyTo<'_> {
    /// Copy from another workspace of the same source.
    pub fn from_workspace(mut self, workspace: &str) -> Self {
        self.from_workspace = workspace.to_string();
        self
    }

    /// Copy into another workspace of the same source.
    pub fn into_workspace(mut self, workspace: &str) -> Self {
        self.into_workspace = workspace.to_string();
        self
    }

    /// Name the copy instead of reusing the source name.
    pub fn named(mut self, name: impl AsRef<str>) -> GraphResult<Self> {
        self.desired_name = Some(Name::parse(name.as_ref())?);
        Ok(self)
    }

    /// Keep the source node ids instead of generating fresh ones. The
    /// caller must guarantee the destination has no colliding node.
    pub fn preserving_ids(mut self) -> Self {
        self.preserve_ids = true;
        self
    }

    /// Execute the copy; returns the new branch root's location.
    pub fn to(self, new_parent: impl Into<Location>) -> GraphResult<Location> {
        let mut request = CopyBranchRequest::new(
            self.from,
            self.from_workspace,
            new_parent.into(),
            self.into_workspace,
        );
        request.desired_name = self.desired_name;
        request.preserve_ids = self.preserve_ids;
        let request = self.graph.submit(Request::CopyBranch(request))?;
        let Request::CopyBranch(copied) = request else {
            unreachable!()
        };
        copied
            .actual_new
            .ok_or_else(|| GraphError::InvalidOperation("copy reported no location".into()))
    }
}

/// First step of [`Graph::set`]: choose the node.
pub struct SetProperty<'g> {
    graph: &'g Graph,
    name: Result<Name, arbor_types::TypeError>,
}

impl<'g> SetProperty<'g> {
    pub fn on(self, location: impl Into<Location>) -> SetOn<'g> {
        SetOn {
            graph: self.graph,
            name: self.name,
            location: location.into(),
        }
    }
}

/// Second step of [`Graph::set`]: choose the value(s).
pub struct SetOn<'g> {
    graph: &'g Graph,
    name: Result<Name, arbor_types::TypeError>,
    location: Location,
}

impl SetOn<'_> {
    /// Set a single value.
    pub fn to(self, value: impl Into<PropertyValue>) -> GraphResult<Location> {
        self.to_values(vec![value.into()])
    }

    /// Set an ordered, non-empty list of values.
    pub fn to_values(self, values: Vec<PropertyValue>) -> GraphResult<Location> {
        let name = self.name?;
        let property = Property::new(name.clone(), values)?;
        let mut updates = BTreeMap::new();
        updates.insert(name, Some(property));
        let request = self.graph.submit(Request::UpdateProperties(
            UpdatePropertiesRequest::new(self.location, self.graph.workspace_name(), updates),
        ))?;
        let Request::UpdateProperties(updated) = request else {
            unreachable!()
        };
        updated
            .actual
            .ok_or_else(|| GraphError::InvalidOperation("update reported no location".into()))
    }
}

/// Builder for [`Graph::remove_property`].
pub struct RemoveProperty<'g> {
    graph: &'g Graph,
    name: Result<Name, arbor_types::TypeError>,
}

impl RemoveProperty<'_> {
    pub fn from(self, location: impl Into<Location>) -> GraphResult<Location> {
        let name = self.name?;
        let mut updates = BTreeMap::new();
        updates.insert(name, None);
        let request = self.graph.submit(Request::UpdateProperties(
            UpdatePropertiesRequest::new(location.into(), self.graph.workspace_name(), updates),
        ))?;
        let Request::UpdateProperties(updated) = request else {
            unreachable!()
        };
        updated
            .actual
            .ok_or_else(|| GraphError::InvalidOperation("update reported no location".into()))
    }
}
