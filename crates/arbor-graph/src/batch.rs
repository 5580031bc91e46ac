//! Batched submission: several verbs, one request to the connection.

use std::collections::BTreeMap;

use arbor_requests::{
    CopyBranchRequest, DeleteBranchRequest, MoveBranchRequest, Request, UpdatePropertiesRequest,
};
use arbor_types::{Location, Name, Path, Property, PropertyValue};

use crate::error::GraphResult;
use crate::graph::{build_create, Graph};

/// Accumulates operations and submits them in one round trip.
///
/// A batch with more than one queued operation is submitted as a single
/// composite request; a batch of exactly one is submitted bare. One failed
/// operation fails the whole [`execute`](Batch::execute) call.
///
/// Verbs consume and return the batch so calls chain; `.and()` is a
/// readability no-op between them:
///
/// ```no_run
/// # use arbor_graph::Graph;
/// # use arbor_types::Path;
/// # fn example(graph: &Graph) -> Result<(), arbor_graph::GraphError> {
/// graph
///     .batch()
///     .create_at("/articles", vec![])?
///     .and()
///     .set("title", Path::parse("/articles")?, "Hello")?
///     .execute()?;
/// # Ok(())
/// # }
/// ```
#[must_use = "a batch does nothing until execute() is called"]
pub struct Batch<'g> {
    graph: &'g Graph,
    requests: Vec<Request>,
}

impl<'g> Batch<'g> {
    pub(crate) fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            requests: Vec::new(),
        }
    }

    /// Readability separator; does nothing.
    pub fn and(self) -> Self {
        self
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Queue a node creation at an absolute path.
    pub fn create(mut self, path: Path, properties: Vec<Property>) -> GraphResult<Self> {
        let request = build_create(&path, properties, self.graph.workspace_name())?;
        self.requests.push(request);
        Ok(self)
    }

    /// [`create`](Self::create) with a path string.
    pub fn create_at(self, path: &str, properties: Vec<Property>) -> GraphResult<Self> {
        let path = Path::parse(path)?;
        self.create(path, properties)
    }

    /// Queue a branch deletion.
    pub fn delete(mut self, at: impl Into<Location>) -> Self {
        self.requests.push(Request::DeleteBranch(DeleteBranchRequest::new(
            at.into(),
            self.graph.workspace_name(),
        )));
        self
    }

    /// Queue a move within the current workspace.
    pub fn move_branch(mut self, from: impl Into<Location>, into: impl Into<Location>) -> Self {
        self.requests.push(Request::MoveBranch(MoveBranchRequest::new(
            from.into(),
            into.into(),
            self.graph.workspace_name(),
        )));
        self
    }

    /// Queue a copy within the current workspace.
    pub fn copy_branch(mut self, from: impl Into<Location>, into: impl Into<Location>) -> Self {
        self.requests.push(Request::CopyBranch(CopyBranchRequest::new(
            from.into(),
            self.graph.workspace_name(),
            into.into(),
            self.graph.workspace_name(),
        )));
        self
    }

    /// Queue a single-valued property set.
    pub fn set(
        self,
        name: impl AsRef<str>,
        on: impl Into<Location>,
        value: impl Into<PropertyValue>,
    ) -> GraphResult<Self> {
        self.set_values(name, on, vec![value.into()])
    }

    /// Queue a multi-valued property set.
    pub fn set_values(
        mut self,
        name: impl AsRef<str>,
        on: impl Into<Location>,
        values: Vec<PropertyValue>,
    ) -> GraphResult<Self> {
        let name = Name::parse(name.as_ref())?;
        let property = Property::new(name.clone(), values)?;
        let mut updates = BTreeMap::new();
        updates.insert(name, Some(property));
        self.requests.push(Request::UpdateProperties(
            UpdatePropertiesRequest::new(on.into(), self.graph.workspace_name(), updates),
        ));
        Ok(self)
    }

    /// Queue a property removal.
    pub fn remove_property(
        mut self,
        name: impl AsRef<str>,
        from: impl Into<Location>,
    ) -> GraphResult<Self> {
        let name = Name::parse(name.as_ref())?;
        let mut updates = BTreeMap::new();
        updates.insert(name, None);
        self.requests.push(Request::UpdateProperties(
            UpdatePropertiesRequest::new(from.into(), self.graph.workspace_name(), updates),
        ));
        Ok(self)
    }

    /// Submit everything queued as one request (a composite when more than
    /// one operation is queued) and return the completed sub-requests.
    ///
    /// If any sub-request recorded an error, the whole call fails with that
    /// error.
    pub fn execute(self) -> GraphResult<Vec<Request>> {
        if self.requests.is_empty() {
            return Ok(Vec::new());
        }
        let submitted = self.graph.submit(Request::batch(self.requests))?;
        match submitted {
            Request::Composite(composite) => Ok(composite.requests),
            single => Ok(vec![single]),
        }
    }
}

impl std::fmt::Debug for Batch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Batch")
            .field("queued", &self.requests.len())
            .finish()
    }
}
