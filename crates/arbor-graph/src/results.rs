//! Typed read results assembled from executed requests.

use std::collections::BTreeMap;

use arbor_requests::{BranchNode, ReadBranchRequest, ReadNodeRequest};
use arbor_types::{Location, Name, NodeId, Path, Property};

/// A node as read through the façade: its resolved location, its
/// properties, and the locations of its immediate children.
///
/// Nodes are transient snapshots: constructed on read, discarded after
/// use, never persisted on their own.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    location: Location,
    properties: BTreeMap<Name, Property>,
    children: Vec<Location>,
}

impl Node {
    pub(crate) fn from_read(request: ReadNodeRequest) -> Option<Self> {
        let location = request.actual?;
        Some(Self::from_parts(
            location,
            request.properties,
            request.children,
        ))
    }

    pub(crate) fn from_branch_node(node: BranchNode) -> Self {
        Self::from_parts(node.location, node.properties, node.children)
    }

    fn from_parts(
        location: Location,
        properties: Vec<Property>,
        children: Vec<Location>,
    ) -> Self {
        let properties = properties
            .into_iter()
            .map(|property| (property.name().clone(), property))
            .collect();
        Self {
            location,
            properties,
            children,
        }
    }

    /// The fully resolved location (path and id).
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn path(&self) -> Option<&Path> {
        self.location.path()
    }

    pub fn id(&self) -> Option<NodeId> {
        self.location.id()
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn property(&self, name: &Name) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Immediate child locations in child order.
    pub fn children(&self) -> &[Location] {
        &self.children
    }
}

/// A depth-bounded subtree read in one submission.
///
/// Nodes within the requested depth are fully materialized; the children of
/// the deepest materialized nodes are present as locations on their parent
/// but have no [`Node`] of their own.
#[derive(Clone, Debug)]
pub struct Subgraph {
    root: Path,
    max_depth: usize,
    nodes: BTreeMap<Path, Node>,
}

impl Subgraph {
    pub(crate) fn from_read(request: ReadBranchRequest) -> Option<Self> {
        let root = request.actual.as_ref()?.path()?.clone();
        let nodes = request
            .nodes
            .into_iter()
            .filter_map(|node| {
                let path = node.location.path()?.clone();
                Some((path, Node::from_branch_node(node)))
            })
            .collect();
        Some(Self {
            root,
            max_depth: request.max_depth,
            nodes,
        })
    }

    /// The absolute path this subgraph was read at.
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// The depth this subgraph was read to (0 = the root node only).
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The root node of the subgraph.
    pub fn root(&self) -> Option<&Node> {
        self.nodes.get(&self.root)
    }

    /// A node by absolute path, if it was materialized.
    pub fn node(&self, path: &Path) -> Option<&Node> {
        self.nodes.get(path)
    }

    /// All materialized nodes in path order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
}
