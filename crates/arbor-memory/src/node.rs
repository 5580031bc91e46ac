use std::collections::BTreeMap;

use arbor_types::{Name, NodeId, Property, Segment};

/// One node in a workspace arena.
///
/// Parent and children are held as ids into the owning workspace's node map.
/// `segment` is `None` only for the workspace root.
#[derive(Clone, Debug)]
pub struct StoredNode {
    pub(crate) id: NodeId,
    pub(crate) parent: Option<NodeId>,
    pub(crate) segment: Option<Segment>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) properties: BTreeMap<Name, Property>,
}

impl StoredNode {
    pub(crate) fn new_root(id: NodeId) -> Self {
        Self {
            id,
            parent: None,
            segment: None,
            children: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The node's name-plus-SNS-index, or `None` for the root.
    pub fn segment(&self) -> Option<&Segment> {
        self.segment.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Child ids in child order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn properties(&self) -> &BTreeMap<Name, Property> {
        &self.properties
    }

    pub fn property(&self, name: &Name) -> Option<&Property> {
        self.properties.get(name)
    }
}
