//! A single workspace tree and its structural operations.
//!
//! # Invariants
//!
//! - Siblings sharing a [`Name`] carry contiguous 1-based SNS indexes in
//!   child order; every structural mutation re-establishes this before it
//!   returns.
//! - Every non-root node is reachable from the root, and every child id in
//!   a node's child list resolves in the arena.
//! - The root keeps the same id for the workspace's lifetime, including
//!   across a delete of the root branch (which empties the tree and
//!   re-creates the root in place).

use std::collections::{BTreeMap, HashMap};

use tracing::debug;

use arbor_requests::RequestError;
use arbor_types::{Location, Name, NodeId, Path, Property, Segment};

use crate::node::StoredNode;

/// A named tree of [`StoredNode`]s addressed by id.
#[derive(Clone, Debug)]
pub struct Workspace {
    name: String,
    root: NodeId,
    nodes: HashMap<NodeId, StoredNode>,
}

impl Workspace {
    /// Create an empty workspace: just a root node with the given id.
    pub fn new(name: impl Into<String>, root: NodeId) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(root, StoredNode::new_root(root));
        Self {
            name: name.into(),
            root,
            nodes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Total number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> Option<&StoredNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    // -------------------------------------------------------------------
    // Path resolution
    // -------------------------------------------------------------------

    /// Resolve a path segment-by-segment against current children.
    ///
    /// Returns `None` as soon as any segment has no match; absence is not
    /// an error at this level.
    pub fn resolve(&self, path: &Path) -> Option<NodeId> {
        let mut current = self.root;
        for segment in path.segments() {
            current = self.child_by_segment(current, segment)?;
        }
        Some(current)
    }

    /// The deepest prefix of `path` that resolves; the root path when even
    /// the first segment is missing.
    pub fn lowest_existing(&self, path: &Path) -> Path {
        let mut current = self.root;
        for (depth, segment) in path.segments().iter().enumerate() {
            match self.child_by_segment(current, segment) {
                Some(child) => current = child,
                None => return path.subpath(depth),
            }
        }
        path.clone()
    }

    /// The absolute path of a node, walking parents up to the root.
    pub fn path_for(&self, id: NodeId) -> Option<Path> {
        let mut segments = Vec::new();
        let mut current = self.nodes.get(&id)?;
        while let Some(segment) = current.segment.clone() {
            segments.push(segment);
            let parent = current.parent?;
            current = self.nodes.get(&parent)?;
        }
        segments.reverse();
        Some(Path::from_segments(segments))
    }

    /// The fully resolved (path and id) location of a node.
    pub fn location_for(&self, id: NodeId) -> Option<Location> {
        Some(Location::new(self.path_for(id)?, id))
    }

    fn child_by_segment(&self, parent: NodeId, segment: &Segment) -> Option<NodeId> {
        let parent = self.nodes.get(&parent)?;
        parent.children.iter().copied().find(|child_id| {
            self.nodes
                .get(child_id)
                .and_then(|child| child.segment.as_ref())
                .is_some_and(|child_segment| child_segment == segment)
        })
    }

    // -------------------------------------------------------------------
    // Structural mutation
    // -------------------------------------------------------------------

    /// Create a node under `parent`, appended as the last child unless
    /// `before` names an existing sibling. The SNS index is derived from
    /// the destination sibling set.
    pub fn create_child(
        &mut self,
        parent: NodeId,
        name: Name,
        id: NodeId,
        before: Option<NodeId>,
        properties: Vec<Property>,
    ) -> Result<NodeId, RequestError> {
        if self.nodes.contains_key(&id) {
            return Err(RequestError::IdCollision {
                id,
                workspace: self.name.clone(),
            });
        }
        let position = self.insert_position(parent, before)?;

        let mut property_map = BTreeMap::new();
        for property in properties {
            property_map.insert(property.name().clone(), property);
        }
        self.nodes.insert(
            id,
            StoredNode {
                id,
                parent: Some(parent),
                segment: Some(Segment::new(name.clone())),
                children: Vec::new(),
                properties: property_map,
            },
        );
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(position, id);
        }
        self.correct_sns_indexes(parent, &name);
        debug!(workspace = self.name, node = %id, name = %name, "created node");
        Ok(id)
    }

    /// Remove a node and its whole subtree, renumbering the remaining
    /// same-named siblings.
    ///
    /// Removing the root empties the workspace and re-creates the root node
    /// under its fixed id.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<(), RequestError> {
        if id == self.root {
            self.nodes.clear();
            self.nodes.insert(self.root, StoredNode::new_root(self.root));
            debug!(workspace = self.name, "removed root branch; workspace reset");
            return Ok(());
        }
        let (parent, name) = self.detach(id)?;
        self.correct_sns_indexes(parent, &name);
        let removed = self.remove_from_arena(id);
        debug!(workspace = self.name, node = %id, removed, "removed branch");
        Ok(())
    }

    /// Move a branch beneath `new_parent` within this workspace, keeping the
    /// node's id and properties.
    pub fn move_subtree(
        &mut self,
        id: NodeId,
        new_parent: NodeId,
        before: Option<NodeId>,
        new_name: Option<Name>,
    ) -> Result<(), RequestError> {
        if id == self.root {
            return Err(RequestError::InvalidPath(
                "the root node cannot be moved".into(),
            ));
        }
        if self.is_descendant_or_self(new_parent, id) {
            return Err(RequestError::InvalidPath(format!(
                "cannot move a node beneath its own descendant ({id})"
            )));
        }
        // Validate the destination before detaching, so a rejected move
        // leaves the tree untouched.
        let destination = self
            .nodes
            .get(&new_parent)
            .ok_or_else(|| RequestError::not_found(Location::from_id(new_parent)))?;
        if let Some(before_id) = before {
            if before_id == id || !destination.children.contains(&before_id) {
                return Err(RequestError::InvalidPath(format!(
                    "before-sibling {before_id} is not a child of {new_parent}"
                )));
            }
        }
        let (old_parent, old_name) = self.detach(id)?;
        self.correct_sns_indexes(old_parent, &old_name);

        let name = new_name.unwrap_or(old_name);
        let position = self.insert_position(new_parent, before)?;
        if let Some(node) = self.nodes.get_mut(&id) {
            node.parent = Some(new_parent);
            node.segment = Some(Segment::new(name.clone()));
        }
        if let Some(parent_node) = self.nodes.get_mut(&new_parent) {
            parent_node.children.insert(position, id);
        }
        self.correct_sns_indexes(new_parent, &name);
        debug!(workspace = self.name, node = %id, "moved branch");
        Ok(())
    }

    /// All ids in the branch rooted at `id`, parent before descendants.
    pub fn subtree_ids(&self, id: NodeId) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                ids.push(current);
                // Reverse keeps child order once popped.
                stack.extend(node.children.iter().rev().copied());
            }
        }
        ids
    }

    /// Clone the branch rooted at `id`, parent before descendants.
    pub(crate) fn clone_subtree(&self, id: NodeId) -> Vec<StoredNode> {
        self.subtree_ids(id)
            .into_iter()
            .filter_map(|node_id| self.nodes.get(&node_id).cloned())
            .collect()
    }

    /// Remove the branch rooted at `id` from the arena and return its nodes,
    /// parent before descendants. The branch must already be detached from
    /// its parent's child list.
    pub(crate) fn extract_subtree(&mut self, id: NodeId) -> Vec<StoredNode> {
        self.subtree_ids(id)
            .into_iter()
            .filter_map(|node_id| self.nodes.remove(&node_id))
            .collect()
    }

    /// Detach a node from its parent's child list without touching the
    /// arena; returns the old parent and the node's name.
    pub(crate) fn detach(&mut self, id: NodeId) -> Result<(NodeId, Name), RequestError> {
        let node = self
            .nodes
            .get(&id)
            .ok_or_else(|| RequestError::not_found(Location::from_id(id)))?;
        let parent = node.parent.ok_or_else(|| {
            RequestError::InvalidPath("the root node cannot be detached".into())
        })?;
        let name = node
            .segment
            .as_ref()
            .map(|segment| segment.name().clone())
            .ok_or_else(|| RequestError::InvalidPath("node has no name".into()))?;
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|child| *child != id);
        }
        Ok((parent, name))
    }

    /// Insert an already-built node into the arena and attach it under
    /// `parent`, recomputing SNS indexes.
    pub(crate) fn attach(
        &mut self,
        mut node: StoredNode,
        parent: NodeId,
        before: Option<NodeId>,
        name: Name,
    ) -> Result<(), RequestError> {
        let position = self.insert_position(parent, before)?;
        node.parent = Some(parent);
        node.segment = Some(Segment::new(name.clone()));
        let id = node.id;
        self.nodes.insert(id, node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.insert(position, id);
        }
        self.correct_sns_indexes(parent, &name);
        Ok(())
    }

    /// Insert a detached-subtree node without attaching (used when moving
    /// whole branches between workspaces; only the branch root is attached).
    pub(crate) fn adopt(&mut self, node: StoredNode) {
        self.nodes.insert(node.id, node);
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut StoredNode> {
        self.nodes.get_mut(&id)
    }

    /// Returns `true` if `id` equals `ancestor` or lies beneath it.
    pub fn is_descendant_or_self(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.nodes.get(&node_id).and_then(|node| node.parent);
        }
        false
    }

    /// Recompute the SNS indexes of every child of `parent` named `name`:
    /// a single instance gets the default index, several get 1..k in child
    /// order.
    pub(crate) fn correct_sns_indexes(&mut self, parent: NodeId, name: &Name) {
        let Some(parent_node) = self.nodes.get(&parent) else {
            return;
        };
        let same_named: Vec<NodeId> = parent_node
            .children
            .iter()
            .copied()
            .filter(|child_id| {
                self.nodes
                    .get(child_id)
                    .and_then(|child| child.segment.as_ref())
                    .is_some_and(|segment| segment.name() == name)
            })
            .collect();
        for (position, child_id) in same_named.iter().enumerate() {
            let index = (position + 1) as u32;
            if let Some(child) = self.nodes.get_mut(child_id) {
                let needs_update = child
                    .segment
                    .as_ref()
                    .is_some_and(|segment| segment.index() != index);
                if needs_update {
                    if let Ok(segment) = Segment::with_index(name.clone(), index) {
                        child.segment = Some(segment);
                    }
                }
            }
        }
    }

    fn insert_position(
        &self,
        parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<usize, RequestError> {
        let parent_node = self
            .nodes
            .get(&parent)
            .ok_or_else(|| RequestError::not_found(Location::from_id(parent)))?;
        match before {
            None => Ok(parent_node.children.len()),
            Some(before_id) => parent_node
                .children
                .iter()
                .position(|child| *child == before_id)
                .ok_or_else(|| {
                    RequestError::InvalidPath(format!(
                        "before-sibling {before_id} is not a child of {parent}"
                    ))
                }),
        }
    }

    fn remove_from_arena(&mut self, id: NodeId) -> usize {
        let ids = self.subtree_ids(id);
        let count = ids.len();
        for node_id in ids {
            self.nodes.remove(&node_id);
        }
        count
    }
}
