//! A set of named workspaces behind one repository-wide lock.
//!
//! The lock makes every structural mutation atomic, including moves and
//! copies that span two workspaces, and gives readers a consistent
//! snapshot. This satisfies the per-workspace serialization the engine
//! requires while sidestepping lock-ordering questions between workspaces.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use arbor_connector::ExecutionContext;
use arbor_requests::RequestError;
use arbor_types::{Name, NodeId, Property, PropertyValue};

use crate::node::StoredNode;
use crate::workspace::Workspace;

/// All workspaces of one in-memory source.
pub struct MemoryRepository {
    source_name: String,
    default_workspace: String,
    state: RwLock<RepoState>,
}

/// The lock-guarded workspace map. Obtained through
/// [`MemoryRepository::read`] / [`MemoryRepository::write`].
pub struct RepoState {
    workspaces: HashMap<String, Workspace>,
}

impl MemoryRepository {
    /// Create a repository holding one empty default workspace.
    pub fn new(source_name: impl Into<String>, default_workspace: impl Into<String>) -> Self {
        let source_name = source_name.into();
        let default_workspace = default_workspace.into();
        let mut workspaces = HashMap::new();
        workspaces.insert(
            default_workspace.clone(),
            Workspace::new(default_workspace.clone(), NodeId::random()),
        );
        Self {
            source_name,
            default_workspace,
            state: RwLock::new(RepoState { workspaces }),
        }
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn default_workspace(&self) -> &str {
        &self.default_workspace
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, RepoState>, RequestError> {
        self.state
            .read()
            .map_err(|_| RequestError::Storage("repository lock poisoned".into()))
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, RepoState>, RequestError> {
        self.state
            .write()
            .map_err(|_| RequestError::Storage("repository lock poisoned".into()))
    }

    /// Copy a branch, possibly across workspaces, under one write lock.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_subtree(
        &self,
        from_workspace: &str,
        source: NodeId,
        into_workspace: &str,
        dest_parent: NodeId,
        desired_name: Option<Name>,
        preserve_ids: bool,
        context: &ExecutionContext,
    ) -> Result<NodeId, RequestError> {
        self.write()?.copy_subtree(
            from_workspace,
            source,
            into_workspace,
            dest_parent,
            desired_name,
            preserve_ids,
            context,
        )
    }

    /// Move a branch into another workspace, retaining node identity,
    /// under one write lock.
    pub fn move_subtree_to_workspace(
        &self,
        from_workspace: &str,
        id: NodeId,
        into_workspace: &str,
        new_parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<(), RequestError> {
        self.write()?
            .move_subtree_across(from_workspace, id, into_workspace, new_parent, before)
    }
}

impl RepoState {
    pub fn workspace(&self, name: &str) -> Result<&Workspace, RequestError> {
        self.workspaces
            .get(name)
            .ok_or_else(|| RequestError::WorkspaceNotFound(name.to_string()))
    }

    pub fn workspace_mut(&mut self, name: &str) -> Result<&mut Workspace, RequestError> {
        self.workspaces
            .get_mut(name)
            .ok_or_else(|| RequestError::WorkspaceNotFound(name.to_string()))
    }

    pub fn workspace_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workspaces.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn create_workspace(
        &mut self,
        name: &str,
        root: NodeId,
    ) -> Result<&Workspace, RequestError> {
        if self.workspaces.contains_key(name) {
            return Err(RequestError::WorkspaceAlreadyExists(name.to_string()));
        }
        self.workspaces
            .insert(name.to_string(), Workspace::new(name, root));
        debug!(workspace = name, "created workspace");
        Ok(&self.workspaces[name])
    }

    pub fn destroy_workspace(&mut self, name: &str) -> Result<Workspace, RequestError> {
        self.workspaces
            .remove(name)
            .ok_or_else(|| RequestError::WorkspaceNotFound(name.to_string()))
    }

    /// Deep-copy the branch rooted at `source` beneath `dest_parent`.
    ///
    /// With `preserve_ids` the copies keep the source ids; a collision with
    /// any node already in the destination workspace is rejected before
    /// anything is written. Without it, every copied node receives a fresh
    /// id from the context, and reference values pointing inside the copied
    /// branch are rewritten to the corresponding new ids.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_subtree(
        &mut self,
        from_workspace: &str,
        source: NodeId,
        into_workspace: &str,
        dest_parent: NodeId,
        desired_name: Option<Name>,
        preserve_ids: bool,
        context: &ExecutionContext,
    ) -> Result<NodeId, RequestError> {
        let source_ws = self.workspace(from_workspace)?;
        let cloned = source_ws.clone_subtree(source);
        let Some(branch_root) = cloned.first() else {
            return Err(RequestError::not_found(source.into()));
        };
        let root_name = match (desired_name, branch_root.segment()) {
            (Some(name), _) => name,
            (None, Some(segment)) => segment.name().clone(),
            (None, None) => {
                return Err(RequestError::InvalidPath(
                    "copying a workspace root requires a name for the copy".into(),
                ))
            }
        };

        // Old id -> new id for every node in the branch.
        let mut id_map: HashMap<NodeId, NodeId> = HashMap::new();
        for node in &cloned {
            let new_id = if preserve_ids {
                node.id()
            } else {
                context.next_id()
            };
            id_map.insert(node.id(), new_id);
        }

        let dest = self.workspace_mut(into_workspace)?;
        if preserve_ids {
            for node in &cloned {
                if dest.contains(node.id()) {
                    return Err(RequestError::IdCollision {
                        id: node.id(),
                        workspace: into_workspace.to_string(),
                    });
                }
            }
        }

        let new_root = id_map[&source];
        for (position, node) in cloned.iter().enumerate() {
            let mut copy = node.clone();
            copy.id = id_map[&node.id()];
            copy.children = node.children().iter().map(|child| id_map[child]).collect();
            if !preserve_ids {
                rewrite_internal_references(&mut copy, &id_map);
            }
            if position == 0 {
                dest.attach(copy, dest_parent, None, root_name.clone())?;
            } else {
                copy.parent = node.parent().map(|parent| id_map[&parent]);
                dest.adopt(copy);
            }
        }
        debug!(
            from = from_workspace,
            into = into_workspace,
            nodes = cloned.len(),
            preserve_ids,
            "copied branch"
        );
        Ok(new_root)
    }

    /// Move a branch into another workspace, keeping every node's id and
    /// properties. A collision with an existing destination node is
    /// rejected before anything is written.
    pub fn move_subtree_across(
        &mut self,
        from_workspace: &str,
        id: NodeId,
        into_workspace: &str,
        new_parent: NodeId,
        before: Option<NodeId>,
    ) -> Result<(), RequestError> {
        if from_workspace == into_workspace {
            return self
                .workspace_mut(from_workspace)?
                .move_subtree(id, new_parent, before, None);
        }

        let source_ws = self.workspace(from_workspace)?;
        if id == source_ws.root_id() {
            return Err(RequestError::InvalidPath(
                "the root node cannot be moved".into(),
            ));
        }
        let moving = source_ws.subtree_ids(id);
        if moving.is_empty() {
            return Err(RequestError::not_found(id.into()));
        }

        let dest = self.workspace(into_workspace)?;
        let Some(dest_parent) = dest.node(new_parent) else {
            return Err(RequestError::not_found(new_parent.into()));
        };
        if let Some(before_id) = before {
            if !dest_parent.children().contains(&before_id) {
                return Err(RequestError::InvalidPath(format!(
                    "before-sibling {before_id} is not a child of {new_parent}"
                )));
            }
        }
        for moved in &moving {
            if dest.contains(*moved) {
                return Err(RequestError::IdCollision {
                    id: *moved,
                    workspace: into_workspace.to_string(),
                });
            }
        }

        let source_ws = self.workspace_mut(from_workspace)?;
        let (old_parent, name) = source_ws.detach(id)?;
        source_ws.correct_sns_indexes(old_parent, &name);
        let mut nodes = source_ws.extract_subtree(id);

        let dest = self.workspace_mut(into_workspace)?;
        let branch_root = nodes.remove(0);
        dest.attach(branch_root, new_parent, before, name)?;
        for node in nodes {
            dest.adopt(node);
        }
        debug!(
            from = from_workspace,
            into = into_workspace,
            node = %id,
            "moved branch across workspaces"
        );
        Ok(())
    }
}

/// Rewrite reference values that point inside the copied branch so the copy
/// is internally consistent; references to nodes outside the branch are
/// left alone.
fn rewrite_internal_references(node: &mut StoredNode, id_map: &HashMap<NodeId, NodeId>) {
    let rewritten: Vec<(Name, Property)> = node
        .properties
        .iter()
        .filter_map(|(name, property)| {
            let mut changed = false;
            let values: Vec<PropertyValue> = property
                .values()
                .iter()
                .map(|value| match value {
                    PropertyValue::Reference(target) => match id_map.get(target) {
                        Some(new_target) => {
                            changed = true;
                            PropertyValue::Reference(*new_target)
                        }
                        None => value.clone(),
                    },
                    other => other.clone(),
                })
                .collect();
            if changed {
                property
                    .with_values(values)
                    .ok()
                    .map(|property| (name.clone(), property))
            } else {
                None
            }
        })
        .collect();
    for (name, property) in rewritten {
        node.properties.insert(name, property);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_types::Path;

    fn name(s: &str) -> Name {
        Name::local(s).unwrap()
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new()
    }

    fn repo_with_two_workspaces() -> MemoryRepository {
        let repo = MemoryRepository::new("mem", "main");
        repo.write()
            .unwrap()
            .create_workspace("other", NodeId::random())
            .unwrap();
        repo
    }

    fn create(
        repo: &MemoryRepository,
        workspace: &str,
        parent: NodeId,
        n: &str,
        properties: Vec<Property>,
    ) -> NodeId {
        repo.write()
            .unwrap()
            .workspace_mut(workspace)
            .unwrap()
            .create_child(parent, name(n), NodeId::random(), None, properties)
            .unwrap()
    }

    fn root_of(repo: &MemoryRepository, workspace: &str) -> NodeId {
        repo.read().unwrap().workspace(workspace).unwrap().root_id()
    }

    fn resolve(repo: &MemoryRepository, workspace: &str, path: &str) -> Option<NodeId> {
        repo.read()
            .unwrap()
            .workspace(workspace)
            .unwrap()
            .resolve(&Path::parse(path).unwrap())
    }

    // -----------------------------------------------------------------------
    // Workspace management
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_workspace_names_are_rejected() {
        let repo = MemoryRepository::new("mem", "main");
        let error = repo
            .write()
            .unwrap()
            .create_workspace("main", NodeId::random())
            .unwrap_err();
        assert!(matches!(error, RequestError::WorkspaceAlreadyExists(_)));
    }

    #[test]
    fn destroying_an_unknown_workspace_fails() {
        let repo = MemoryRepository::new("mem", "main");
        assert!(matches!(
            repo.write().unwrap().destroy_workspace("nope"),
            Err(RequestError::WorkspaceNotFound(_))
        ));
    }

    #[test]
    fn workspace_names_are_sorted() {
        let repo = repo_with_two_workspaces();
        assert_eq!(
            repo.read().unwrap().workspace_names(),
            vec!["main".to_string(), "other".to_string()]
        );
    }

    // -----------------------------------------------------------------------
    // Copy within one workspace
    // -----------------------------------------------------------------------

    #[test]
    fn fresh_id_copy_maps_every_node() {
        let repo = MemoryRepository::new("mem", "main");
        let root = root_of(&repo, "main");
        let a = create(&repo, "main", root, "a", vec![]);
        create(&repo, "main", a, "x", vec![]);
        create(&repo, "main", a, "y", vec![]);
        let b = create(&repo, "main", root, "b", vec![]);

        let copy_root = repo
            .copy_subtree("main", a, "main", b, None, false, &context())
            .unwrap();

        assert_ne!(copy_root, a);
        assert_eq!(resolve(&repo, "main", "/b/a"), Some(copy_root));
        assert!(resolve(&repo, "main", "/b/a/x").is_some());
        assert!(resolve(&repo, "main", "/b/a/y").is_some());
        // The originals are untouched.
        assert_eq!(resolve(&repo, "main", "/a"), Some(a));
    }

    #[test]
    fn preserving_id_copy_in_the_same_workspace_collides() {
        let repo = MemoryRepository::new("mem", "main");
        let root = root_of(&repo, "main");
        let a = create(&repo, "main", root, "a", vec![]);
        let b = create(&repo, "main", root, "b", vec![]);

        let error = repo
            .copy_subtree("main", a, "main", b, None, true, &context())
            .unwrap_err();
        assert!(matches!(error, RequestError::IdCollision { .. }));
    }

    #[test]
    fn fresh_id_copy_rewrites_internal_references_only() {
        let repo = MemoryRepository::new("mem", "main");
        let root = root_of(&repo, "main");
        let outside = create(&repo, "main", root, "outside", vec![]);
        let a = create(&repo, "main", root, "a", vec![]);
        let inner = create(&repo, "main", a, "inner", vec![]);
        // a/pointer references both a node inside the branch and one outside.
        {
            let mut state = repo.write().unwrap();
            let ws = state.workspace_mut("main").unwrap();
            let property = Property::new(
                name("pointer"),
                vec![
                    PropertyValue::Reference(inner),
                    PropertyValue::Reference(outside),
                ],
            )
            .unwrap();
            ws.node_mut(a)
                .unwrap()
                .properties
                .insert(property.name().clone(), property);
        }
        let b = create(&repo, "main", root, "b", vec![]);

        let copy_root = repo
            .copy_subtree("main", a, "main", b, None, false, &context())
            .unwrap();
        let copied_inner = resolve(&repo, "main", "/b/a/inner").unwrap();
        assert_ne!(copied_inner, inner);

        let state = repo.read().unwrap();
        let copied = state.workspace("main").unwrap().node(copy_root).unwrap();
        let refs: Vec<NodeId> = copied
            .property(&name("pointer"))
            .unwrap()
            .referenced_nodes()
            .collect();
        // Internal target rewritten, external target untouched.
        assert_eq!(refs, vec![copied_inner, outside]);
    }

    // -----------------------------------------------------------------------
    // Copy across workspaces
    // -----------------------------------------------------------------------

    #[test]
    fn preserving_id_copy_across_workspaces_keeps_ids() {
        let repo = repo_with_two_workspaces();
        let main_root = root_of(&repo, "main");
        let a = create(&repo, "main", main_root, "a", vec![]);
        let x = create(&repo, "main", a, "x", vec![]);
        let other_root = root_of(&repo, "other");

        let copy_root = repo
            .copy_subtree("main", a, "other", other_root, None, true, &context())
            .unwrap();

        assert_eq!(copy_root, a);
        assert_eq!(resolve(&repo, "other", "/a"), Some(a));
        assert_eq!(resolve(&repo, "other", "/a/x"), Some(x));
        // Source still intact.
        assert_eq!(resolve(&repo, "main", "/a/x"), Some(x));
    }

    #[test]
    fn copy_carries_properties() {
        let repo = repo_with_two_workspaces();
        let main_root = root_of(&repo, "main");
        let a = create(
            &repo,
            "main",
            main_root,
            "a",
            vec![Property::single(name("title"), "kept")],
        );
        let other_root = root_of(&repo, "other");
        let copy_root = repo
            .copy_subtree("main", a, "other", other_root, None, false, &context())
            .unwrap();

        let state = repo.read().unwrap();
        let copied = state.workspace("other").unwrap().node(copy_root).unwrap();
        assert_eq!(
            copied.property(&name("title")),
            Some(&Property::single(name("title"), "kept"))
        );
    }

    // -----------------------------------------------------------------------
    // Move across workspaces
    // -----------------------------------------------------------------------

    #[test]
    fn cross_workspace_move_retains_identity() {
        let repo = repo_with_two_workspaces();
        let main_root = root_of(&repo, "main");
        let a = create(
            &repo,
            "main",
            main_root,
            "a",
            vec![Property::single(name("p"), 1i64)],
        );
        let x = create(&repo, "main", a, "x", vec![]);
        let other_root = root_of(&repo, "other");

        repo.move_subtree_to_workspace("main", a, "other", other_root, None)
            .unwrap();

        assert_eq!(resolve(&repo, "main", "/a"), None);
        assert_eq!(resolve(&repo, "other", "/a"), Some(a));
        assert_eq!(resolve(&repo, "other", "/a/x"), Some(x));
        let state = repo.read().unwrap();
        let moved = state.workspace("other").unwrap().node(a).unwrap();
        assert_eq!(
            moved.property(&name("p")),
            Some(&Property::single(name("p"), 1i64))
        );
    }

    #[test]
    fn cross_workspace_move_renumbers_the_source_siblings() {
        let repo = repo_with_two_workspaces();
        let main_root = root_of(&repo, "main");
        let first = create(&repo, "main", main_root, "a", vec![]);
        create(&repo, "main", main_root, "a", vec![]);
        let other_root = root_of(&repo, "other");

        repo.move_subtree_to_workspace("main", first, "other", other_root, None)
            .unwrap();

        // The surviving sibling dropped back to the default index.
        assert!(resolve(&repo, "main", "/a").is_some());
        assert!(resolve(&repo, "main", "/a[2]").is_none());
    }

    #[test]
    fn cross_workspace_move_rejects_id_collisions() {
        let repo = repo_with_two_workspaces();
        let main_root = root_of(&repo, "main");
        let a = create(&repo, "main", main_root, "a", vec![]);
        let other_root = root_of(&repo, "other");
        // Copy first (preserving ids), then try to move the same branch.
        repo.copy_subtree("main", a, "other", other_root, None, true, &context())
            .unwrap();
        let error = repo
            .move_subtree_to_workspace("main", a, "other", other_root, None)
            .unwrap_err();
        assert!(matches!(error, RequestError::IdCollision { .. }));
        // Nothing was moved.
        assert_eq!(resolve(&repo, "main", "/a"), Some(a));
    }
}
