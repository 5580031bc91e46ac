//! Executes requests against a [`MemoryRepository`].
//!
//! One `match` covers the whole request vocabulary; a composite is unpacked
//! in list order. Handlers return `Result`, and the single dispatch point
//! records any error on the request, so every executed request ends up
//! with exactly one of an outcome or an error.

use arbor_connector::ExecutionContext;
use arbor_requests::{
    BranchNode, CopyBranchRequest, CreateNodeRequest, CreateWorkspaceRequest, DeleteBranchRequest,
    DestroyWorkspaceRequest, GetWorkspacesRequest, MoveBranchRequest, ReadAllChildrenRequest,
    ReadAllPropertiesRequest, ReadBlockOfChildrenRequest, ReadBranchRequest,
    ReadNextBlockOfChildrenRequest, ReadNodeRequest, ReadPropertyRequest, Request, RequestError,
    UpdatePropertiesRequest, VerifyWorkspaceRequest,
};
use arbor_types::{Location, NodeId, Path};

use crate::repository::MemoryRepository;
use crate::workspace::Workspace;

/// Execute one request (or composite) against the repository.
pub fn process(repository: &MemoryRepository, context: &ExecutionContext, request: &mut Request) {
    if let Request::Composite(composite) = request {
        for sub_request in &mut composite.requests {
            process(repository, context, sub_request);
        }
        return;
    }
    if let Err(error) = dispatch(repository, context, request) {
        request.set_error(error);
    }
}

fn dispatch(
    repository: &MemoryRepository,
    context: &ExecutionContext,
    request: &mut Request,
) -> Result<(), RequestError> {
    match request {
        Request::ReadNode(r) => read_node(repository, r),
        Request::ReadAllProperties(r) => read_all_properties(repository, r),
        Request::ReadProperty(r) => read_property(repository, r),
        Request::ReadAllChildren(r) => read_all_children(repository, r),
        Request::ReadBlockOfChildren(r) => read_block_of_children(repository, r),
        Request::ReadNextBlockOfChildren(r) => read_next_block_of_children(repository, r),
        Request::ReadBranch(r) => read_branch(repository, r),
        Request::CreateNode(r) => create_node(repository, context, r),
        Request::UpdateProperties(r) => update_properties(repository, r),
        Request::MoveBranch(r) => move_branch(repository, r),
        Request::CopyBranch(r) => copy_branch(repository, context, r),
        Request::DeleteBranch(r) => delete_branch(repository, r),
        Request::GetWorkspaces(r) => get_workspaces(repository, r),
        Request::VerifyWorkspace(r) => verify_workspace(repository, r),
        Request::CreateWorkspace(r) => create_workspace(repository, context, r),
        Request::DestroyWorkspace(r) => destroy_workspace(repository, r),
        Request::Composite(_) => unreachable!("composites are unpacked by process()"),
    }
}

/// Resolve a location to a node id within one workspace.
fn resolve(workspace: &Workspace, location: &Location) -> Result<NodeId, RequestError> {
    if let Some(id) = location.id() {
        if workspace.contains(id) {
            return Ok(id);
        }
        return Err(RequestError::not_found(location.clone()));
    }
    if let Some(path) = location.path() {
        return workspace.resolve(path).ok_or_else(|| RequestError::NotFound {
            location: location.clone(),
            lowest_existing: Some(workspace.lowest_existing(path)),
        });
    }
    Err(RequestError::Validation(
        "a location must carry a path or an id to be resolved".into(),
    ))
}

fn read_node(repository: &MemoryRepository, r: &mut ReadNodeRequest) -> Result<(), RequestError> {
    let state = repository.read()?;
    let workspace = state.workspace(&r.workspace)?;
    let id = resolve(workspace, &r.at)?;
    let node = workspace
        .node(id)
        .ok_or_else(|| RequestError::not_found(r.at.clone()))?;
    for property in node.properties().values() {
        r.properties.push(property.clone());
    }
    for child in node.children() {
        if let Some(location) = workspace.location_for(*child) {
            r.children.push(location);
        }
    }
    r.actual = workspace.location_for(id);
    Ok(())
}

fn read_all_properties(
    repository: &MemoryRepository,
    r: &mut ReadAllPropertiesRequest,
) -> Result<(), RequestError> {
    let state = repository.read()?;
    let workspace = state.workspace(&r.workspace)?;
    let id = resolve(workspace, &r.of)?;
    let node = workspace
        .node(id)
        .ok_or_else(|| RequestError::not_found(r.of.clone()))?;
    for property in node.properties().values() {
        r.properties.push(property.clone());
    }
    r.actual = workspace.location_for(id);
    Ok(())
}

fn read_property(
    repository: &MemoryRepository,
    r: &mut ReadPropertyRequest,
) -> Result<(), RequestError> {
    let state = repository.read()?;
    let workspace = state.workspace(&r.workspace)?;
    let id = resolve(workspace, &r.of)?;
    let node = workspace
        .node(id)
        .ok_or_else(|| RequestError::not_found(r.of.clone()))?;
    // An absent property is an empty, non-error result.
    r.property = node.property(&r.name).cloned();
    r.actual = workspace.location_for(id);
    Ok(())
}

fn read_all_children(
    repository: &MemoryRepository,
    r: &mut ReadAllChildrenRequest,
) -> Result<(), RequestError> {
    let state = repository.read()?;
    let workspace = state.workspace(&r.workspace)?;
    let id = resolve(workspace, &r.of)?;
    let node = workspace
        .node(id)
        .ok_or_else(|| RequestError::not_found(r.of.clone()))?;
    for child in node.children() {
        if let Some(location) = workspace.location_for(*child) {
            r.children.push(location);
        }
    }
    r.actual = workspace.location_for(id);
    Ok(())
}

fn read_block_of_children(
    repository: &MemoryRepository,
    r: &mut ReadBlockOfChildrenRequest,
) -> Result<(), RequestError> {
    let state = repository.read()?;
    let workspace = state.workspace(&r.workspace)?;
    let id = resolve(workspace, &r.of)?;
    let node = workspace
        .node(id)
        .ok_or_else(|| RequestError::not_found(r.of.clone()))?;
    for child in node.children().iter().skip(r.start_index).take(r.count) {
        if let Some(location) = workspace.location_for(*child) {
            r.children.push(location);
        }
    }
    r.actual = workspace.location_for(id);
    Ok(())
}

fn read_next_block_of_children(
    repository: &MemoryRepository,
    r: &mut ReadNextBlockOfChildrenRequest,
) -> Result<(), RequestError> {
    let state = repository.read()?;
    let workspace = state.workspace(&r.workspace)?;
    let after = resolve(workspace, &r.after)?;
    let after_node = workspace
        .node(after)
        .ok_or_else(|| RequestError::not_found(r.after.clone()))?;
    if let Some(parent) = after_node.parent() {
        let siblings = workspace
            .node(parent)
            .map(|node| node.children().to_vec())
            .unwrap_or_default();
        let position = siblings.iter().position(|sibling| *sibling == after);
        if let Some(position) = position {
            for sibling in siblings.iter().skip(position + 1).take(r.count) {
                if let Some(location) = workspace.location_for(*sibling) {
                    r.children.push(location);
                }
            }
        }
    }
    r.actual = workspace.location_for(after);
    Ok(())
}

fn read_branch(
    repository: &MemoryRepository,
    r: &mut ReadBranchRequest,
) -> Result<(), RequestError> {
    let state = repository.read()?;
    let workspace = state.workspace(&r.workspace)?;
    let root = resolve(workspace, &r.at)?;

    // Level order: parents before descendants, siblings in child order.
    let mut queue = std::collections::VecDeque::new();
    queue.push_back((root, 0usize));
    while let Some((id, depth)) = queue.pop_front() {
        let Some(node) = workspace.node(id) else {
            continue;
        };
        let Some(location) = workspace.location_for(id) else {
            continue;
        };
        let mut children = Vec::new();
        for child in node.children() {
            if let Some(child_location) = workspace.location_for(*child) {
                children.push(child_location);
            }
            if depth < r.max_depth {
                queue.push_back((*child, depth + 1));
            }
        }
        r.nodes.push(BranchNode {
            location,
            properties: node.properties().values().cloned().collect(),
            children,
        });
    }
    r.actual = workspace.location_for(root);
    Ok(())
}

fn create_node(
    repository: &MemoryRepository,
    context: &ExecutionContext,
    r: &mut CreateNodeRequest,
) -> Result<(), RequestError> {
    let mut state = repository.write()?;
    let workspace = state.workspace_mut(&r.workspace)?;
    let parent = resolve(workspace, &r.under)?;
    let id = context.next_id();
    workspace.create_child(parent, r.name.clone(), id, None, r.properties.clone())?;
    r.actual = workspace.location_for(id);
    Ok(())
}

fn update_properties(
    repository: &MemoryRepository,
    r: &mut UpdatePropertiesRequest,
) -> Result<(), RequestError> {
    let mut state = repository.write()?;
    let workspace = state.workspace_mut(&r.workspace)?;
    let id = resolve(workspace, &r.on)?;
    {
        let node = workspace
            .node_mut(id)
            .ok_or_else(|| RequestError::not_found(r.on.clone()))?;
        for (name, update) in &r.updates {
            match update {
                Some(property) => {
                    node.properties.insert(name.clone(), property.clone());
                }
                None => {
                    // Removing an absent property is a no-op.
                    node.properties.remove(name);
                }
            }
        }
    }
    r.actual = workspace.location_for(id);
    Ok(())
}

fn move_branch(
    repository: &MemoryRepository,
    r: &mut MoveBranchRequest,
) -> Result<(), RequestError> {
    let mut state = repository.write()?;
    let workspace = state.workspace_mut(&r.workspace)?;
    let id = resolve(workspace, &r.from)?;
    let into = resolve(workspace, &r.into)?;
    let before = match &r.before {
        Some(location) => Some(resolve(workspace, location)?),
        None => None,
    };
    r.actual_old = workspace.location_for(id);
    workspace.move_subtree(id, into, before, r.desired_name.clone())?;
    r.actual_new = workspace.location_for(id);
    Ok(())
}

fn copy_branch(
    repository: &MemoryRepository,
    context: &ExecutionContext,
    r: &mut CopyBranchRequest,
) -> Result<(), RequestError> {
    let mut state = repository.write()?;
    let source = resolve(state.workspace(&r.from_workspace)?, &r.from)?;
    let dest_parent = resolve(state.workspace(&r.into_workspace)?, &r.into)?;
    r.actual_old = state.workspace(&r.from_workspace)?.location_for(source);
    let copy_root = state.copy_subtree(
        &r.from_workspace,
        source,
        &r.into_workspace,
        dest_parent,
        r.desired_name.clone(),
        r.preserve_ids,
        context,
    )?;
    r.actual_new = state.workspace(&r.into_workspace)?.location_for(copy_root);
    Ok(())
}

fn delete_branch(
    repository: &MemoryRepository,
    r: &mut DeleteBranchRequest,
) -> Result<(), RequestError> {
    let mut state = repository.write()?;
    let workspace = state.workspace_mut(&r.workspace)?;
    let id = resolve(workspace, &r.at)?;
    let location = workspace.location_for(id);
    workspace.remove_subtree(id)?;
    r.actual = location;
    Ok(())
}

fn get_workspaces(
    repository: &MemoryRepository,
    r: &mut GetWorkspacesRequest,
) -> Result<(), RequestError> {
    let state = repository.read()?;
    r.names = Some(state.workspace_names());
    Ok(())
}

fn verify_workspace(
    repository: &MemoryRepository,
    r: &mut VerifyWorkspaceRequest,
) -> Result<(), RequestError> {
    let state = repository.read()?;
    let name = r
        .name
        .clone()
        .unwrap_or_else(|| repository.default_workspace().to_string());
    let workspace = state.workspace(&name)?;
    r.actual_root = Some(Location::new(Path::root(), workspace.root_id()));
    r.actual_name = Some(name);
    Ok(())
}

fn create_workspace(
    repository: &MemoryRepository,
    context: &ExecutionContext,
    r: &mut CreateWorkspaceRequest,
) -> Result<(), RequestError> {
    let mut state = repository.write()?;
    let workspace = state.create_workspace(&r.desired_name, context.next_id())?;
    r.actual_root = Some(Location::new(Path::root(), workspace.root_id()));
    r.actual_name = Some(r.desired_name.clone());
    Ok(())
}

fn destroy_workspace(
    repository: &MemoryRepository,
    r: &mut DestroyWorkspaceRequest,
) -> Result<(), RequestError> {
    let mut state = repository.write()?;
    let destroyed = state.destroy_workspace(&r.name)?;
    r.actual_root = Some(Location::new(Path::root(), destroyed.root_id()));
    Ok(())
}
