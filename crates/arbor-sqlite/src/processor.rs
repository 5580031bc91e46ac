//! Executes requests against the sqlite schema.
//!
//! The same dispatch shape as the in-memory store: one `match`, handlers
//! returning `Result`, errors recorded on the request at a single point.
//! The caller (the connection) wraps each top-level request, composites
//! included, in one transaction and rolls back when the request records
//! an error.

use std::collections::{HashMap, VecDeque};

use rusqlite::Connection;

use arbor_connector::ExecutionContext;
use arbor_requests::{
    BranchNode, CopyBranchRequest, CreateNodeRequest, CreateWorkspaceRequest, DeleteBranchRequest,
    DestroyWorkspaceRequest, GetWorkspacesRequest, MoveBranchRequest, ReadAllChildrenRequest,
    ReadAllPropertiesRequest, ReadBlockOfChildrenRequest, ReadBranchRequest,
    ReadNextBlockOfChildrenRequest, ReadNodeRequest, ReadPropertyRequest, Request, RequestError,
    UpdatePropertiesRequest, VerifyWorkspaceRequest,
};
use arbor_types::{Location, Name, NodeId, Path, Property, PropertyValue};

use crate::repository::{self, ChildRow, WorkspaceRow};
use crate::subgraph::SubgraphQuery;

/// Execute one request (or composite) within the caller's transaction.
pub fn process(
    conn: &Connection,
    context: &ExecutionContext,
    request: &mut Request,
    default_workspace: &str,
) {
    if let Request::Composite(composite) = request {
        for sub_request in &mut composite.requests {
            process(conn, context, sub_request, default_workspace);
            // One failed sub-request fails the submission; the connection
            // rolls the transaction back, so stop executing.
            if sub_request.error().is_some() {
                break;
            }
        }
        return;
    }
    if let Err(error) = dispatch(conn, context, request, default_workspace) {
        request.set_error(error);
    }
}

fn dispatch(
    conn: &Connection,
    context: &ExecutionContext,
    request: &mut Request,
    default_workspace: &str,
) -> Result<(), RequestError> {
    match request {
        Request::ReadNode(r) => read_node(conn, r),
        Request::ReadAllProperties(r) => read_all_properties(conn, r),
        Request::ReadProperty(r) => read_property(conn, r),
        Request::ReadAllChildren(r) => read_all_children(conn, r),
        Request::ReadBlockOfChildren(r) => read_block_of_children(conn, r),
        Request::ReadNextBlockOfChildren(r) => read_next_block_of_children(conn, r),
        Request::ReadBranch(r) => read_branch(conn, r),
        Request::CreateNode(r) => create_node(conn, context, r),
        Request::UpdateProperties(r) => update_properties(conn, r),
        Request::MoveBranch(r) => move_branch(conn, r),
        Request::CopyBranch(r) => copy_branch(conn, context, r),
        Request::DeleteBranch(r) => delete_branch(conn, r),
        Request::GetWorkspaces(r) => get_workspaces(conn, r),
        Request::VerifyWorkspace(r) => verify_workspace(conn, r, default_workspace),
        Request::CreateWorkspace(r) => create_workspace(conn, context, r),
        Request::DestroyWorkspace(r) => destroy_workspace(conn, r),
        Request::Composite(_) => unreachable!("composites are unpacked by process()"),
    }
}

fn workspace(conn: &Connection, name: &str) -> Result<WorkspaceRow, RequestError> {
    repository::workspace_by_name(conn, name)?
        .ok_or_else(|| RequestError::WorkspaceNotFound(name.to_string()))
}

fn resolve(
    conn: &Connection,
    workspace: &WorkspaceRow,
    location: &Location,
) -> Result<NodeId, RequestError> {
    if let Some(id) = location.id() {
        if repository::node_exists(conn, workspace, id)? {
            return Ok(id);
        }
        return Err(RequestError::not_found(location.clone()));
    }
    if let Some(path) = location.path() {
        return match repository::resolve_path(conn, workspace, path)? {
            Some(id) => Ok(id),
            None => Err(RequestError::NotFound {
                location: location.clone(),
                lowest_existing: Some(repository::lowest_existing(conn, workspace, path)?),
            }),
        };
    }
    Err(RequestError::Validation(
        "a location must carry a path or an id to be resolved".into(),
    ))
}

fn location_of(
    conn: &Connection,
    workspace: &WorkspaceRow,
    id: NodeId,
) -> Result<Location, RequestError> {
    let path = repository::path_for(conn, workspace, id)?
        .ok_or_else(|| RequestError::Storage(format!("node {id} has no path")))?;
    Ok(Location::new(path, id))
}

fn child_locations(
    conn: &Connection,
    workspace: &WorkspaceRow,
    parent: NodeId,
    parent_path: &Path,
) -> Result<Vec<Location>, RequestError> {
    Ok(repository::children_of(conn, workspace.id, parent)?
        .into_iter()
        .map(|row| Location::new(parent_path.join(row.segment), row.child_id))
        .collect())
}

// ---------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------

fn read_node(conn: &Connection, r: &mut ReadNodeRequest) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let id = resolve(conn, &ws, &r.at)?;
    let actual = location_of(conn, &ws, id)?;
    for property in repository::read_properties(conn, ws.id, id)? {
        r.properties.push(property);
    }
    let parent_path = actual.path().cloned().unwrap_or_else(Path::root);
    for location in child_locations(conn, &ws, id, &parent_path)? {
        r.children.push(location);
    }
    r.actual = Some(actual);
    Ok(())
}

fn read_all_properties(
    conn: &Connection,
    r: &mut ReadAllPropertiesRequest,
) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let id = resolve(conn, &ws, &r.of)?;
    for property in repository::read_properties(conn, ws.id, id)? {
        r.properties.push(property);
    }
    r.actual = Some(location_of(conn, &ws, id)?);
    Ok(())
}

fn read_property(conn: &Connection, r: &mut ReadPropertyRequest) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let id = resolve(conn, &ws, &r.of)?;
    r.property = repository::read_properties(conn, ws.id, id)?
        .into_iter()
        .find(|property| property.name() == &r.name);
    r.actual = Some(location_of(conn, &ws, id)?);
    Ok(())
}

fn read_all_children(
    conn: &Connection,
    r: &mut ReadAllChildrenRequest,
) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let id = resolve(conn, &ws, &r.of)?;
    let actual = location_of(conn, &ws, id)?;
    let parent_path = actual.path().cloned().unwrap_or_else(Path::root);
    for location in child_locations(conn, &ws, id, &parent_path)? {
        r.children.push(location);
    }
    r.actual = Some(actual);
    Ok(())
}

fn read_block_of_children(
    conn: &Connection,
    r: &mut ReadBlockOfChildrenRequest,
) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let id = resolve(conn, &ws, &r.of)?;
    let actual = location_of(conn, &ws, id)?;
    let parent_path = actual.path().cloned().unwrap_or_else(Path::root);
    for location in child_locations(conn, &ws, id, &parent_path)?
        .into_iter()
        .skip(r.start_index)
        .take(r.count)
    {
        r.children.push(location);
    }
    r.actual = Some(actual);
    Ok(())
}

fn read_next_block_of_children(
    conn: &Connection,
    r: &mut ReadNextBlockOfChildrenRequest,
) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let after = resolve(conn, &ws, &r.after)?;
    let actual = location_of(conn, &ws, after)?;
    if let Some(row) = repository::child_row(conn, ws.id, after)? {
        let parent_path = actual
            .path()
            .and_then(Path::parent)
            .unwrap_or_else(Path::root);
        for location in child_locations(conn, &ws, row.parent_id, &parent_path)?
            .into_iter()
            .skip(row.index_in_parent as usize)
            .take(r.count)
        {
            r.children.push(location);
        }
    }
    r.actual = Some(actual);
    Ok(())
}

fn read_branch(conn: &Connection, r: &mut ReadBranchRequest) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let root = resolve(conn, &ws, &r.at)?;
    let root_location = location_of(conn, &ws, root)?;
    let root_path = root_location.path().cloned().unwrap_or_else(Path::root);

    let mut queue = VecDeque::new();
    queue.push_back((root, root_path, 0usize));
    while let Some((id, path, depth)) = queue.pop_front() {
        let children = child_locations(conn, &ws, id, &path)?;
        if depth < r.max_depth {
            for child in &children {
                if let (Some(child_path), Some(child_id)) = (child.path(), child.id()) {
                    queue.push_back((child_id, child_path.clone(), depth + 1));
                }
            }
        }
        r.nodes.push(BranchNode {
            location: Location::new(path, id),
            properties: repository::read_properties(conn, ws.id, id)?,
            children,
        });
    }
    r.actual = Some(root_location);
    Ok(())
}

// ---------------------------------------------------------------------
// Writes
// ---------------------------------------------------------------------

fn create_node(
    conn: &Connection,
    context: &ExecutionContext,
    r: &mut CreateNodeRequest,
) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let parent = resolve(conn, &ws, &r.under)?;
    let id = context.next_id();
    repository::create_node(conn, ws.id, parent, &r.name, id, &r.properties)?;
    r.actual = Some(location_of(conn, &ws, id)?);
    Ok(())
}

fn update_properties(
    conn: &Connection,
    r: &mut UpdatePropertiesRequest,
) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let id = resolve(conn, &ws, &r.on)?;
    let mut current: HashMap<Name, Property> = repository::read_properties(conn, ws.id, id)?
        .into_iter()
        .map(|property| (property.name().clone(), property))
        .collect();
    for (name, update) in &r.updates {
        match update {
            Some(property) => {
                current.insert(name.clone(), property.clone());
            }
            None => {
                current.remove(name);
            }
        }
    }
    let mut merged: Vec<Property> = current.into_values().collect();
    merged.sort_by(|a, b| a.name().cmp(b.name()));
    repository::write_properties(conn, ws.id, id, &merged)?;
    r.actual = Some(location_of(conn, &ws, id)?);
    Ok(())
}

fn move_branch(conn: &Connection, r: &mut MoveBranchRequest) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let id = resolve(conn, &ws, &r.from)?;
    let Some(row) = repository::child_row(conn, ws.id, id)? else {
        return Err(RequestError::InvalidPath(
            "the root node cannot be moved".into(),
        ));
    };
    let into = resolve(conn, &ws, &r.into)?;
    if is_descendant_or_self(conn, &ws, into, id)? {
        return Err(RequestError::InvalidPath(format!(
            "cannot move a node beneath its own descendant ({id})"
        )));
    }
    let before_row = match &r.before {
        Some(location) => {
            let before_id = resolve(conn, &ws, location)?;
            let row = repository::child_row(conn, ws.id, before_id)?.ok_or_else(|| {
                RequestError::InvalidPath("the root node cannot be a before-sibling".into())
            })?;
            if row.parent_id != into {
                return Err(RequestError::InvalidPath(format!(
                    "before-sibling {before_id} is not a child of {into}"
                )));
            }
            Some(row)
        }
        None => None,
    };
    r.actual_old = Some(location_of(conn, &ws, id)?);
    repository::move_child_row(
        conn,
        ws.id,
        &row,
        into,
        before_row.as_ref(),
        r.desired_name.as_ref(),
    )?;
    r.actual_new = Some(location_of(conn, &ws, id)?);
    Ok(())
}

fn copy_branch(
    conn: &Connection,
    context: &ExecutionContext,
    r: &mut CopyBranchRequest,
) -> Result<(), RequestError> {
    let from_ws = workspace(conn, &r.from_workspace)?;
    let into_ws = workspace(conn, &r.into_workspace)?;
    let source = resolve(conn, &from_ws, &r.from)?;
    let dest_parent = resolve(conn, &into_ws, &r.into)?;
    r.actual_old = Some(location_of(conn, &from_ws, source)?);

    let root_name = match (&r.desired_name, repository::child_row(conn, from_ws.id, source)?) {
        (Some(name), _) => name.clone(),
        (None, Some(row)) => row.segment.name().clone(),
        (None, None) => {
            return Err(RequestError::InvalidPath(
                "copying a workspace root requires a name for the copy".into(),
            ))
        }
    };

    let ids = repository::subtree_ids(conn, from_ws.id, source)?;
    let mut id_map: HashMap<NodeId, NodeId> = HashMap::new();
    for id in &ids {
        let new_id = if r.preserve_ids {
            *id
        } else {
            context.next_id()
        };
        id_map.insert(*id, new_id);
    }
    if r.preserve_ids {
        for id in &ids {
            if repository::node_exists(conn, &into_ws, *id)? {
                return Err(RequestError::IdCollision {
                    id: *id,
                    workspace: r.into_workspace.clone(),
                });
            }
        }
    }

    // The branch root is created like any new child (fresh SNS and child
    // index in the destination); descendants keep their sibling structure.
    let new_root = id_map[&source];
    repository::create_node(conn, into_ws.id, dest_parent, &root_name, new_root, &[])?;
    for id in &ids {
        if id != &source {
            let row = repository::child_row(conn, from_ws.id, *id)?.ok_or_else(|| {
                RequestError::Storage(format!("subtree node {id} lost its child row"))
            })?;
            insert_copied_row(conn, into_ws.id, &row, &id_map)?;
        }
        let mut properties = repository::read_properties(conn, from_ws.id, *id)?;
        if !r.preserve_ids {
            properties = rewrite_references(properties, &id_map);
        }
        repository::write_properties(conn, into_ws.id, id_map[id], &properties)?;
    }
    r.actual_new = Some(location_of(conn, &into_ws, new_root)?);
    Ok(())
}

fn insert_copied_row(
    conn: &Connection,
    workspace_id: i64,
    row: &ChildRow,
    id_map: &HashMap<NodeId, NodeId>,
) -> Result<(), RequestError> {
    conn.execute(
        "INSERT INTO children
         (workspace_id, parent_id, child_id, name_ns, name_local, sns_index, index_in_parent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            workspace_id,
            id_map[&row.parent_id].to_string(),
            id_map[&row.child_id].to_string(),
            row.segment.name().namespace(),
            row.segment.name().local_part(),
            row.segment.index() as i64,
            row.index_in_parent,
        ],
    )
    .map_err(|e| RequestError::Storage(e.to_string()))?;
    Ok(())
}

fn rewrite_references(
    properties: Vec<Property>,
    id_map: &HashMap<NodeId, NodeId>,
) -> Vec<Property> {
    properties
        .into_iter()
        .map(|property| {
            let values: Vec<PropertyValue> = property
                .values()
                .iter()
                .map(|value| match value {
                    PropertyValue::Reference(target) => match id_map.get(target) {
                        Some(new_target) => PropertyValue::Reference(*new_target),
                        None => value.clone(),
                    },
                    other => other.clone(),
                })
                .collect();
            property.with_values(values).unwrap_or(property)
        })
        .collect()
}

fn is_descendant_or_self(
    conn: &Connection,
    workspace: &WorkspaceRow,
    id: NodeId,
    ancestor: NodeId,
) -> Result<bool, RequestError> {
    let mut current = id;
    loop {
        if current == ancestor {
            return Ok(true);
        }
        match repository::child_row(conn, workspace.id, current)? {
            Some(row) => current = row.parent_id,
            None => return Ok(false),
        }
    }
}

fn delete_branch(conn: &Connection, r: &mut DeleteBranchRequest) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.workspace)?;
    let id = resolve(conn, &ws, &r.at)?;
    let actual = location_of(conn, &ws, id)?;
    let path = actual.path().cloned().unwrap_or_else(Path::root);
    let query = SubgraphQuery::create(conn, &ws, id, path, usize::MAX)?;
    query.delete_subgraph(true)?;
    r.actual = Some(actual);
    Ok(())
}

// ---------------------------------------------------------------------
// Workspaces
// ---------------------------------------------------------------------

fn get_workspaces(conn: &Connection, r: &mut GetWorkspacesRequest) -> Result<(), RequestError> {
    r.names = Some(repository::workspace_names(conn)?);
    Ok(())
}

fn verify_workspace(
    conn: &Connection,
    r: &mut VerifyWorkspaceRequest,
    default_workspace: &str,
) -> Result<(), RequestError> {
    let name = r
        .name
        .clone()
        .unwrap_or_else(|| default_workspace.to_string());
    let ws = workspace(conn, &name)?;
    r.actual_root = Some(Location::new(Path::root(), ws.root));
    r.actual_name = Some(name);
    Ok(())
}

fn create_workspace(
    conn: &Connection,
    context: &ExecutionContext,
    r: &mut CreateWorkspaceRequest,
) -> Result<(), RequestError> {
    if repository::workspace_by_name(conn, &r.desired_name)?.is_some() {
        return Err(RequestError::WorkspaceAlreadyExists(r.desired_name.clone()));
    }
    let ws = repository::create_workspace(conn, &r.desired_name, context.next_id())?;
    r.actual_root = Some(Location::new(Path::root(), ws.root));
    r.actual_name = Some(ws.name);
    Ok(())
}

fn destroy_workspace(conn: &Connection, r: &mut DestroyWorkspaceRequest) -> Result<(), RequestError> {
    let ws = workspace(conn, &r.name)?;
    repository::destroy_workspace(conn, &ws)?;
    r.actual_root = Some(Location::new(Path::root(), ws.root));
    Ok(())
}
