//! Row-level operations shared by the processor and [`SubgraphQuery`].
//!
//! All functions take a plain `&Connection`; a `rusqlite::Transaction`
//! derefs to one, so the processor can run every mutating request inside a
//! transaction without this module knowing.
//!
//! [`SubgraphQuery`]: crate::subgraph::SubgraphQuery

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use arbor_types::{Name, NodeId, Path, Property, Segment};

use crate::error::{StoreError, StoreResult};
use crate::payload;

/// One row of the `workspaces` table.
#[derive(Clone, Debug)]
pub struct WorkspaceRow {
    pub id: i64,
    pub name: String,
    pub root: NodeId,
}

/// One row of the `children` table.
#[derive(Clone, Debug)]
pub struct ChildRow {
    pub child_id: NodeId,
    pub parent_id: NodeId,
    pub segment: Segment,
    pub index_in_parent: i64,
}

fn parse_id(text: &str, context: NodeId) -> StoreResult<NodeId> {
    NodeId::parse(text).map_err(|e| StoreError::Corrupt {
        node: context,
        reason: format!("bad node id {text:?}: {e}"),
    })
}

fn parse_segment(ns: &str, local: &str, sns: i64, node: NodeId) -> StoreResult<Segment> {
    let name = Name::new(ns, local).map_err(|e| StoreError::Corrupt {
        node,
        reason: e.to_string(),
    })?;
    Segment::with_index(name, sns as u32).map_err(|e| StoreError::Corrupt {
        node,
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------
// Workspaces
// ---------------------------------------------------------------------

pub fn workspace_by_name(conn: &Connection, name: &str) -> StoreResult<Option<WorkspaceRow>> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, root_id FROM workspaces WHERE name = ?1",
            params![name],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((id, root_text)) => {
            let root = NodeId::parse(&root_text).map_err(|e| {
                StoreError::Serialization(format!("bad root id for workspace {name:?}: {e}"))
            })?;
            Ok(Some(WorkspaceRow {
                id,
                name: name.to_string(),
                root,
            }))
        }
    }
}

pub fn workspace_names(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut statement = conn.prepare("SELECT name FROM workspaces ORDER BY name")?;
    let names = statement
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

pub fn create_workspace(conn: &Connection, name: &str, root: NodeId) -> StoreResult<WorkspaceRow> {
    conn.execute(
        "INSERT INTO workspaces (name, root_id) VALUES (?1, ?2)",
        params![name, root.to_string()],
    )?;
    let id = conn.last_insert_rowid();
    debug!(workspace = name, "created workspace");
    Ok(WorkspaceRow {
        id,
        name: name.to_string(),
        root,
    })
}

/// Remove a workspace and every row that belongs to it, dropping
/// large-value rows that no surviving workspace references.
pub fn destroy_workspace(conn: &Connection, workspace: &WorkspaceRow) -> StoreResult<()> {
    let hashes: Vec<Vec<u8>> = {
        let mut statement = conn.prepare(
            "SELECT DISTINCT hash FROM property_large_values WHERE workspace_id = ?1",
        )?;
        let rows = statement
            .query_map(params![workspace.id], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    conn.execute(
        "DELETE FROM property_large_values WHERE workspace_id = ?1",
        params![workspace.id],
    )?;
    for hash in hashes {
        delete_large_value_if_orphan(conn, &hash)?;
    }
    conn.execute(
        "DELETE FROM properties WHERE workspace_id = ?1",
        params![workspace.id],
    )?;
    conn.execute(
        "DELETE FROM children WHERE workspace_id = ?1",
        params![workspace.id],
    )?;
    conn.execute(
        "DELETE FROM node_references WHERE workspace_id = ?1",
        params![workspace.id],
    )?;
    conn.execute(
        "DELETE FROM workspaces WHERE id = ?1",
        params![workspace.id],
    )?;
    debug!(workspace = workspace.name, "destroyed workspace");
    Ok(())
}

// ---------------------------------------------------------------------
// Node lookup
// ---------------------------------------------------------------------

pub fn child_row(
    conn: &Connection,
    workspace_id: i64,
    id: NodeId,
) -> StoreResult<Option<ChildRow>> {
    let row: Option<(String, String, String, i64, i64)> = conn
        .query_row(
            "SELECT parent_id, name_ns, name_local, sns_index, index_in_parent
             FROM children WHERE workspace_id = ?1 AND child_id = ?2",
            params![workspace_id, id.to_string()],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            },
        )
        .optional()?;
    match row {
        None => Ok(None),
        Some((parent, ns, local, sns, index_in_parent)) => Ok(Some(ChildRow {
            child_id: id,
            parent_id: parse_id(&parent, id)?,
            segment: parse_segment(&ns, &local, sns, id)?,
            index_in_parent,
        })),
    }
}

/// Children of a parent in dense `index_in_parent` order.
pub fn children_of(
    conn: &Connection,
    workspace_id: i64,
    parent: NodeId,
) -> StoreResult<Vec<ChildRow>> {
    let mut statement = conn.prepare(
        "SELECT child_id, name_ns, name_local, sns_index, index_in_parent
         FROM children WHERE workspace_id = ?1 AND parent_id = ?2
         ORDER BY index_in_parent",
    )?;
    let rows = statement
        .query_map(params![workspace_id, parent.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id_text, ns, local, sns, index_in_parent)| {
            let child_id = parse_id(&id_text, parent)?;
            Ok(ChildRow {
                child_id,
                parent_id: parent,
                segment: parse_segment(&ns, &local, sns, child_id)?,
                index_in_parent,
            })
        })
        .collect()
}

pub fn node_exists(conn: &Connection, workspace: &WorkspaceRow, id: NodeId) -> StoreResult<bool> {
    if id == workspace.root {
        return Ok(true);
    }
    Ok(child_row(conn, workspace.id, id)?.is_some())
}

/// Resolve a path segment-by-segment. `None` when any segment is missing.
pub fn resolve_path(
    conn: &Connection,
    workspace: &WorkspaceRow,
    path: &Path,
) -> StoreResult<Option<NodeId>> {
    let mut current = workspace.root;
    for segment in path.segments() {
        match child_by_segment(conn, workspace.id, current, segment)? {
            Some(child) => current = child,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// The deepest prefix of `path` that resolves.
pub fn lowest_existing(
    conn: &Connection,
    workspace: &WorkspaceRow,
    path: &Path,
) -> StoreResult<Path> {
    let mut current = workspace.root;
    for (depth, segment) in path.segments().iter().enumerate() {
        match child_by_segment(conn, workspace.id, current, segment)? {
            Some(child) => current = child,
            None => return Ok(path.subpath(depth)),
        }
    }
    Ok(path.clone())
}

fn child_by_segment(
    conn: &Connection,
    workspace_id: i64,
    parent: NodeId,
    segment: &Segment,
) -> StoreResult<Option<NodeId>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT child_id FROM children
             WHERE workspace_id = ?1 AND parent_id = ?2
               AND name_ns = ?3 AND name_local = ?4 AND sns_index = ?5",
            params![
                workspace_id,
                parent.to_string(),
                segment.name().namespace(),
                segment.name().local_part(),
                segment.index() as i64,
            ],
            |row| row.get(0),
        )
        .optional()?;
    id.map(|text| parse_id(&text, parent)).transpose()
}

/// The absolute path of a node, walking parent rows up to the root.
pub fn path_for(
    conn: &Connection,
    workspace: &WorkspaceRow,
    id: NodeId,
) -> StoreResult<Option<Path>> {
    let mut segments = Vec::new();
    let mut current = id;
    while current != workspace.root {
        match child_row(conn, workspace.id, current)? {
            Some(row) => {
                segments.push(row.segment);
                current = row.parent_id;
            }
            None => return Ok(None),
        }
    }
    segments.reverse();
    Ok(Some(Path::from_segments(segments)))
}

/// All ids in the branch rooted at `id`, parent before descendants,
/// siblings in child order.
pub fn subtree_ids(conn: &Connection, workspace_id: i64, id: NodeId) -> StoreResult<Vec<NodeId>> {
    let mut ids = vec![id];
    let mut cursor = 0;
    while cursor < ids.len() {
        let parent = ids[cursor];
        cursor += 1;
        for child in children_of(conn, workspace_id, parent)? {
            ids.push(child.child_id);
        }
    }
    Ok(ids)
}

// ---------------------------------------------------------------------
// Structural mutation
// ---------------------------------------------------------------------

/// Insert a node as the last child of `parent`, assigning the next dense
/// child index and the next SNS index for its name.
pub fn create_node(
    conn: &Connection,
    workspace_id: i64,
    parent: NodeId,
    name: &Name,
    id: NodeId,
    properties: &[Property],
) -> StoreResult<()> {
    let next_index: i64 = conn.query_row(
        "SELECT COALESCE(MAX(index_in_parent), 0) + 1 FROM children
         WHERE workspace_id = ?1 AND parent_id = ?2",
        params![workspace_id, parent.to_string()],
        |row| row.get(0),
    )?;
    let next_sns: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sns_index), 0) + 1 FROM children
         WHERE workspace_id = ?1 AND parent_id = ?2 AND name_ns = ?3 AND name_local = ?4",
        params![
            workspace_id,
            parent.to_string(),
            name.namespace(),
            name.local_part(),
        ],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO children
         (workspace_id, parent_id, child_id, name_ns, name_local, sns_index, index_in_parent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            workspace_id,
            parent.to_string(),
            id.to_string(),
            name.namespace(),
            name.local_part(),
            next_sns,
            next_index,
        ],
    )?;
    write_properties(conn, workspace_id, id, properties)?;
    debug!(workspace_id, node = %id, name = %name, "created node row");
    Ok(())
}

/// Delete one child row, closing the dense index gap and renumbering the
/// remaining same-named siblings in the same transaction.
pub fn remove_child_row(conn: &Connection, workspace_id: i64, row: &ChildRow) -> StoreResult<()> {
    conn.execute(
        "DELETE FROM children WHERE workspace_id = ?1 AND child_id = ?2",
        params![workspace_id, row.child_id.to_string()],
    )?;
    conn.execute(
        "UPDATE children SET index_in_parent = index_in_parent - 1
         WHERE workspace_id = ?1 AND parent_id = ?2 AND index_in_parent > ?3",
        params![
            workspace_id,
            row.parent_id.to_string(),
            row.index_in_parent
        ],
    )?;
    conn.execute(
        "UPDATE children SET sns_index = sns_index - 1
         WHERE workspace_id = ?1 AND parent_id = ?2
           AND name_ns = ?3 AND name_local = ?4 AND sns_index > ?5",
        params![
            workspace_id,
            row.parent_id.to_string(),
            row.segment.name().namespace(),
            row.segment.name().local_part(),
            row.segment.index() as i64,
        ],
    )?;
    Ok(())
}

/// Re-attach a node beneath `new_parent`, optionally before a sibling and
/// under a new name. The caller has already validated the destination.
pub fn move_child_row(
    conn: &Connection,
    workspace_id: i64,
    row: &ChildRow,
    new_parent: NodeId,
    before: Option<&ChildRow>,
    new_name: Option<&Name>,
) -> StoreResult<()> {
    remove_child_row(conn, workspace_id, row)?;

    let name = new_name.unwrap_or_else(|| row.segment.name());
    let dest_index: i64 = match before {
        Some(before_row) => {
            // Positions shift when the node leaves the same parent from an
            // earlier slot, so re-read the sibling's current index.
            let current: i64 = conn.query_row(
                "SELECT index_in_parent FROM children
                 WHERE workspace_id = ?1 AND child_id = ?2",
                params![workspace_id, before_row.child_id.to_string()],
                |r| r.get(0),
            )?;
            conn.execute(
                "UPDATE children SET index_in_parent = index_in_parent + 1
                 WHERE workspace_id = ?1 AND parent_id = ?2 AND index_in_parent >= ?3",
                params![workspace_id, new_parent.to_string(), current],
            )?;
            current
        }
        None => conn.query_row(
            "SELECT COALESCE(MAX(index_in_parent), 0) + 1 FROM children
             WHERE workspace_id = ?1 AND parent_id = ?2",
            params![workspace_id, new_parent.to_string()],
            |r| r.get(0),
        )?,
    };
    conn.execute(
        "INSERT INTO children
         (workspace_id, parent_id, child_id, name_ns, name_local, sns_index, index_in_parent)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
        params![
            workspace_id,
            new_parent.to_string(),
            row.child_id.to_string(),
            name.namespace(),
            name.local_part(),
            dest_index,
        ],
    )?;
    renumber_sns(conn, workspace_id, new_parent, name)?;
    debug!(workspace_id, node = %row.child_id, "moved node row");
    Ok(())
}

/// Rewrite the SNS indexes of every child of `parent` named `name` to their
/// 1-based position in child order.
pub fn renumber_sns(
    conn: &Connection,
    workspace_id: i64,
    parent: NodeId,
    name: &Name,
) -> StoreResult<()> {
    let same_named: Vec<(String, i64)> = {
        let mut statement = conn.prepare(
            "SELECT child_id, sns_index FROM children
             WHERE workspace_id = ?1 AND parent_id = ?2 AND name_ns = ?3 AND name_local = ?4
             ORDER BY index_in_parent",
        )?;
        let rows = statement
            .query_map(
                params![
                    workspace_id,
                    parent.to_string(),
                    name.namespace(),
                    name.local_part(),
                ],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for (position, (child_id, sns)) in same_named.iter().enumerate() {
        let expected = (position + 1) as i64;
        if *sns != expected {
            conn.execute(
                "UPDATE children SET sns_index = ?1
                 WHERE workspace_id = ?2 AND child_id = ?3",
                params![expected, workspace_id, child_id],
            )?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------
// Properties, large values, references
// ---------------------------------------------------------------------

/// Replace a node's property payload, keeping the large-value junction
/// rows and the reference edges in sync.
pub fn write_properties(
    conn: &Connection,
    workspace_id: i64,
    node: NodeId,
    properties: &[Property],
) -> StoreResult<()> {
    let encoded = payload::encode(conn, properties)?;

    let old_hashes: Vec<Vec<u8>> = {
        let mut statement = conn.prepare(
            "SELECT hash FROM property_large_values WHERE workspace_id = ?1 AND node_id = ?2",
        )?;
        let rows = statement
            .query_map(params![workspace_id, node.to_string()], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    conn.execute(
        "DELETE FROM property_large_values WHERE workspace_id = ?1 AND node_id = ?2",
        params![workspace_id, node.to_string()],
    )?;
    for hash in &encoded.large_values {
        conn.execute(
            "INSERT OR IGNORE INTO property_large_values (workspace_id, node_id, hash)
             VALUES (?1, ?2, ?3)",
            params![workspace_id, node.to_string(), hash.as_bytes().as_slice()],
        )?;
    }
    let kept: std::collections::HashSet<&[u8]> = encoded
        .large_values
        .iter()
        .map(|hash| hash.as_bytes().as_slice())
        .collect();
    for hash in &old_hashes {
        if !kept.contains(hash.as_slice()) {
            delete_large_value_if_orphan(conn, hash)?;
        }
    }

    conn.execute(
        "INSERT OR REPLACE INTO properties (workspace_id, node_id, payload, prop_count, compressed)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            workspace_id,
            node.to_string(),
            encoded.blob,
            encoded.prop_count as i64,
            encoded.compressed as i64,
        ],
    )?;

    conn.execute(
        "DELETE FROM node_references WHERE workspace_id = ?1 AND source_id = ?2",
        params![workspace_id, node.to_string()],
    )?;
    for property in properties {
        for target in property.referenced_nodes() {
            conn.execute(
                "INSERT OR IGNORE INTO node_references (workspace_id, source_id, target_id)
                 VALUES (?1, ?2, ?3)",
                params![workspace_id, node.to_string(), target.to_string()],
            )?;
        }
    }
    Ok(())
}

/// A node's properties; an absent payload row is an empty property set.
pub fn read_properties(
    conn: &Connection,
    workspace_id: i64,
    node: NodeId,
) -> StoreResult<Vec<Property>> {
    let row: Option<(Vec<u8>, i64)> = conn
        .query_row(
            "SELECT payload, compressed FROM properties
             WHERE workspace_id = ?1 AND node_id = ?2",
            params![workspace_id, node.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    match row {
        None => Ok(Vec::new()),
        Some((blob, compressed)) => payload::decode(conn, node, &blob, compressed != 0),
    }
}

/// Drop a large-value row once nothing references it.
pub fn delete_large_value_if_orphan(conn: &Connection, hash: &[u8]) -> StoreResult<()> {
    let remaining: i64 = conn.query_row(
        "SELECT count(*) FROM property_large_values WHERE hash = ?1",
        params![hash],
        |row| row.get(0),
    )?;
    if remaining == 0 {
        conn.execute("DELETE FROM large_values WHERE hash = ?1", params![hash])?;
    }
    Ok(())
}
