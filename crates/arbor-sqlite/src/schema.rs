//! Table shapes and connection setup.
//!
//! Logical schema:
//!
//! - `workspaces(id, name, root_id)` — one row per workspace; the root node
//!   has no `children` row, its id lives here.
//! - `children(workspace_id, parent_id, child_id, name_ns, name_local,
//!   sns_index, index_in_parent)` — one row per non-root node.
//!   `index_in_parent` is a dense 1-based sequence per parent, independent
//!   of naming; `sns_index` numbers same-named siblings 1..k.
//! - `properties(workspace_id, node_id, payload, prop_count, compressed)` —
//!   the serialized property list; large values are externalized to ...
//! - `large_values(hash, bytes, length, value_type, compressed)` — content
//!   keyed by BLAKE3 hash, stored once, and
//!   `property_large_values(workspace_id, node_id, hash)` — which nodes use
//!   which large values. A `large_values` row exists iff at least one
//!   junction row references it.
//! - `node_references(workspace_id, source_id, target_id)` — one row per
//!   reference-typed property value.

use rusqlite::Connection;

use crate::error::StoreResult;

const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS workspaces (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT NOT NULL UNIQUE,
    root_id  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS children (
    workspace_id     INTEGER NOT NULL,
    parent_id        TEXT NOT NULL,
    child_id         TEXT NOT NULL,
    name_ns          TEXT NOT NULL,
    name_local       TEXT NOT NULL,
    sns_index        INTEGER NOT NULL,
    index_in_parent  INTEGER NOT NULL,
    PRIMARY KEY (workspace_id, child_id)
);

CREATE INDEX IF NOT EXISTS idx_children_by_parent
    ON children (workspace_id, parent_id, index_in_parent);

CREATE TABLE IF NOT EXISTS properties (
    workspace_id  INTEGER NOT NULL,
    node_id       TEXT NOT NULL,
    payload       BLOB NOT NULL,
    prop_count    INTEGER NOT NULL,
    compressed    INTEGER NOT NULL,
    PRIMARY KEY (workspace_id, node_id)
);

CREATE TABLE IF NOT EXISTS large_values (
    hash        BLOB PRIMARY KEY,
    bytes       BLOB NOT NULL,
    length      INTEGER NOT NULL,
    value_type  TEXT NOT NULL,
    compressed  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS property_large_values (
    workspace_id  INTEGER NOT NULL,
    node_id       TEXT NOT NULL,
    hash          BLOB NOT NULL,
    PRIMARY KEY (workspace_id, node_id, hash)
);

CREATE TABLE IF NOT EXISTS node_references (
    workspace_id  INTEGER NOT NULL,
    source_id     TEXT NOT NULL,
    target_id     TEXT NOT NULL,
    PRIMARY KEY (workspace_id, source_id, target_id)
);
";

/// Apply pragmas and create the schema on a fresh connection.
pub fn initialize(conn: &Connection) -> StoreResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(CREATE_TABLES)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creation_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN
                 ('workspaces', 'children', 'properties', 'large_values',
                  'property_large_values', 'node_references')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);
    }
}
