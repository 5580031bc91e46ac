//! Depth-bounded subgraph materialization, reference accounting, and bulk
//! deletion.
//!
//! A [`SubgraphQuery`] walks the `children` table breadth-first from a root
//! node, capturing the id, path, and depth of every node within `max_depth`
//! levels (0 = the root only, `usize::MAX` = unbounded). The walk happens
//! once, at creation, inside the caller's transaction; every later call
//! answers from the materialized set, so repeated calls on one query are
//! deterministic for an unchanged tree.
//!
//! # Invariants
//!
//! - `node_locations` returns level order: parents before descendants,
//!   siblings by `index_in_parent`.
//! - `include_children = false` drops the deepest materialized level, so a
//!   narrower call is a prefix-consistent subset of a wider one.
//! - `delete_subgraph` removes child, property, and large-value junction
//!   rows for the whole set in one transaction, drops orphaned large
//!   values, and removes reference rows whose *source* dies with the set.
//!   Rows whose source survives are left dangling and reported through
//!   [`inward_references`]; the engine never silently cascades or nulls a
//!   foreign reference.
//!
//! [`inward_references`]: SubgraphQuery::inward_references

use std::collections::HashSet;

use rusqlite::{params, Connection};
use tracing::{debug, warn};

use arbor_types::{Location, NodeId, Path};

use crate::error::StoreResult;
use crate::repository::{self, WorkspaceRow};

/// A directed reference edge between two nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReferenceEdge {
    pub source: NodeId,
    pub target: NodeId,
}

struct MaterializedNode {
    id: NodeId,
    path: Path,
    depth: usize,
}

/// A scoped query over the subgraph reachable from one node.
pub struct SubgraphQuery<'a> {
    conn: &'a Connection,
    workspace: WorkspaceRow,
    nodes: Vec<MaterializedNode>,
    deepest: usize,
}

impl<'a> SubgraphQuery<'a> {
    /// Materialize the subgraph below `root` (inclusive) to `max_depth`
    /// levels, inside the caller's transaction.
    pub fn create(
        conn: &'a Connection,
        workspace: &WorkspaceRow,
        root: NodeId,
        root_path: Path,
        max_depth: usize,
    ) -> StoreResult<Self> {
        let mut nodes = Vec::new();
        let mut deepest = 0;
        let mut cursor = 0;
        nodes.push(MaterializedNode {
            id: root,
            path: root_path,
            depth: 0,
        });
        while cursor < nodes.len() {
            let (parent_id, parent_path, parent_depth) = {
                let node = &nodes[cursor];
                (node.id, node.path.clone(), node.depth)
            };
            cursor += 1;
            if parent_depth >= max_depth {
                continue;
            }
            for child in repository::children_of(conn, workspace.id, parent_id)? {
                let depth = parent_depth + 1;
                deepest = deepest.max(depth);
                nodes.push(MaterializedNode {
                    id: child.child_id,
                    path: parent_path.join(child.segment),
                    depth,
                });
            }
        }
        debug!(
            workspace = workspace.name,
            nodes = nodes.len(),
            deepest,
            "materialized subgraph"
        );
        Ok(Self {
            conn,
            workspace: workspace.clone(),
            nodes,
            deepest,
        })
    }

    /// Locations in level order, deterministic across repeated calls.
    ///
    /// With `include_children = false` the deepest materialized level is
    /// truncated, making the result a prefix-consistent subset of a wider
    /// call on the same query object.
    pub fn node_locations(&self, include_root: bool, include_children: bool) -> Vec<Location> {
        self.nodes
            .iter()
            .filter(|node| include_root || node.depth > 0)
            .filter(|node| include_children || self.deepest == 0 || node.depth < self.deepest)
            .map(|node| Location::new(node.path.clone(), node.id))
            .collect()
    }

    /// Number of materialized nodes.
    pub fn node_count(&self, include_root: bool) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        if include_root {
            self.nodes.len()
        } else {
            self.nodes.len() - 1
        }
    }

    /// References with both endpoints inside the subgraph.
    pub fn internal_references(&self) -> StoreResult<Vec<ReferenceEdge>> {
        let set = self.id_set();
        Ok(self
            .workspace_references()?
            .into_iter()
            .filter(|edge| set.contains(&edge.source) && set.contains(&edge.target))
            .collect())
    }

    /// References from outside the subgraph to a node inside it. After
    /// [`delete_subgraph`], these are the dangling edges the caller must
    /// remediate.
    ///
    /// [`delete_subgraph`]: SubgraphQuery::delete_subgraph
    pub fn inward_references(&self) -> StoreResult<Vec<ReferenceEdge>> {
        let set = self.id_set();
        Ok(self
            .workspace_references()?
            .into_iter()
            .filter(|edge| !set.contains(&edge.source) && set.contains(&edge.target))
            .collect())
    }

    /// References from inside the subgraph to a node outside it.
    pub fn outward_references(&self) -> StoreResult<Vec<ReferenceEdge>> {
        let set = self.id_set();
        Ok(self
            .workspace_references()?
            .into_iter()
            .filter(|edge| set.contains(&edge.source) && !set.contains(&edge.target))
            .collect())
    }

    /// Delete the materialized set in the surrounding transaction: child
    /// rows (renumbering surviving siblings of the subgraph root), property
    /// payloads, large-value associations (and any large value orphaned by
    /// them), and references whose source dies with the set.
    pub fn delete_subgraph(&self, include_root: bool) -> StoreResult<()> {
        let root = self.nodes.first().map(|node| node.id);
        let doomed: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|node| include_root || node.depth > 0)
            .map(|node| node.id)
            .collect();
        if doomed.is_empty() {
            return Ok(());
        }
        let doomed_text: Vec<String> = doomed.iter().map(NodeId::to_string).collect();
        let ws = self.workspace.id;

        // The subgraph root is the only deleted node whose siblings
        // survive; closing its index gap renumbers them. Every other child
        // row dies with its parent. The workspace root has no child row
        // (its identity lives on the workspace), so deleting its branch
        // empties the tree and leaves the root in place.
        if include_root {
            if let Some(root) = root {
                if let Some(row) = repository::child_row(self.conn, ws, root)? {
                    repository::remove_child_row(self.conn, ws, &row)?;
                }
            }
        }
        self.delete_rows(&doomed_text)?;
        self.finish_delete(&doomed_text)
    }

    /// Drop the materialized state. Safe to call repeatedly; afterwards the
    /// query answers as if the subgraph were empty.
    pub fn close(&mut self) {
        self.nodes.clear();
        self.deepest = 0;
    }

    fn delete_rows(&self, doomed: &[String]) -> StoreResult<()> {
        let ws = self.workspace.id;
        for chunk in doomed.chunks(256) {
            let placeholders = in_clause(chunk.len());
            self.conn.execute(
                &format!(
                    "DELETE FROM children WHERE workspace_id = {ws} AND child_id IN ({placeholders})"
                ),
                rusqlite::params_from_iter(chunk.iter()),
            )?;
        }
        Ok(())
    }

    fn finish_delete(&self, doomed: &[String]) -> StoreResult<()> {
        let ws = self.workspace.id;

        // Large values: collect candidates, drop the associations, then
        // drop any value with no remaining association anywhere.
        let mut hashes: Vec<Vec<u8>> = Vec::new();
        for chunk in doomed.chunks(256) {
            let placeholders = in_clause(chunk.len());
            let mut statement = self.conn.prepare(&format!(
                "SELECT DISTINCT hash FROM property_large_values
                 WHERE workspace_id = {ws} AND node_id IN ({placeholders})"
            ))?;
            let chunk_hashes = statement
                .query_map(rusqlite::params_from_iter(chunk.iter()), |row| row.get(0))?
                .collect::<Result<Vec<Vec<u8>>, _>>()?;
            hashes.extend(chunk_hashes);
        }
        for chunk in doomed.chunks(256) {
            let placeholders = in_clause(chunk.len());
            self.conn.execute(
                &format!(
                    "DELETE FROM property_large_values
                     WHERE workspace_id = {ws} AND node_id IN ({placeholders})"
                ),
                rusqlite::params_from_iter(chunk.iter()),
            )?;
            self.conn.execute(
                &format!(
                    "DELETE FROM properties WHERE workspace_id = {ws} AND node_id IN ({placeholders})"
                ),
                rusqlite::params_from_iter(chunk.iter()),
            )?;
            // References *from* deleted nodes (internal and outward) go;
            // references from survivors are kept, dangling, and reported.
            self.conn.execute(
                &format!(
                    "DELETE FROM node_references
                     WHERE workspace_id = {ws} AND source_id IN ({placeholders})"
                ),
                rusqlite::params_from_iter(chunk.iter()),
            )?;
        }
        hashes.sort();
        hashes.dedup();
        for hash in &hashes {
            repository::delete_large_value_if_orphan(self.conn, hash)?;
        }

        let dangling = self.inward_references()?;
        if !dangling.is_empty() {
            warn!(
                workspace = self.workspace.name,
                count = dangling.len(),
                "subgraph delete left dangling inward references"
            );
        }
        debug!(
            workspace = self.workspace.name,
            nodes = doomed.len(),
            large_values = hashes.len(),
            "deleted subgraph"
        );
        Ok(())
    }

    fn id_set(&self) -> HashSet<NodeId> {
        self.nodes.iter().map(|node| node.id).collect()
    }

    fn workspace_references(&self) -> StoreResult<Vec<ReferenceEdge>> {
        let mut statement = self.conn.prepare(
            "SELECT source_id, target_id FROM node_references
             WHERE workspace_id = ?1 ORDER BY source_id, target_id",
        )?;
        let rows = statement
            .query_map(params![self.workspace.id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(source, target)| {
                let source = NodeId::parse(&source).map_err(|e| {
                    crate::error::StoreError::Serialization(format!("bad reference source: {e}"))
                })?;
                let target = NodeId::parse(&target).map_err(|e| {
                    crate::error::StoreError::Serialization(format!("bad reference target: {e}"))
                })?;
                Ok(ReferenceEdge { source, target })
            })
            .collect()
    }
}

fn in_clause(n: usize) -> String {
    vec!["?"; n].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{create_node, create_workspace, resolve_path, write_properties};
    use crate::schema;
    use arbor_types::{Name, Property};
    use std::collections::HashMap;

    fn name(s: &str) -> Name {
        Name::local(s).unwrap()
    }

    struct Fixture {
        conn: Connection,
        ws: WorkspaceRow,
        by_path: HashMap<String, NodeId>,
        lorem: [String; 3],
    }

    /// The canonical tree: `/a/a1{a1,a2,a3}` and
    /// `/a/a2{a1{a1{a1,a2}},a2,a3,a4}`, 14 nodes, with three large
    /// values: one shared between `/a/a1` and `/a/a2`, one unique to
    /// `/a/a1`, one shared between `/a/a2` and `/a/a2/a1`.
    fn fixture() -> Fixture {
        let conn = Connection::open_in_memory().unwrap();
        schema::initialize(&conn).unwrap();
        let ws = create_workspace(&conn, "main", NodeId::random()).unwrap();

        let mut by_path: HashMap<String, NodeId> = HashMap::new();
        by_path.insert("/".into(), ws.root);
        let paths = [
            "/a",
            "/a/a1",
            "/a/a1/a1",
            "/a/a1/a2",
            "/a/a1/a3",
            "/a/a2",
            "/a/a2/a1",
            "/a/a2/a1/a1",
            "/a/a2/a1/a1/a1",
            "/a/a2/a1/a1/a2",
            "/a/a2/a1/a2",
            "/a/a2/a2",
            "/a/a2/a3",
            "/a/a2/a4",
        ];
        for path in paths {
            let (parent_path, local) = path.rsplit_once('/').unwrap();
            let parent_key = if parent_path.is_empty() { "/" } else { parent_path };
            let parent = by_path[parent_key];
            let id = NodeId::random();
            create_node(&conn, ws.id, parent, &name(local), id, &[]).unwrap();
            by_path.insert(path.into(), id);
        }

        let lorem = [
            format!("1. Lorem ipsum dolor sit amet {}", "x".repeat(2000)),
            format!("2. Lorem ipsum dolor sit amet {}", "y".repeat(2000)),
            format!("3. Lorem ipsum dolor sit amet {}", "z".repeat(2000)),
        ];
        let set = |node: &str, props: Vec<Property>| {
            write_properties(&conn, ws.id, by_path[node], &props).unwrap();
        };
        set(
            "/a/a1",
            vec![
                Property::single(name("prop1"), lorem[0].clone()),
                // The only user of lorem #2.
                Property::single(name("prop2"), lorem[1].clone()),
            ],
        );
        set(
            "/a/a2",
            vec![
                Property::single(name("prop1"), lorem[0].clone()),
                Property::single(name("prop2"), lorem[2].clone()),
            ],
        );
        set(
            "/a/a2/a1",
            vec![
                Property::single(name("prop2"), lorem[0].clone()),
                Property::single(name("prop3"), lorem[2].clone()),
            ],
        );

        Fixture {
            conn,
            ws,
            by_path,
            lorem,
        }
    }

    impl Fixture {
        fn id(&self, path: &str) -> NodeId {
            self.by_path[path]
        }

        fn query(&self, path: &str, max_depth: usize) -> SubgraphQuery<'_> {
            SubgraphQuery::create(
                &self.conn,
                &self.ws,
                self.id(path),
                Path::parse(path).unwrap(),
                max_depth,
            )
            .unwrap()
        }

        fn add_reference(&self, from: &str, to: &str) {
            self.conn
                .execute(
                    "INSERT INTO node_references (workspace_id, source_id, target_id)
                     VALUES (?1, ?2, ?3)",
                    params![
                        self.ws.id,
                        self.id(from).to_string(),
                        self.id(to).to_string()
                    ],
                )
                .unwrap();
        }

        fn edge(&self, from: &str, to: &str) -> ReferenceEdge {
            ReferenceEdge {
                source: self.id(from),
                target: self.id(to),
            }
        }

        fn count(&self, table: &str) -> i64 {
            self.conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))
                .unwrap()
        }
    }

    fn paths_of(locations: &[Location]) -> Vec<String> {
        locations
            .iter()
            .map(|location| location.path().unwrap().to_string())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Materialization and ordering
    // -----------------------------------------------------------------------

    #[test]
    fn subgraph_of_node_with_children_and_no_grandchildren() {
        let f = fixture();
        let query = f.query("/a/a1", usize::MAX);
        assert_eq!(
            paths_of(&query.node_locations(true, true)),
            vec!["/a/a1", "/a/a1/a1", "/a/a1/a2", "/a/a1/a3"]
        );
        assert_eq!(query.node_count(true), 4);
        assert_eq!(query.node_count(false), 3);
    }

    #[test]
    fn unbounded_subgraph_is_level_ordered() {
        let f = fixture();
        let query = f.query("/a", usize::MAX);
        assert_eq!(
            paths_of(&query.node_locations(true, true)),
            vec![
                "/a",
                "/a/a1",
                "/a/a2",
                "/a/a1/a1",
                "/a/a1/a2",
                "/a/a1/a3",
                "/a/a2/a1",
                "/a/a2/a2",
                "/a/a2/a3",
                "/a/a2/a4",
                "/a/a2/a1/a1",
                "/a/a2/a1/a2",
                "/a/a2/a1/a1/a1",
                "/a/a2/a1/a1/a2",
            ]
        );
        assert_eq!(query.node_count(true), 14);
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let f = fixture();
        let query = f.query("/a", usize::MAX);
        assert_eq!(
            query.node_locations(true, true),
            query.node_locations(true, true)
        );
    }

    #[test]
    fn depth_bounds_and_child_truncation_are_prefix_consistent() {
        let f = fixture();

        let query = f.query("/a", 2);
        let wide = query.node_locations(true, true);
        assert_eq!(wide.len(), 10); // depths 0..=2
        let narrow = query.node_locations(true, false);
        assert_eq!(paths_of(&narrow), vec!["/a", "/a/a1", "/a/a2"]);
        assert_eq!(&wide[..3], &narrow[..]);

        let query = f.query("/a", 3);
        // Narrower call first: order does not depend on call sequence.
        assert_eq!(query.node_locations(true, false).len(), 10);
        assert_eq!(query.node_locations(true, true).len(), 12);

        let query = f.query("/a", 4);
        assert_eq!(query.node_locations(true, true).len(), 14);
        assert_eq!(query.node_locations(true, false).len(), 12);

        // The bounded query is a prefix of the unbounded one.
        let unbounded = f.query("/a", usize::MAX);
        let all = unbounded.node_locations(true, true);
        let bounded = f.query("/a", 2).node_locations(true, true);
        assert_eq!(&all[..bounded.len()], &bounded[..]);
    }

    #[test]
    fn excluding_the_root_drops_exactly_one_node() {
        let f = fixture();
        let query = f.query("/a/a1", usize::MAX);
        assert_eq!(
            paths_of(&query.node_locations(false, true)),
            vec!["/a/a1/a1", "/a/a1/a2", "/a/a1/a3"]
        );
    }

    // -----------------------------------------------------------------------
    // Deletion with large-value accounting
    // -----------------------------------------------------------------------

    #[test]
    fn delete_subgraph_removes_rows_and_orphaned_large_values() {
        let f = fixture();
        assert_eq!(f.count("large_values"), 3);
        assert_eq!(f.count("properties"), 14);
        assert_eq!(f.count("children"), 14);

        // `/a/a1` shares lorem #1 with `/a/a2` but is the only user of #2.
        let mut query = f.query("/a/a1", usize::MAX);
        assert_eq!(query.node_count(true), 4);
        query.delete_subgraph(true).unwrap();
        assert!(query.inward_references().unwrap().is_empty());
        query.close();

        assert_eq!(f.count("large_values"), 2);
        assert_eq!(f.count("properties"), 10);
        assert_eq!(f.count("children"), 10);

        // The surviving tree still reads correctly.
        let query = f.query("/a", 4);
        assert_eq!(
            paths_of(&query.node_locations(true, true)),
            vec![
                "/a",
                "/a/a2",
                "/a/a2/a1",
                "/a/a2/a2",
                "/a/a2/a3",
                "/a/a2/a4",
                "/a/a2/a1/a1",
                "/a/a2/a1/a2",
                "/a/a2/a1/a1/a1",
                "/a/a2/a1/a1/a2",
            ]
        );
    }

    #[test]
    fn lorem_values_share_and_dedupe_as_expected() {
        let f = fixture();
        // Three distinct contents, five property references, three rows.
        assert_eq!(f.count("large_values"), 3);
        assert_eq!(f.count("property_large_values"), 6);
        for text in &f.lorem {
            assert!(text.len() >= 1024);
        }
    }

    #[test]
    fn delete_renumbers_surviving_siblings_of_the_deleted_root() {
        let f = fixture();
        // Deleting /a/a1 leaves /a/a2 as the only child of /a.
        f.query("/a/a1", usize::MAX).delete_subgraph(true).unwrap();
        let rows = repository::children_of(&f.conn, f.ws.id, f.id("/a")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].index_in_parent, 1);
        // Path resolution still works below the survivor.
        assert_eq!(
            resolve_path(&f.conn, &f.ws, &Path::parse("/a/a2/a4").unwrap()).unwrap(),
            Some(f.id("/a/a2/a4"))
        );
    }

    #[test]
    fn delete_without_root_keeps_the_root_node() {
        let f = fixture();
        let query = f.query("/a/a1", usize::MAX);
        query.delete_subgraph(false).unwrap();
        assert_eq!(
            resolve_path(&f.conn, &f.ws, &Path::parse("/a/a1").unwrap()).unwrap(),
            Some(f.id("/a/a1"))
        );
        assert!(
            repository::children_of(&f.conn, f.ws.id, f.id("/a/a1"))
                .unwrap()
                .is_empty()
        );
    }

    // -----------------------------------------------------------------------
    // Reference classification
    // -----------------------------------------------------------------------

    #[test]
    fn references_are_classified_against_the_subgraph_boundary() {
        let f = fixture();
        // Edges that never touch the subgraph below /a/a1.
        f.add_reference("/a/a2", "/a/a2/a1");
        f.add_reference("/a/a2/a1", "/a/a2/a2");
        // Internal edges.
        f.add_reference("/a/a1", "/a/a1/a1");
        f.add_reference("/a/a1/a2", "/a/a1/a3");
        // Inward edges.
        f.add_reference("/a/a2", "/a/a1/a1");
        f.add_reference("/a/a2/a1", "/a/a1/a3");
        // Outward edges.
        f.add_reference("/a/a1", "/a/a2");
        f.add_reference("/a/a1/a1", "/a/a2/a1");

        let query = f.query("/a/a1", usize::MAX);
        let internal = query.internal_references().unwrap();
        let inward = query.inward_references().unwrap();
        let outward = query.outward_references().unwrap();

        let expect = |edges: &[ReferenceEdge], expected: Vec<ReferenceEdge>| {
            assert_eq!(edges.len(), expected.len());
            for edge in expected {
                assert!(edges.contains(&edge), "missing {edge:?}");
            }
        };
        expect(
            &internal,
            vec![f.edge("/a/a1", "/a/a1/a1"), f.edge("/a/a1/a2", "/a/a1/a3")],
        );
        expect(
            &inward,
            vec![
                f.edge("/a/a2", "/a/a1/a1"),
                f.edge("/a/a2/a1", "/a/a1/a3"),
            ],
        );
        expect(
            &outward,
            vec![f.edge("/a/a1", "/a/a2"), f.edge("/a/a1/a1", "/a/a2/a1")],
        );
    }

    #[test]
    fn delete_reports_inward_references_and_keeps_them_dangling() {
        let f = fixture();
        // From the surviving branch into the doomed one.
        f.add_reference("/a/a2", "/a/a1");
        f.add_reference("/a/a2/a1", "/a/a1/a1");
        f.add_reference("/a/a2/a2", "/a/a1/a2");
        // Inside the doomed branch (these die with it).
        f.add_reference("/a/a1", "/a/a1/a1");
        f.add_reference("/a/a1/a2", "/a/a1/a3");

        let query = f.query("/a/a1", usize::MAX);
        query.delete_subgraph(true).unwrap();

        let dangling = query.inward_references().unwrap();
        assert_eq!(dangling.len(), 3);
        assert!(dangling.contains(&f.edge("/a/a2", "/a/a1")));
        // The dangling rows are still in the table for the caller to see.
        assert_eq!(f.count("node_references"), 3);
    }

    #[test]
    fn delete_keeps_references_that_never_touch_the_subgraph() {
        let f = fixture();
        f.add_reference("/a/a2", "/a/a2/a1"); // survivor-to-survivor
        f.add_reference("/a/a1", "/a/a1/a1"); // internal to the doomed set
        f.add_reference("/a/a1/a2", "/a/a1/a3"); // internal to the doomed set

        let query = f.query("/a/a1", usize::MAX);
        query.delete_subgraph(true).unwrap();
        assert!(query.inward_references().unwrap().is_empty());
        // Only the survivor-to-survivor edge remains.
        assert_eq!(f.count("node_references"), 1);
    }

    // -----------------------------------------------------------------------
    // Close
    // -----------------------------------------------------------------------

    #[test]
    fn close_is_idempotent_and_empties_the_query() {
        let f = fixture();
        let mut query = f.query("/a", usize::MAX);
        assert_eq!(query.node_count(true), 14);
        query.close();
        query.close();
        assert_eq!(query.node_count(true), 0);
        assert!(query.node_locations(true, true).is_empty());
    }
}
