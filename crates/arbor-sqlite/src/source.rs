//! The sqlite-backed [`Source`] and its connections.
//!
//! Every connection owns its own sqlite handle to the same database (a file
//! on disk, or a named shared-cache in-memory database for tests and
//! embedding). Each top-level `execute` runs in one transaction: the
//! materialize-then-delete sequence of a branch delete, and every composite
//! submission, either commits whole or rolls back whole.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::OpenFlags;
use tracing::info;

use arbor_connector::{
    Capabilities, Connection, ConnectorError, ConnectorResult, ExecutionContext, Source,
};
use arbor_requests::Request;
use arbor_types::NodeId;

use crate::error::StoreResult;
use crate::processor;
use crate::repository;
use crate::schema;

enum Locator {
    File(PathBuf),
    Memory(String),
}

impl Locator {
    fn open(&self) -> rusqlite::Result<rusqlite::Connection> {
        match self {
            Self::File(path) => rusqlite::Connection::open(path),
            Self::Memory(uri) => rusqlite::Connection::open_with_flags(
                uri,
                OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI,
            ),
        }
    }
}

/// A sqlite-backed source.
pub struct SqliteSource {
    name: String,
    default_workspace: String,
    locator: Locator,
    /// Held for the source's lifetime so a shared-cache in-memory database
    /// survives between pooled connections.
    _keeper: Mutex<rusqlite::Connection>,
}

impl SqliteSource {
    /// A source stored in a database file.
    pub fn at_path(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        default_workspace: impl Into<String>,
    ) -> StoreResult<Self> {
        Self::build(name.into(), Locator::File(path.into()), default_workspace.into())
    }

    /// A source held in memory, shared by all of its connections. Contents
    /// are lost when the source is dropped.
    pub fn in_memory(
        name: impl Into<String>,
        default_workspace: impl Into<String>,
    ) -> StoreResult<Self> {
        let name = name.into();
        // A unique URI per source keeps two in-memory sources with the same
        // name from aliasing within this process.
        let uri = format!(
            "file:arbor-{name}-{}?mode=memory&cache=shared",
            NodeId::random()
        );
        Self::build(name, Locator::Memory(uri), default_workspace.into())
    }

    fn build(name: String, locator: Locator, default_workspace: String) -> StoreResult<Self> {
        let keeper = locator.open()?;
        schema::initialize(&keeper)?;
        if repository::workspace_by_name(&keeper, &default_workspace)?.is_none() {
            repository::create_workspace(&keeper, &default_workspace, NodeId::random())?;
        }
        info!(source = name, workspace = default_workspace, "opened sqlite source");
        Ok(Self {
            name,
            default_workspace,
            locator,
            _keeper: Mutex::new(keeper),
        })
    }
}

impl Source for SqliteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::writable_tree()
    }

    fn connect(&self) -> ConnectorResult<Box<dyn Connection>> {
        let conn = self
            .locator
            .open()
            .map_err(|e| ConnectorError::Connector(e.to_string()))?;
        schema::initialize(&conn).map_err(|e| ConnectorError::Connector(e.to_string()))?;
        Ok(Box::new(SqliteConnection {
            source_name: self.name.clone(),
            default_workspace: self.default_workspace.clone(),
            conn,
        }))
    }

    fn default_workspace(&self) -> &str {
        &self.default_workspace
    }
}

/// One pooled connection to a sqlite source.
pub struct SqliteConnection {
    source_name: String,
    default_workspace: String,
    conn: rusqlite::Connection,
}

impl Connection for SqliteConnection {
    fn source_name(&self) -> &str {
        &self.source_name
    }

    fn execute(
        &mut self,
        context: &ExecutionContext,
        request: &mut Request,
    ) -> ConnectorResult<()> {
        let tx = self
            .conn
            .transaction()
            .map_err(|e| ConnectorError::Connector(e.to_string()))?;
        processor::process(&tx, context, request, &self.default_workspace);
        let finished = if request.error().is_some() {
            tx.rollback()
        } else {
            tx.commit()
        };
        finished.map_err(|e| ConnectorError::Connector(e.to_string()))
    }

    fn ping(&self, _timeout: Duration) -> bool {
        self.conn
            .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_connector::{PoolConfig, SourceRegistry};
    use arbor_requests::{
        CompositeRequest, CreateNodeRequest, DeleteBranchRequest, MoveBranchRequest,
        ReadNodeRequest,
    };
    use arbor_types::{Location, Name, Path, Property};
    use std::sync::Arc;

    fn loc(path: &str) -> Location {
        Location::from_path(Path::parse(path).unwrap())
    }

    fn name(s: &str) -> Name {
        Name::local(s).unwrap()
    }

    fn execute(connection: &mut dyn Connection, mut request: Request) -> Request {
        connection
            .execute(&ExecutionContext::new(), &mut request)
            .unwrap();
        request
    }

    fn create(connection: &mut dyn Connection, parent: &str, child: &str) {
        let request = execute(
            connection,
            Request::CreateNode(CreateNodeRequest::new(
                loc(parent),
                "main",
                name(child),
                vec![Property::single(name("title"), child)],
            )),
        );
        assert!(request.error().is_none(), "create {child}: {:?}", request.error());
    }

    #[test]
    fn two_connections_see_the_same_file_backed_tree() {
        let dir = tempfile::tempdir().unwrap();
        let source = SqliteSource::at_path("db", dir.path().join("store.db"), "main").unwrap();

        let mut writer = source.connect().unwrap();
        create(writer.as_mut(), "/", "a");
        create(writer.as_mut(), "/a", "b");

        let mut reader = source.connect().unwrap();
        let request = execute(
            reader.as_mut(),
            Request::ReadNode(ReadNodeRequest::new(loc("/a/b"), "main")),
        );
        let Request::ReadNode(read) = request else {
            unreachable!()
        };
        assert!(read.error.is_none());
        assert_eq!(read.properties.len(), 1);
    }

    #[test]
    fn in_memory_source_is_shared_between_connections() {
        let source = SqliteSource::in_memory("mem-db", "main").unwrap();
        let mut writer = source.connect().unwrap();
        create(writer.as_mut(), "/", "a");

        let mut reader = source.connect().unwrap();
        let request = execute(
            reader.as_mut(),
            Request::ReadNode(ReadNodeRequest::new(loc("/a"), "main")),
        );
        assert!(request.error().is_none());
    }

    #[test]
    fn failed_composite_rolls_back_whole() {
        let source = SqliteSource::in_memory("tx-db", "main").unwrap();
        let mut connection = source.connect().unwrap();

        let request = execute(
            connection.as_mut(),
            Request::Composite(CompositeRequest::new(vec![
                Request::CreateNode(CreateNodeRequest::new(loc("/"), "main", name("a"), vec![])),
                Request::DeleteBranch(DeleteBranchRequest::new(loc("/missing"), "main")),
            ])),
        );
        assert!(request.error().is_some());

        // The create was rolled back with the failing delete.
        let read = execute(
            connection.as_mut(),
            Request::ReadNode(ReadNodeRequest::new(loc("/a"), "main")),
        );
        assert!(read.error().is_some());
    }

    #[test]
    fn move_preserves_identity_across_requests() {
        let source = SqliteSource::in_memory("move-db", "main").unwrap();
        let mut connection = source.connect().unwrap();
        create(connection.as_mut(), "/", "a");
        create(connection.as_mut(), "/", "b");
        create(connection.as_mut(), "/a", "x");

        let Request::ReadNode(before) = execute(
            connection.as_mut(),
            Request::ReadNode(ReadNodeRequest::new(loc("/a/x"), "main")),
        ) else {
            unreachable!()
        };
        let id_before = before.actual.unwrap().id().unwrap();

        let request = execute(
            connection.as_mut(),
            Request::MoveBranch(MoveBranchRequest::new(loc("/a/x"), loc("/b"), "main")),
        );
        assert!(request.error().is_none());

        let Request::ReadNode(after) = execute(
            connection.as_mut(),
            Request::ReadNode(ReadNodeRequest::new(loc("/b/x"), "main")),
        ) else {
            unreachable!()
        };
        assert_eq!(after.actual.unwrap().id().unwrap(), id_before);
        assert_eq!(after.properties, before.properties);
    }

    #[test]
    fn works_through_the_registry_and_pool() {
        let registry = SourceRegistry::new();
        registry
            .register(
                Arc::new(SqliteSource::in_memory("pooled-db", "main").unwrap()),
                PoolConfig::default(),
            )
            .unwrap();

        let mut connection = registry.connect("pooled-db").unwrap();
        let request = execute(
            &mut *connection,
            Request::CreateNode(CreateNodeRequest::new(loc("/"), "main", name("a"), vec![])),
        );
        assert!(request.error().is_none());
        assert!(connection.ping(Duration::from_secs(1)));
    }
}
