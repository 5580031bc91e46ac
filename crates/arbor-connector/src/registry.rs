use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::info;

use crate::error::{ConnectorError, ConnectorResult};
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};
use crate::traits::Source;

/// Maps source names to connection pools.
///
/// One registry serves a whole engine: sources register once, and every
/// caller (the façade included) connects by name. Registration and lookup
/// are thread-safe; each source gets exactly one pool.
pub struct SourceRegistry {
    entries: RwLock<HashMap<String, RegisteredSource>>,
}

struct RegisteredSource {
    source: Arc<dyn Source>,
    pool: ConnectionPool,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register a source under its own name with a dedicated pool.
    ///
    /// Fails with a validation error if a source with the same name is
    /// already registered or the pool configuration is invalid.
    pub fn register(&self, source: Arc<dyn Source>, config: PoolConfig) -> ConnectorResult<()> {
        let name = source.name().to_string();
        let pool = ConnectionPool::new(Arc::clone(&source), config)?;
        let mut entries = self.write_entries()?;
        if entries.contains_key(&name) {
            return Err(ConnectorError::Validation(format!(
                "a source named {name:?} is already registered"
            )));
        }
        entries.insert(name.clone(), RegisteredSource { source, pool });
        info!(source = name, "registered source");
        Ok(())
    }

    /// Acquire a pooled connection to the named source.
    pub fn connect(&self, source_name: &str) -> ConnectorResult<PooledConnection> {
        let pool = {
            let entries = self.read_entries()?;
            let Some(entry) = entries.get(source_name) else {
                return Err(ConnectorError::SourceNotFound(source_name.to_string()));
            };
            entry.pool.clone()
        };
        // Acquire outside the registry lock: it may block up to max_wait.
        pool.acquire()
    }

    /// The registered source with the given name, if any.
    pub fn source(&self, source_name: &str) -> Option<Arc<dyn Source>> {
        self.read_entries()
            .ok()
            .and_then(|entries| entries.get(source_name).map(|e| Arc::clone(&e.source)))
    }

    /// The pool serving the named source, if any.
    pub fn pool(&self, source_name: &str) -> Option<ConnectionPool> {
        self.read_entries()
            .ok()
            .and_then(|entries| entries.get(source_name).map(|e| e.pool.clone()))
    }

    pub fn source_names(&self) -> Vec<String> {
        match self.read_entries() {
            Ok(entries) => {
                let mut names: Vec<String> = entries.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    /// Shut down every pool. Registered names remain resolvable but all
    /// subsequent acquires fail.
    pub fn shutdown(&self) {
        if let Ok(entries) = self.read_entries() {
            for entry in entries.values() {
                entry.pool.shutdown();
            }
        }
    }

    fn read_entries(
        &self,
    ) -> ConnectorResult<std::sync::RwLockReadGuard<'_, HashMap<String, RegisteredSource>>> {
        self.entries
            .read()
            .map_err(|_| ConnectorError::Connector("source registry lock poisoned".into()))
    }

    fn write_entries(
        &self,
    ) -> ConnectorResult<std::sync::RwLockWriteGuard<'_, HashMap<String, RegisteredSource>>> {
        self.entries
            .write()
            .map_err(|_| ConnectorError::Connector("source registry lock poisoned".into()))
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
