use std::sync::Arc;
use std::time::Duration;

use arbor_connector::{
    Capabilities, Connection, ConnectorResult, ExecutionContext, Source,
};
use arbor_requests::Request;

use crate::processor;
use crate::repository::MemoryRepository;

/// An in-memory source: every connection shares one [`MemoryRepository`].
pub struct MemorySource {
    repository: Arc<MemoryRepository>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, default_workspace: impl Into<String>) -> Self {
        Self {
            repository: Arc::new(MemoryRepository::new(name, default_workspace)),
        }
    }

    /// Direct access to the shared repository (engine-level operations,
    /// tests).
    pub fn repository(&self) -> &Arc<MemoryRepository> {
        &self.repository
    }
}

impl Source for MemorySource {
    fn name(&self) -> &str {
        self.repository.source_name()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::writable_tree()
    }

    fn connect(&self) -> ConnectorResult<Box<dyn Connection>> {
        Ok(Box::new(MemoryConnection {
            repository: Arc::clone(&self.repository),
        }))
    }

    fn default_workspace(&self) -> &str {
        self.repository.default_workspace()
    }
}

/// A connection to an in-memory source.
pub struct MemoryConnection {
    repository: Arc<MemoryRepository>,
}

impl Connection for MemoryConnection {
    fn source_name(&self) -> &str {
        self.repository.source_name()
    }

    fn execute(
        &mut self,
        context: &ExecutionContext,
        request: &mut Request,
    ) -> ConnectorResult<()> {
        processor::process(&self.repository, context, request);
        Ok(())
    }

    fn ping(&self, _timeout: Duration) -> bool {
        // The store lives in this process; it is alive iff we are.
        true
    }
}
