use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arbor_types::NodeId;

/// Supplies node ids to executing stores.
///
/// Injected through the [`ExecutionContext`] so that tests can make id
/// assignment deterministic; production contexts use [`RandomIds`].
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> NodeId;
}

/// Random (UUID v4) id assignment.
#[derive(Debug, Default)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_id(&self) -> NodeId {
        NodeId::random()
    }
}

/// Deterministic id assignment for tests: a fixed UUID prefix with an
/// incrementing low 64 bits.
#[derive(Debug, Default)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> NodeId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(b"\x12\x34\x56\x78\x9a\xbc\xde\xf0");
        bytes[8..].copy_from_slice(&n.to_be_bytes());
        NodeId::from_uuid(uuid_from_bytes(bytes))
    }
}

fn uuid_from_bytes(bytes: [u8; 16]) -> uuid::Uuid {
    uuid::Uuid::from_bytes(bytes)
}

/// Per-call execution state handed to a store's processor.
///
/// Carries the injected id source; there is no process-wide mutable state in
/// the core engine itself.
#[derive(Clone)]
pub struct ExecutionContext {
    ids: Arc<dyn IdSource>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            ids: Arc::new(RandomIds),
        }
    }

    /// A context with a caller-supplied id source.
    pub fn with_ids(ids: Arc<dyn IdSource>) -> Self {
        Self { ids }
    }

    /// Mint the id for a newly created node.
    pub fn next_id(&self) -> NodeId {
        self.ids.next_id()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext").finish_non_exhaustive()
    }
}
