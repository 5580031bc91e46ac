//! In-memory backing store for the Arbor content store.
//!
//! Each workspace is an arena: a map from [`NodeId`] to stored node, with
//! parent/child relationships held as id references rather than pointers.
//! All workspaces of a repository share one `RwLock`, so readers always see
//! a consistent snapshot (never a partially renumbered sibling list) and
//! structural mutations, including cross-workspace move and copy, are
//! serialized and atomic.
//!
//! [`NodeId`]: arbor_types::NodeId

pub mod node;
pub mod processor;
pub mod repository;
pub mod source;
pub mod workspace;

pub use node::StoredNode;
pub use repository::MemoryRepository;
pub use source::{MemoryConnection, MemorySource};
pub use workspace::Workspace;
