//! Relational backing store for the Arbor content store.
//!
//! The same request vocabulary as the in-memory store, executed against a
//! sqlite schema: a `children` table carrying both the same-name-sibling
//! index and a dense per-parent child order, a `properties` table holding
//! each node's serialized property payload, a content-addressed
//! `large_values` table deduplicating big values by BLAKE3 hash, and a
//! `node_references` table recording every reference-typed property value
//! as a source→target edge.
//!
//! [`SubgraphQuery`] materializes a depth-bounded subgraph inside one
//! transaction and supports bulk deletion with referential-integrity
//! accounting: references from surviving nodes into a deleted subgraph are
//! reported, never silently cascaded.

pub mod error;
pub mod payload;
pub mod processor;
pub mod repository;
pub mod schema;
pub mod source;
pub mod subgraph;

pub use error::{StoreError, StoreResult};
pub use source::{SqliteConnection, SqliteSource};
pub use subgraph::{ReferenceEdge, SubgraphQuery};
