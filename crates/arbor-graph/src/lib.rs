//! Fluent façade over the Arbor content store.
//!
//! A [`Graph`] binds a source name, a workspace, and a [`SourceRegistry`];
//! each verb builds one request, submits it through a pooled connection,
//! and returns a typed result. [`Graph::batch`] accumulates several verbs
//! and submits them as one composite in a single round trip.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use arbor_connector::SourceRegistry;
//! # use arbor_graph::Graph;
//! # use arbor_types::Path;
//! # fn example(registry: Arc<SourceRegistry>) -> Result<(), arbor_graph::GraphError> {
//! let graph = Graph::connect(registry, "main-store")?;
//! graph.create_at("/articles", vec![])?;
//! graph.set("title").on(Path::parse("/articles")?).to("Hello")?;
//! let node = graph.node_at(Path::parse("/articles")?)?;
//! # Ok(())
//! # }
//! ```
//!
//! [`SourceRegistry`]: arbor_connector::SourceRegistry

pub mod batch;
pub mod error;
pub mod graph;
pub mod results;

pub use batch::Batch;
pub use error::{GraphError, GraphResult};
pub use graph::Graph;
pub use results::{Node, Subgraph};
