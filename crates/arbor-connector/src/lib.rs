//! Connector SPI for the Arbor content store.
//!
//! A backing store plugs into Arbor by implementing two traits: [`Source`]
//! (a named factory with a capability set) and [`Connection`] (the handle
//! that executes [`Request`]s). The [`ConnectionPool`] hands out bounded,
//! validated, reusable connections to one source; the [`SourceRegistry`]
//! maps source names to pools.
//!
//! Neither the pool nor the registry knows anything about how a store is
//! implemented; they depend only on the traits.
//!
//! [`Request`]: arbor_requests::Request

pub mod context;
pub mod error;
pub mod pool;
pub mod registry;
pub mod traits;

pub use context::{ExecutionContext, IdSource, RandomIds, SequentialIds};
pub use error::{ConnectorError, ConnectorResult};
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use registry::SourceRegistry;
pub use traits::{CachePolicy, Capabilities, Connection, Source};
