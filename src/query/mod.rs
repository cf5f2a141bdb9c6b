//! Query trees, their optimizer, and the engine that evaluates them.

/// Query trees, rewrite patterns, and sort orders.
pub mod ast;

/// Engine tunables loaded from TOML.
pub mod config;

/// Set algebra over entity sequences.
pub mod engine;

/// Type hierarchy and association facts.
pub mod metadata;

/// Rewrite plans, hoisted sorts, and the optimized-tree cache.
pub mod optimizer;

/// Optional timing counters.
pub mod profile;

/// Entity sequences.
pub mod seq;

/// Property, link, and in-memory sorting.
pub mod sort;

/// Deferred query results keeping their tree.
pub mod tree_keeping;

/// Comparable property values.
pub mod value;

pub use ast::{Node, SortOrder};
pub use config::{QueryEngineConfig, SortConfig};
pub use engine::QueryEngine;
pub use metadata::{Cardinality, InMemoryMetadata, MetadataProvider};
pub use seq::EntitySeq;
pub use tree_keeping::TreeKeepingSeq;
pub use value::Value;
