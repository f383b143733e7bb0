#![forbid(unsafe_code)]

//! Query description algebra, plan compilation and execution.
//!
//! A [`Description`] is pruned and checked against the [`QueryConfig`],
//! compiled into plan nodes by the [`compiler`], materialized by the
//! [`executor`] and answered by [`QueryStore::get_query_result`].

/// Compilation of descriptions into plan nodes.
pub mod compiler;

/// Limits and switches governing query processing.
pub mod config;

/// The description algebra: node kinds, cost, pruning and serialization.
pub mod description;

/// Relational engine driver and SQL dialects.
pub mod engine;

/// User-facing issues collected while answering a query.
pub mod errors;

/// Materialization of compiled plans.
pub mod executor;

/// Subcategory and subproperty closures.
pub mod hierarchy;

/// Property tables, id resolution and concept storage.
pub mod metadata;

/// Plan node arena.
pub mod plan;

/// Performance profiling for query operations.
///
/// Collects timing and count statistics to identify performance bottlenecks.
pub mod profile;

/// Query requests and result types.
pub mod request;

/// Collaborators backed by the store's own tables.
pub mod sql;

/// The query façade.
pub mod store;

/// Entity references, property references and data items.
pub mod value;

pub use config::{ConceptCaching, QueryConfig};
pub use description::{CostModel, Description, DescriptionKind, PrintRequest, QueryFeatures};
pub use engine::{Dialect, SqlEngine, SqlValue, SqliteEngine};
pub use errors::{QueryIssue, QueryIssueWithCode};
pub use metadata::{InMemoryConcepts, InMemoryIds, InMemoryRegistry, PropertyTableRegistry};
pub use request::{DebugTrace, Query, QueryMode, QueryOutcome, ResultSet, SortKey, SortOrder};
pub use store::QueryStore;
pub use value::{Comparator, DataItem, EntityRef, PropertyRef};
