//! Semantic query answering over a relational entity store.
//!
//! Descriptions (conditions over categories, property values, namespaces and
//! named concepts) are pruned to configured budgets, compiled into a plan of
//! SQL fragments, materialized through temporary relations and answered
//! with a single final SELECT. See [`query::QueryStore`] for the entry
//! point.

#![warn(missing_docs)]

pub mod cli;
pub mod query;
pub mod types;

pub use query::{Description, Query, QueryConfig, QueryMode, QueryOutcome, QueryStore};
pub use types::{AskError, EntityId, Result};
