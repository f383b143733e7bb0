//! Limits and switches that govern query processing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::query::description::{CostModel, QueryFeatures};
use crate::query::engine::Dialect;
use crate::types::Result;

/// When concepts may be computed from their definition instead of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConceptCaching {
    /// Concepts are always computed on the fly.
    None,
    /// Only concepts within the query limits are computed on the fly.
    #[default]
    Hard,
    /// Concepts are only answered from a fresh cache.
    All,
}

/// Query processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Maximum description size of a query.
    pub max_size: i64,
    /// Maximum property nesting of a query.
    pub max_depth: i64,
    /// Maximum description size of a concept definition.
    pub concept_max_size: i64,
    /// Maximum property nesting of a concept definition.
    pub concept_max_depth: i64,
    /// Features queries may use.
    pub features: QueryFeatures,
    /// Features concept definitions may use.
    pub concept_features: QueryFeatures,
    /// Whether class conditions include subcategories.
    pub category_hierarchy: bool,
    /// Maximum subcategory closure depth; `0` disables the closure.
    pub subcategory_depth: u32,
    /// Maximum subproperty closure depth; `0` disables the closure.
    pub subproperty_depth: u32,
    /// Resolve page values through redirects.
    pub equality_support: bool,
    /// Apply ORDER BY for sort keys.
    pub sorting_support: bool,
    /// Allow random ordering.
    pub random_sorting_support: bool,
    /// Run queries even if errors were recorded.
    pub ignore_query_errors: bool,
    /// Limit used when a query does not state one.
    pub default_limit: usize,
    /// Upper bound for any requested limit.
    pub max_limit: usize,
    /// Concept computation policy.
    pub concept_caching: ConceptCaching,
    /// Age in minutes after which a concept cache is stale.
    pub concept_cache_lifetime_minutes: i64,
    /// SQL dialect of the backing engine.
    pub dialect: Dialect,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_size: 12,
            max_depth: 4,
            concept_max_size: 20,
            concept_max_depth: 8,
            features: QueryFeatures::ALL,
            concept_features: QueryFeatures::ALL,
            category_hierarchy: true,
            subcategory_depth: 10,
            subproperty_depth: 10,
            equality_support: true,
            sorting_support: true,
            random_sorting_support: true,
            ignore_query_errors: false,
            default_limit: 50,
            max_limit: 10_000,
            concept_caching: ConceptCaching::Hard,
            concept_cache_lifetime_minutes: 24 * 60,
            dialect: Dialect::Sqlite,
        }
    }
}

impl QueryConfig {
    /// Small budgets, no hierarchies, concepts only from cache.
    pub fn strict() -> Self {
        Self {
            max_size: 6,
            max_depth: 2,
            concept_max_size: 10,
            concept_max_depth: 4,
            features: QueryFeatures::PROPERTY
                | QueryFeatures::CATEGORY
                | QueryFeatures::NAMESPACE
                | QueryFeatures::CONJUNCTION,
            subcategory_depth: 0,
            subproperty_depth: 0,
            random_sorting_support: false,
            max_limit: 500,
            concept_caching: ConceptCaching::All,
            ..Self::default()
        }
    }

    /// Large budgets, errors never block execution.
    pub fn permissive() -> Self {
        Self {
            max_size: 64,
            max_depth: 16,
            concept_max_size: 64,
            concept_max_depth: 16,
            subcategory_depth: 32,
            subproperty_depth: 32,
            ignore_query_errors: true,
            max_limit: 100_000,
            concept_caching: ConceptCaching::None,
            ..Self::default()
        }
    }

    /// Parses a TOML document; missing keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self> {
        Ok(toml::from_str(src)?)
    }

    /// Reads a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
    }

    /// Cost model matching these settings.
    pub fn cost_model(&self) -> CostModel {
        CostModel {
            category_hierarchy: self.category_hierarchy,
        }
    }
}
