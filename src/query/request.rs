//! Query requests and their results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::query::config::QueryConfig;
use crate::query::description::{Description, PrintRequest};
use crate::query::errors::QueryIssue;
use crate::query::executor::QueryLogEntry;
use crate::query::metadata::EntityRecord;
use crate::query::plan::ExplainNode;
use crate::types::AskError;

/// What a query should produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Matching entities.
    #[default]
    Instances,
    /// Number of matching entities.
    Count,
    /// Plan and statements, without touching data.
    Debug,
    /// Nothing; the result only signals that more results exist.
    None,
}

impl FromStr for QueryMode {
    type Err = AskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "instances" => Ok(QueryMode::Instances),
            "count" => Ok(QueryMode::Count),
            "debug" => Ok(QueryMode::Debug),
            "none" => Ok(QueryMode::None),
            other => Err(AskError::InvalidOwned(format!("unknown query mode '{other}'"))),
        }
    }
}

/// Direction of one ORDER BY key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
    /// Random order.
    Random,
}

impl FromStr for SortOrder {
    type Err = AskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            "rand" | "random" => Ok(SortOrder::Random),
            other => Err(AskError::InvalidOwned(format!("unknown sort order '{other}'"))),
        }
    }
}

/// One ORDER BY key: a property key, or the empty string for the entity's
/// own sort key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Property key.
    pub key: String,
    /// Direction.
    pub order: SortOrder,
}

impl FromStr for SortKey {
    type Err = AskError;

    /// Parses `key`, `key:asc`, `key:desc` or `key:random`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, order) = match s.rsplit_once(':') {
            Some((key, order)) => (key, order.parse()?),
            None => (s, SortOrder::Asc),
        };
        Ok(SortKey {
            key: key.trim().replace(' ', "_"),
            order,
        })
    }
}

/// A description plus paging, ordering and the issues collected while it
/// is answered.
#[derive(Clone, Debug)]
pub struct Query {
    /// Condition.
    pub description: Description,
    /// Maximum number of results.
    pub limit: usize,
    /// Number of results to skip.
    pub offset: usize,
    /// ORDER BY keys in priority order.
    pub sort: Vec<SortKey>,
    /// Result mode.
    pub mode: QueryMode,
    /// Issues recorded so far.
    pub errors: Vec<QueryIssue>,
}

impl Query {
    /// Creates an instance query with the configured default limit.
    pub fn new(description: Description, config: &QueryConfig) -> Self {
        Self {
            description,
            limit: config.default_limit.min(config.max_limit),
            offset: 0,
            sort: Vec::new(),
            mode: QueryMode::Instances,
            errors: Vec::new(),
        }
    }

    /// Sets the limit, clamped to the configured maximum.
    pub fn set_limit(&mut self, limit: usize, config: &QueryConfig) {
        self.limit = limit.min(config.max_limit);
    }

    /// Builder form of [`Query::set_limit`].
    pub fn with_limit(mut self, limit: usize, config: &QueryConfig) -> Self {
        self.set_limit(limit, config);
        self
    }

    /// Sets the offset.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Appends an ORDER BY key.
    pub fn with_sort(mut self, key: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortKey {
            key: key.into().replace(' ', "_"),
            order,
        });
        self
    }

    /// Sets the result mode.
    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Prunes the description to the configured size and depth budgets and
    /// checks its features against the allowed set.
    pub fn apply_restrictions(&mut self, config: &QueryConfig) {
        let (pruned, dropped) =
            self.description
                .pruned(config.cost_model(), config.max_size, config.max_depth);
        if !dropped.is_empty() {
            warn!(dropped = ?dropped, "query.store.pruned");
            self.description = pruned;
            self.errors.push(QueryIssue::BudgetExceeded { dropped });
        }
        let excess = self.description.query_features().excess(config.features);
        if !excess.is_empty() {
            self.errors.push(QueryIssue::FeatureNotAllowed {
                features: excess.names().into_iter().map(str::to_owned).collect(),
            });
        }
    }

    /// True when a recorded issue prevents execution.
    pub fn has_blocking_errors(&self) -> bool {
        self.errors.iter().any(|issue| !issue.is_warning())
    }
}

/// Instance results.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResultSet {
    /// Matching entities in result order.
    pub rows: Vec<EntityRecord>,
    /// Whether more results exist beyond the limit.
    pub has_further_results: bool,
    /// Print requests of the answered description.
    pub print_requests: Vec<PrintRequest>,
}

impl ResultSet {
    /// Result without rows.
    pub fn empty(print_requests: Vec<PrintRequest>) -> Self {
        Self {
            rows: Vec::new(),
            has_further_results: false,
            print_requests,
        }
    }
}

/// Output of debug mode.
#[derive(Clone, Debug, Serialize)]
pub struct DebugTrace {
    /// Condition in `#ask` syntax after pruning.
    pub condition: String,
    /// Size of the condition.
    pub size: i64,
    /// Depth of the condition.
    pub depth: i64,
    /// Features used by the condition.
    pub features: Vec<String>,
    /// Final SELECT, if one would be issued.
    pub sql: Option<String>,
    /// Compiled plan before execution.
    pub plan: Option<ExplainNode>,
    /// Statements that would fill auxiliary relations.
    pub auxiliary: Vec<QueryLogEntry>,
    /// Issues formatted with their codes.
    pub errors: Vec<String>,
}

impl fmt::Display for DebugTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Condition: {}", self.condition)?;
        writeln!(f, "Size: {}, depth: {}", self.size, self.depth)?;
        writeln!(f, "Features: {}", self.features.join(", "))?;
        if let Some(plan) = &self.plan {
            writeln!(f, "Plan:")?;
            f.write_str(&plan.render())?;
        }
        match &self.sql {
            Some(sql) => writeln!(f, "SQL: {sql}")?,
            None => writeln!(f, "SQL: (empty result, no query issued)")?,
        }
        for entry in &self.auxiliary {
            writeln!(f, "Auxiliary table {}:", entry.alias)?;
            for statement in &entry.statements {
                writeln!(f, "  {statement}")?;
            }
        }
        for error in &self.errors {
            writeln!(f, "Error: {error}")?;
        }
        Ok(())
    }
}

/// Result of [`crate::query::QueryStore::get_query_result`].
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "mode", content = "result", rename_all = "snake_case")]
pub enum QueryOutcome {
    /// Instance or skipped results.
    Instances(ResultSet),
    /// Number of matching entities.
    Count(usize),
    /// Debug trace.
    Debug(DebugTrace),
}

impl QueryOutcome {
    /// Instance results, if this is one.
    pub fn instances(&self) -> Option<&ResultSet> {
        match self {
            QueryOutcome::Instances(set) => Some(set),
            _ => None,
        }
    }

    /// Count, if this is one.
    pub fn count(&self) -> Option<usize> {
        match self {
            QueryOutcome::Count(count) => Some(*count),
            _ => None,
        }
    }

    /// Debug trace, if this is one.
    pub fn debug_trace(&self) -> Option<&DebugTrace> {
        match self {
            QueryOutcome::Debug(trace) => Some(trace),
            _ => None,
        }
    }
}
