#![forbid(unsafe_code)]

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Problems recorded on a query while it is pruned, compiled and executed.
///
/// Issues accumulate on [`crate::query::Query::errors`] instead of aborting
/// the request; only [`QueryIssue::Engine`] stops processing early.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum QueryIssue {
    /// Parts of the condition were removed to respect size/depth limits.
    #[error("query too complex, the following conditions were ignored: {}", dropped.join(", "))]
    BudgetExceeded {
        /// Serialized forms of the removed conditions.
        dropped: Vec<String>,
    },
    /// The condition uses features disabled by configuration.
    #[error("query features not allowed: {}", features.join(", "))]
    FeatureNotAllowed {
        /// Names of the disallowed features.
        features: Vec<String>,
    },
    /// No storage could be found for the whole condition.
    #[error("query condition cannot be satisfied: {reason}")]
    Unsatisfiable {
        /// Why the top-level condition failed to compile.
        reason: String,
    },
    /// A referenced concept has no definition.
    #[error("concept '{concept}' is not defined")]
    ConceptUndefined {
        /// Concept title.
        concept: String,
    },
    /// A concept has no usable cache and may not be computed on the fly.
    #[error("concept '{concept}' has no valid cache and is too complex to compute")]
    ConceptNotComputable {
        /// Concept title.
        concept: String,
    },
    /// A concept refers to itself, directly or indirectly.
    #[error("concept '{concept}' refers to itself")]
    ConceptCycle {
        /// Concept title.
        concept: String,
    },
    /// A stored concept definition could not be decoded.
    #[error("concept '{concept}' has an invalid definition: {message}")]
    ConceptInvalid {
        /// Concept title.
        concept: String,
        /// Decoder message.
        message: String,
    },
    /// The relational engine failed; the request was aborted.
    #[error("query execution failed: {message}")]
    Engine {
        /// Driver message.
        message: String,
    },
}

impl QueryIssue {
    /// Returns a machine-readable code for the issue.
    pub fn code(&self) -> &'static str {
        match self {
            QueryIssue::BudgetExceeded { .. } => "BudgetExceeded",
            QueryIssue::FeatureNotAllowed { .. } => "FeatureNotAllowed",
            QueryIssue::Unsatisfiable { .. } => "UnresolvableProperty",
            QueryIssue::ConceptUndefined { .. } => "ConceptError",
            QueryIssue::ConceptNotComputable { .. } => "ConceptError",
            QueryIssue::ConceptCycle { .. } => "ConceptError",
            QueryIssue::ConceptInvalid { .. } => "ConceptError",
            QueryIssue::Engine { .. } => "EngineError",
        }
    }

    /// Warnings do not prevent a query from producing results.
    pub fn is_warning(&self) -> bool {
        matches!(self, QueryIssue::BudgetExceeded { .. })
    }
}

/// Convenience wrapper that formats issues with their codes.
pub struct QueryIssueWithCode<'a>(pub &'a QueryIssue);

impl fmt::Display for QueryIssueWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}
