use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::query::errors::QueryIssueWithCode;
use crate::query::metadata::InMemoryRegistry;
use crate::query::profile::{profile_snapshot, QueryProfileSnapshot};
use crate::query::{
    Description, Query, QueryConfig, QueryMode, QueryOutcome, QueryStore, SortKey, SqliteEngine,
};
use crate::types::AskError;

/// Configuration for the `query` command.
#[derive(Debug, Clone)]
pub struct QueryCmdConfig {
    /// SQLite database holding the store tables.
    pub db_path: PathBuf,
    /// JSON file with a serialized description.
    pub query_path: PathBuf,
    /// Result mode.
    pub mode: QueryMode,
    /// Requested limit; the configured default applies when absent.
    pub limit: Option<usize>,
    /// Number of results to skip.
    pub offset: usize,
    /// ORDER BY keys.
    pub sort: Vec<SortKey>,
    /// Optional TOML configuration file.
    pub config_path: Option<PathBuf>,
    /// Declared property datatypes as `(key, type id)` pairs.
    pub properties: Vec<(String, String)>,
}

/// Result of the `query` command.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    /// Condition that was answered, in `#ask` syntax.
    pub condition: String,
    /// Mode-specific outcome.
    pub outcome: QueryOutcome,
    /// Issues formatted with their codes.
    pub issues: Vec<String>,
    /// Phase timings, when `SOMBRA_ASK_PROFILE` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<QueryProfileSnapshot>,
}

/// Error type for CLI query operations.
#[derive(Error, Debug)]
pub enum CliError {
    /// Generic error message.
    #[error("{0}")]
    Message(String),
    /// IO error from file operations.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Query layer error.
    #[error(transparent)]
    Ask(#[from] AskError),
}

impl From<&str> for CliError {
    fn from(value: &str) -> Self {
        CliError::Message(value.to_string())
    }
}

impl From<String> for CliError {
    fn from(value: String) -> Self {
        CliError::Message(value)
    }
}

/// Parses a `KEY=TYPE` property declaration such as `Population=_num`.
pub fn parse_property(arg: &str) -> Result<(String, String), CliError> {
    let (key, type_id) = arg
        .split_once('=')
        .ok_or_else(|| CliError::Message(format!("expected KEY=TYPE, got '{arg}'")))?;
    let key = key.trim();
    let type_id = type_id.trim();
    if key.is_empty() || type_id.is_empty() {
        return Err(CliError::Message(format!("expected KEY=TYPE, got '{arg}'")));
    }
    Ok((key.to_owned(), type_id.to_owned()))
}

/// Loads the description, opens the database and answers the query.
pub fn run_query(cfg: &QueryCmdConfig) -> Result<QueryReport, CliError> {
    if !cfg.db_path.exists() {
        return Err(CliError::Message(format!(
            "database {} does not exist",
            cfg.db_path.display()
        )));
    }
    let config = match &cfg.config_path {
        Some(path) => QueryConfig::load(path)?,
        None => QueryConfig::default(),
    };
    let text = fs::read_to_string(&cfg.query_path)?;
    let description: Description = serde_json::from_str(&text).map_err(AskError::from)?;

    let mut registry = InMemoryRegistry::standard();
    for (key, type_id) in &cfg.properties {
        registry = registry.with_property(key.as_str(), type_id);
    }
    let engine = Arc::new(SqliteEngine::open(&cfg.db_path)?);
    let store = QueryStore::sqlite(engine, Arc::new(registry), config);

    let mut query = Query::new(description, store.config()).with_offset(cfg.offset);
    if let Some(limit) = cfg.limit {
        query.set_limit(limit, store.config());
    }
    query.mode = cfg.mode;
    query.sort = cfg.sort.clone();
    debug!(db = %cfg.db_path.display(), mode = ?query.mode, "cli.query.start");

    let outcome = store.get_query_result(&mut query);
    Ok(QueryReport {
        condition: query.description.query_string(false),
        outcome,
        issues: query
            .errors
            .iter()
            .map(|issue| QueryIssueWithCode(issue).to_string())
            .collect(),
        profile: profile_snapshot(true),
    })
}
