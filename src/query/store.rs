//! Query façade: prunes, compiles, executes and answers one query.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::query::compiler::{Collaborators, Compiler};
use crate::query::config::QueryConfig;
use crate::query::engine::{SqlEngine, SqliteEngine};
use crate::query::errors::{QueryIssue, QueryIssueWithCode};
use crate::query::executor::{Executor, QueryLogEntry};
use crate::query::hierarchy::HierarchyCache;
use crate::query::metadata::{
    ConceptStore, DescriptionParser, IdResolver, JsonDescriptionParser, PropertyTableRegistry,
    StoreLayout,
};
use crate::query::plan::{AliasSequence, CompilationContext, ExplainNode, PlanNode};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::request::{DebugTrace, Query, QueryMode, QueryOutcome, ResultSet, SortOrder};
use crate::query::sql::{entity_record, SqlConceptStore, SqlIdResolver};
use crate::types::{AskError, Result};

/// Answers queries against one relational store.
pub struct QueryStore {
    engine: Arc<dyn SqlEngine>,
    ids: Arc<dyn IdResolver>,
    registry: Arc<dyn PropertyTableRegistry>,
    concepts: Arc<dyn ConceptStore>,
    parser: Arc<dyn DescriptionParser>,
    config: QueryConfig,
    layout: StoreLayout,
    hierarchy_cache: HierarchyCache,
}

impl QueryStore {
    /// Creates a store from its collaborators. The configured dialect is
    /// replaced by the engine's.
    pub fn new(
        engine: Arc<dyn SqlEngine>,
        ids: Arc<dyn IdResolver>,
        registry: Arc<dyn PropertyTableRegistry>,
        concepts: Arc<dyn ConceptStore>,
        mut config: QueryConfig,
    ) -> Self {
        config.dialect = engine.dialect();
        Self {
            engine,
            ids,
            registry,
            concepts,
            parser: Arc::new(JsonDescriptionParser),
            config,
            layout: StoreLayout::default(),
            hierarchy_cache: HierarchyCache::new(),
        }
    }

    /// Creates a store whose ids and concepts are read from the SQLite
    /// database itself, using the default table layout.
    pub fn sqlite(
        engine: Arc<SqliteEngine>,
        registry: Arc<dyn PropertyTableRegistry>,
        config: QueryConfig,
    ) -> Self {
        let layout = StoreLayout::default();
        let ids = Arc::new(SqlIdResolver::new(engine.clone(), &layout));
        let concepts = Arc::new(SqlConceptStore::new(engine.clone()));
        Self::new(engine, ids, registry, concepts, config)
    }

    /// Active configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Closures computed by this store.
    pub fn hierarchy_cache(&self) -> &HierarchyCache {
        &self.hierarchy_cache
    }

    /// Drops every cached hierarchy closure. Call after changing
    /// subcategory or subproperty edges.
    pub fn invalidate_hierarchies(&self) -> Result<usize> {
        self.hierarchy_cache.invalidate(self.engine.as_ref())
    }

    /// Answers `query`. Never fails: problems are recorded on
    /// `query.errors` and an empty outcome of the requested mode is
    /// returned instead.
    pub fn get_query_result(&self, query: &mut Query) -> QueryOutcome {
        query.apply_restrictions(&self.config);
        if query.mode == QueryMode::None {
            let mut skipped = ResultSet::empty(query.description.print_requests.clone());
            skipped.has_further_results = true;
            return QueryOutcome::Instances(skipped);
        }
        let debug_mode = query.mode == QueryMode::Debug;
        if !debug_mode && self.blocked(query) {
            debug!(errors = query.errors.len(), "query.store.blocked");
            return self.empty_outcome(query);
        }

        let mut ctx = CompilationContext::new(AliasSequence::global());
        let services = Collaborators {
            ids: self.ids.as_ref(),
            registry: self.registry.as_ref(),
            concepts: self.concepts.as_ref(),
            parser: self.parser.as_ref(),
        };
        let mut compiler = Compiler::new(services, &self.config, &self.layout, unix_now())
            .with_sort_keys(query.sort.iter().map(|sort| sort.key.clone()));
        let compiled = compiler.compile_query(&mut ctx, &query.description);
        query.errors.extend(compiler.take_issues());
        let root = match compiled {
            Ok(root) => root,
            Err(err) => return self.abort(query, err),
        };
        let plan = debug_mode.then(|| ctx.explain(root));
        if !debug_mode && self.blocked(query) {
            debug!(errors = query.errors.len(), "query.store.blocked");
            return self.empty_outcome(query);
        }

        let mut executor = Executor::new(
            self.engine.as_ref(),
            self.registry.as_ref(),
            &self.config,
            &self.hierarchy_cache,
            debug_mode,
        );
        if let Err(err) = executor.run(&mut ctx, root) {
            return self.abort(query, err);
        }
        let root = ctx.node(root);
        let outcome = match query.mode {
            QueryMode::Count => self.count(root).map(QueryOutcome::Count),
            QueryMode::Debug => Ok(QueryOutcome::Debug(self.debug_trace(
                query,
                Some(root),
                plan,
                executor.take_log(),
            ))),
            QueryMode::Instances | QueryMode::None => {
                self.instances(query, root).map(QueryOutcome::Instances)
            }
        };
        match outcome {
            Ok(outcome) => {
                match &outcome {
                    QueryOutcome::Instances(set) => info!(
                        rows = set.rows.len(),
                        further = set.has_further_results,
                        "query.store.instances"
                    ),
                    QueryOutcome::Count(count) => info!(count, "query.store.count"),
                    QueryOutcome::Debug(_) => info!("query.store.debug"),
                }
                outcome
            }
            Err(err) => self.abort(query, err),
        }
    }

    fn blocked(&self, query: &Query) -> bool {
        !self.config.ignore_query_errors && query.has_blocking_errors()
    }

    fn abort(&self, query: &mut Query, err: AskError) -> QueryOutcome {
        warn!(error = %err, "query.store.engine_error");
        query.errors.push(QueryIssue::Engine {
            message: err.to_string(),
        });
        self.empty_outcome(query)
    }

    fn empty_outcome(&self, query: &Query) -> QueryOutcome {
        match query.mode {
            QueryMode::Count => QueryOutcome::Count(0),
            QueryMode::Debug => {
                QueryOutcome::Debug(self.debug_trace(query, None, None, Vec::new()))
            }
            QueryMode::Instances | QueryMode::None => QueryOutcome::Instances(ResultSet::empty(
                query.description.print_requests.clone(),
            )),
        }
    }

    fn instances(&self, query: &Query, root: &PlanNode) -> Result<ResultSet> {
        let mut result = ResultSet::empty(query.description.print_requests.clone());
        let Some(sql) = self.instance_sql(query, root) else {
            return Ok(result);
        };
        let start = profile_timer();
        let rows = self.engine.select(&sql, &[]);
        record_profile_timer(QueryProfileKind::Select, start);
        for row in rows? {
            let record = entity_record(&row)?;
            if result.rows.len() >= query.limit {
                result.has_further_results = true;
                break;
            }
            result.rows.push(record);
        }
        Ok(result)
    }

    fn count(&self, root: &PlanNode) -> Result<usize> {
        let Some(table) = root.table.as_deref().filter(|_| !root.is_empty_result()) else {
            return Ok(0);
        };
        let sql = format!(
            "SELECT COUNT(DISTINCT {alias}.id) FROM {table} AS {alias}{from}{filter}",
            alias = root.alias,
            from = root.from,
            filter = where_suffix(&root.where_clause),
        );
        let start = profile_timer();
        let rows = self.engine.select(&sql, &[]);
        record_profile_timer(QueryProfileKind::Select, start);
        Ok(rows?
            .first()
            .and_then(|row| row.first())
            .and_then(|value| value.as_i64())
            .unwrap_or(0) as usize)
    }

    /// Final SELECT over the executed root, or `None` when the root can
    /// never match.
    fn instance_sql(&self, query: &Query, root: &PlanNode) -> Option<String> {
        let table = root.table.as_deref().filter(|_| !root.is_empty_result())?;
        let alias = &root.alias;
        let order = self.order_by(query, root);
        let mut select = format!(
            "SELECT DISTINCT {alias}.id, {alias}.title, {alias}.namespace, {alias}.interwiki, {alias}.sortkey"
        );
        if self.config.dialect.selects_sort_fields() {
            for (field, _) in order.iter().filter(|(_, random)| !random) {
                select.push_str(", ");
                select.push_str(field);
            }
        }
        let mut sql = format!(
            "{select} FROM {table} AS {alias}{}{}",
            root.from,
            where_suffix(&root.where_clause)
        );
        if !order.is_empty() {
            let terms: Vec<&str> = order.iter().map(|(term, _)| term.as_str()).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", query.limit + 1, query.offset));
        Some(sql)
    }

    /// ORDER BY terms, each flagged when it is a random ordering.
    fn order_by(&self, query: &Query, root: &PlanNode) -> Vec<(String, bool)> {
        if !self.config.sorting_support {
            return Vec::new();
        }
        let mut terms = Vec::new();
        for sort in &query.sort {
            match sort.order {
                SortOrder::Random if self.config.random_sorting_support => {
                    terms.push((self.config.dialect.random().to_owned(), true));
                }
                SortOrder::Random => {}
                SortOrder::Asc | SortOrder::Desc => {
                    if let Some(field) = root.sort_fields.get(&sort.key) {
                        let direction = if sort.order == SortOrder::Asc { "ASC" } else { "DESC" };
                        terms.push((format!("{field} {direction}"), false));
                    }
                }
            }
        }
        terms
    }

    fn debug_trace(
        &self,
        query: &Query,
        root: Option<&PlanNode>,
        plan: Option<ExplainNode>,
        auxiliary: Vec<QueryLogEntry>,
    ) -> DebugTrace {
        let description = &query.description;
        DebugTrace {
            condition: description.query_string(false),
            size: description.size(self.config.cost_model()),
            depth: description.depth(),
            features: description
                .query_features()
                .names()
                .into_iter()
                .map(str::to_owned)
                .collect(),
            sql: root.and_then(|root| self.instance_sql(query, root)),
            plan,
            auxiliary,
            errors: query
                .errors
                .iter()
                .map(|issue| QueryIssueWithCode(issue).to_string())
                .collect(),
        }
    }
}

fn where_suffix(condition: &str) -> String {
    if condition.is_empty() {
        String::new()
    } else {
        format!(" WHERE {condition}")
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}
