//! Materializes compiled plans.
//!
//! Execution rewrites nodes in place until the root is a single table node
//! whose join table, FROM text and WHERE text form the final statement.
//! Disjunctions and copied hierarchy closures are written to temporary
//! relations named after the node alias; they are dropped when the executor
//! goes out of scope.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::query::config::QueryConfig;
use crate::query::engine::SqlEngine;
use crate::query::hierarchy::{
    id_list, value_rows, Closure, EdgeRelation, HierarchyCache, HierarchyResolver,
};
use crate::query::metadata::{PropertyTableRegistry, SUBCATEGORY_OF, SUBPROPERTY_OF};
use crate::query::plan::{CompilationContext, JoinField, PlanKind, PlanNodeId};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::value::PropertyRef;
use crate::types::{EntityId, Result};

/// Statements issued to fill one auxiliary relation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QueryLogEntry {
    /// Alias of the node the relation belongs to.
    pub alias: String,
    /// Statements in execution order.
    pub statements: Vec<String>,
}

/// Executes plans against one engine.
pub struct Executor<'a> {
    engine: &'a dyn SqlEngine,
    registry: &'a dyn PropertyTableRegistry,
    config: &'a QueryConfig,
    hierarchy_cache: &'a HierarchyCache,
    dry_run: bool,
    log: Vec<QueryLogEntry>,
    temporaries: Vec<String>,
}

impl<'a> Executor<'a> {
    /// Creates an executor. In dry-run mode no relation is created or
    /// filled; the statements are only recorded in the query log.
    pub fn new(
        engine: &'a dyn SqlEngine,
        registry: &'a dyn PropertyTableRegistry,
        config: &'a QueryConfig,
        hierarchy_cache: &'a HierarchyCache,
        dry_run: bool,
    ) -> Self {
        Self {
            engine,
            registry,
            config,
            hierarchy_cache,
            dry_run,
            log: Vec::new(),
            temporaries: Vec::new(),
        }
    }

    /// Executes the plan below `root`.
    pub fn run(&mut self, ctx: &mut CompilationContext<'_>, root: PlanNodeId) -> Result<()> {
        let start = profile_timer();
        let result = self.execute(ctx, root);
        record_profile_timer(QueryProfileKind::Execute, start);
        result
    }

    /// Auxiliary relations filled so far.
    pub fn query_log(&self) -> &[QueryLogEntry] {
        &self.log
    }

    /// Takes the query log, leaving it empty.
    pub fn take_log(&mut self) -> Vec<QueryLogEntry> {
        std::mem::take(&mut self.log)
    }

    /// Drops every temporary relation created so far.
    pub fn cleanup(&mut self) {
        for name in self.temporaries.drain(..) {
            if let Err(err) = self.engine.drop_temporary_relation(&name) {
                warn!(relation = %name, error = %err, "query.execute.drop_failed");
            }
        }
    }

    fn execute(&mut self, ctx: &mut CompilationContext<'_>, id: PlanNodeId) -> Result<()> {
        match ctx.node(id).kind {
            PlanKind::Table => self.execute_table(ctx, id),
            PlanKind::Conjunction => self.execute_conjunction(ctx, id),
            PlanKind::Disjunction => self.execute_disjunction(ctx, id),
            PlanKind::ClassHierarchy | PlanKind::PropertyHierarchy => {
                self.execute_hierarchy(ctx, id)
            }
            PlanKind::Value => Ok(()),
        }
    }

    /// Folds every component into this node's FROM and WHERE text.
    fn execute_table(&mut self, ctx: &mut CompilationContext<'_>, id: PlanNodeId) -> Result<()> {
        let components = std::mem::take(&mut ctx.node_mut(id).components);
        for (child, on) in components {
            self.execute(ctx, child)?;
            let sub = ctx.node(child).clone();
            let node = ctx.node_mut(id);
            match (&sub.table, &sub.join_field) {
                (Some(table), JoinField::Column(column)) => {
                    node.from
                        .push_str(&format!(" INNER JOIN {table} AS {} ON {on}={column}", sub.alias));
                }
                (_, JoinField::Values(ids)) if !ids.is_empty() => {
                    node.add_condition(&membership(&on, ids));
                }
                _ => {
                    debug!(alias = %node.alias, component = %sub.alias, "query.execute.empty_component");
                    node.make_empty();
                    return Ok(());
                }
            }
            if !sub.where_clause.is_empty() {
                node.add_condition(&format!("({})", sub.where_clause));
            }
            node.from.push_str(&sub.from);
        }
        Ok(())
    }

    /// Picks a component with a table as anchor and joins every other
    /// component onto it.
    fn execute_conjunction(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        id: PlanNodeId,
    ) -> Result<()> {
        let components: Vec<PlanNodeId> = std::mem::take(&mut ctx.node_mut(id).components)
            .into_keys()
            .collect();
        let sort_fields = ctx.node(id).sort_fields.clone();
        let (mut ordered, values): (Vec<_>, Vec<_>) = components
            .into_iter()
            .partition(|child| ctx.node(*child).kind != PlanKind::Value);
        ordered.extend(values);

        let mut anchor = None;
        let mut others = Vec::new();
        for child in ordered {
            if anchor.is_some() {
                others.push(child);
                continue;
            }
            self.execute(ctx, child)?;
            let node = ctx.node(child);
            if node.is_empty_result() {
                ctx.node_mut(id).make_empty();
                return Ok(());
            }
            if node.table.is_some() {
                anchor = Some(child);
            } else {
                others.push(child);
            }
        }

        let Some(anchor) = anchor else {
            let mut common: Option<BTreeSet<EntityId>> = None;
            for child in others {
                if let JoinField::Values(ids) = &ctx.node(child).join_field {
                    let ids: BTreeSet<EntityId> = ids.iter().copied().collect();
                    common = Some(match common {
                        Some(acc) => acc.intersection(&ids).copied().collect(),
                        None => ids,
                    });
                }
            }
            let node = ctx.node_mut(id);
            node.make_empty();
            node.join_field = JoinField::Values(common.unwrap_or_default().into_iter().collect());
            return Ok(());
        };

        let anchor_column = match &ctx.node(anchor).join_field {
            JoinField::Column(column) => column.clone(),
            JoinField::Values(_) => String::new(),
        };
        {
            let node = ctx.node_mut(anchor);
            node.kind = PlanKind::Table;
            for child in others {
                node.components.insert(child, anchor_column.clone());
            }
        }
        self.execute_table(ctx, anchor)?;
        ctx.replace_with(id, anchor);
        let node = ctx.node_mut(id);
        for (key, field) in sort_fields {
            node.sort_fields.entry(key).or_insert(field);
        }
        Ok(())
    }

    /// Collects the ids of every component into a temporary relation.
    fn execute_disjunction(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        id: PlanNodeId,
    ) -> Result<()> {
        let components: Vec<PlanNodeId> = std::mem::take(&mut ctx.node_mut(id).components)
            .into_keys()
            .collect();
        let alias = ctx.node(id).alias.clone();
        let dialect = self.engine.dialect();
        if !self.dry_run {
            self.engine.create_temporary_id_relation(&alias)?;
            self.temporaries.push(alias.clone());
        }
        let mut statements = Vec::new();
        for child in components {
            self.execute(ctx, child)?;
            let sub = ctx.node(child);
            let body = match (&sub.table, &sub.join_field) {
                (Some(table), JoinField::Column(column)) => {
                    let mut body = format!("(id) SELECT {column} FROM {table} AS {}{}", sub.alias, sub.from);
                    if !sub.where_clause.is_empty() {
                        body.push_str(" WHERE ");
                        body.push_str(&sub.where_clause);
                    }
                    body
                }
                (_, JoinField::Values(ids)) if !ids.is_empty() => {
                    format!("(id) VALUES {}", value_rows(ids))
                }
                _ => continue,
            };
            let sql = dialect.insert_ignore(&alias, &body);
            if !self.dry_run {
                self.engine.insert(&sql, &[])?;
            }
            statements.push(sql);
        }
        debug!(alias = %alias, branches = statements.len(), "query.execute.disjunction");
        self.log.push(QueryLogEntry {
            alias: alias.clone(),
            statements,
        });
        let node = ctx.node_mut(id);
        node.kind = PlanKind::Table;
        node.join_field = JoinField::Column(node.column("id"));
        node.table = Some(alias);
        node.from.clear();
        node.where_clause.clear();
        node.sort_fields.clear();
        Ok(())
    }

    /// Replaces seed ids by their closure.
    fn execute_hierarchy(&mut self, ctx: &mut CompilationContext<'_>, id: PlanNodeId) -> Result<()> {
        let node = ctx.node(id);
        let JoinField::Values(seeds) = &node.join_field else {
            return Ok(());
        };
        let seeds = seeds.clone();
        let alias = node.alias.clone();
        let (edge_key, depth) = match node.kind {
            PlanKind::ClassHierarchy if self.config.category_hierarchy => {
                (SUBCATEGORY_OF, self.config.subcategory_depth)
            }
            PlanKind::ClassHierarchy => (SUBCATEGORY_OF, 0),
            _ => (SUBPROPERTY_OF, self.config.subproperty_depth),
        };
        let closure = match self.registry.table_for(&PropertyRef::new(edge_key)) {
            Some(table) => {
                let edges = EdgeRelation::from_descriptor(&table);
                let resolver = HierarchyResolver::new(self.engine, self.hierarchy_cache, self.dry_run);
                let mut statements = Vec::new();
                let closure = resolver.resolve(&edges, depth, &seeds, &alias, &mut statements)?;
                if !statements.is_empty() {
                    self.log.push(QueryLogEntry {
                        alias: alias.clone(),
                        statements,
                    });
                }
                closure
            }
            None => Closure::Values(seeds),
        };
        let node = ctx.node_mut(id);
        match closure {
            Closure::Values(ids) => {
                node.kind = PlanKind::Value;
                node.join_field = JoinField::Values(ids);
            }
            Closure::Relation { name, temporary } => {
                if temporary && !self.dry_run {
                    self.temporaries.push(name.clone());
                }
                node.kind = PlanKind::Table;
                node.table = Some(name);
                node.join_field = JoinField::Column(node.column("id"));
            }
        }
        Ok(())
    }
}

impl Drop for Executor<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Condition requiring `column` to be one of `ids`.
fn membership(column: &str, ids: &[EntityId]) -> String {
    match ids {
        [single] => format!("{column}={single}"),
        _ => format!("{column} IN ({})", id_list(ids)),
    }
}
