//! Transitive closure of subcategory and subproperty edges.
//!
//! A closure is computed breadth-first inside the engine: a frontier
//! relation holds the ids discovered in the previous round and each round
//! joins it against the edge table. Results are cached per store under a
//! content-addressed relation name, so equal seed sets at equal depth are
//! only expanded once.
//!
//! Cached closures are not refreshed when edges change. Callers that modify
//! hierarchy edges must call [`HierarchyCache::invalidate`].

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};
use xxhash_rust::xxh64::xxh64;

use crate::query::engine::SqlEngine;
use crate::query::metadata::{FieldKind, TableDescriptor};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::types::{EntityId, Result};

/// Edge relation whose `subject` column points below its `object` column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EdgeRelation {
    /// Table name.
    pub table: String,
    /// Column holding the child id.
    pub subject: String,
    /// Column holding the parent id.
    pub object: String,
}

impl EdgeRelation {
    /// Edge relation stored in a fixed property table.
    pub fn from_descriptor(table: &TableDescriptor) -> Self {
        Self {
            table: table.name.clone(),
            subject: "s_id".to_owned(),
            object: table
                .field_of_kind(FieldKind::EntityRef)
                .unwrap_or("o_id")
                .to_owned(),
        }
    }
}

/// Where the closure of a seed set can be read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Closure {
    /// The closure is the seed set itself.
    Values(Vec<EntityId>),
    /// The closure is stored in a relation with an `id` column.
    Relation {
        /// Relation name.
        name: String,
        /// Whether the relation belongs to the current query and must be
        /// dropped when it finishes.
        temporary: bool,
    },
}

/// Closure relations already computed by a store.
#[derive(Default)]
pub struct HierarchyCache {
    relations: Mutex<FxHashMap<String, String>>,
}

impl HierarchyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical cache key of a closure request. Seed order does not matter.
    pub fn key(edges: &EdgeRelation, depth: u32, seeds: &[EntityId]) -> String {
        let mut sorted = seeds.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        format!("{}|{}|{}", edges.table, depth, id_list(&sorted))
    }

    /// Relation name under which the closure for `key` is stored.
    pub fn relation_name(key: &str) -> String {
        format!("hier_{:016x}", xxh64(key.as_bytes(), 0))
    }

    /// Cached relation for `key`, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        self.relations.lock().get(key).cloned()
    }

    fn insert(&self, key: String, relation: String) {
        self.relations.lock().insert(key, relation);
    }

    /// Number of cached closures.
    pub fn len(&self) -> usize {
        self.relations.lock().len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.relations.lock().is_empty()
    }

    /// Forgets every cached closure and drops its relation. Returns the
    /// number of relations dropped.
    pub fn invalidate(&self, engine: &dyn SqlEngine) -> Result<usize> {
        let drained: Vec<String> = self.relations.lock().drain().map(|(_, name)| name).collect();
        let mut first_error = None;
        for name in &drained {
            if let Err(err) = engine.drop_temporary_relation(name) {
                warn!(relation = %name, error = %err, "query.hierarchy.invalidate_failed");
                first_error.get_or_insert(err);
            }
        }
        debug!(dropped = drained.len(), "query.hierarchy.invalidated");
        match first_error {
            Some(err) => Err(err),
            None => Ok(drained.len()),
        }
    }
}

/// Computes closures for one query.
pub struct HierarchyResolver<'a> {
    engine: &'a dyn SqlEngine,
    cache: &'a HierarchyCache,
    dry_run: bool,
}

impl<'a> HierarchyResolver<'a> {
    /// Creates a resolver. In dry-run mode statements are only logged.
    pub fn new(engine: &'a dyn SqlEngine, cache: &'a HierarchyCache, dry_run: bool) -> Self {
        Self {
            engine,
            cache,
            dry_run,
        }
    }

    /// Resolves the closure of `seeds` up to `depth` edges below them.
    /// `alias` names the per-query relation used when a cached closure is
    /// copied, and prefixes the scratch relations. Statements that were (or,
    /// in dry-run mode, would be) executed are appended to `log`.
    pub fn resolve(
        &self,
        edges: &EdgeRelation,
        depth: u32,
        seeds: &[EntityId],
        alias: &str,
        log: &mut Vec<String>,
    ) -> Result<Closure> {
        let start = profile_timer();
        let result = self.resolve_inner(edges, depth, seeds, alias, log);
        record_profile_timer(QueryProfileKind::Hierarchy, start);
        result
    }

    fn resolve_inner(
        &self,
        edges: &EdgeRelation,
        depth: u32,
        seeds: &[EntityId],
        alias: &str,
        log: &mut Vec<String>,
    ) -> Result<Closure> {
        if depth == 0 || seeds.is_empty() {
            return Ok(Closure::Values(seeds.to_vec()));
        }
        let probe = format!(
            "SELECT {} FROM {} WHERE {} IN ({}) LIMIT 1",
            edges.subject,
            edges.table,
            edges.object,
            id_list(seeds)
        );
        if self.engine.select(&probe, &[])?.is_empty() {
            debug!(table = %edges.table, seeds = seeds.len(), "query.hierarchy.no_children");
            return Ok(Closure::Values(seeds.to_vec()));
        }

        let key = HierarchyCache::key(edges, depth, seeds);
        if let Some(cached) = self.cache.get(&key) {
            let copy = format!("INSERT INTO {alias} (id) SELECT id FROM {cached}");
            log.push(format!("Copied hierarchy for element(s) {} from {cached}.", value_rows(seeds)));
            log.push(copy.clone());
            if !self.dry_run {
                self.engine.create_temporary_id_relation(alias)?;
                self.engine.insert(&copy, &[])?;
            }
            debug!(relation = %cached, alias, "query.hierarchy.cache_hit");
            return Ok(Closure::Relation {
                name: alias.to_owned(),
                temporary: true,
            });
        }

        let relation = HierarchyCache::relation_name(&key);
        log.push(format!(
            "Recursively computed hierarchy for element(s) {}.",
            value_rows(seeds)
        ));
        if self.dry_run {
            return Ok(Closure::Relation {
                name: relation,
                temporary: false,
            });
        }

        let frontier = format!("{alias}_new");
        let found = format!("{alias}_res");
        let outcome = self.expand(edges, depth, seeds, &relation, frontier.clone(), found.clone(), log);
        for scratch in [&frontier, &found] {
            if let Err(err) = self.engine.drop_temporary_relation(scratch) {
                warn!(relation = %scratch, error = %err, "query.hierarchy.drop_failed");
            }
        }
        let rounds = outcome?;
        debug!(relation = %relation, depth, rounds, "query.hierarchy.computed");
        self.cache.insert(key, relation.clone());
        Ok(Closure::Relation {
            name: relation,
            temporary: false,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        edges: &EdgeRelation,
        depth: u32,
        seeds: &[EntityId],
        relation: &str,
        mut frontier: String,
        mut found: String,
        log: &mut Vec<String>,
    ) -> Result<u32> {
        let dialect = self.engine.dialect();
        self.engine.create_temporary_id_relation(relation)?;
        self.engine.truncate_relation(relation)?;
        self.engine.create_temporary_id_relation(&frontier)?;
        self.engine.create_temporary_id_relation(&found)?;

        let seed_rows = format!("(id) VALUES {}", value_rows(seeds));
        for target in [relation, frontier.as_str()] {
            let sql = dialect.insert_ignore(target, &seed_rows);
            self.engine.insert(&sql, &[])?;
            log.push(sql);
        }

        let mut rounds = 0;
        while rounds < depth {
            rounds += 1;
            let step = dialect.insert_ignore(
                &found,
                &format!(
                    "(id) SELECT {table}.{subject} FROM {table} INNER JOIN {frontier} ON {table}.{object}={frontier}.id",
                    table = edges.table,
                    subject = edges.subject,
                    object = edges.object,
                ),
            );
            let reached = self.engine.insert(&step, &[])?;
            log.push(step);
            if reached == 0 {
                break;
            }
            let merge = dialect.insert_ignore(relation, &format!("(id) SELECT id FROM {found}"));
            let added = self.engine.insert(&merge, &[])?;
            log.push(merge);
            if added == 0 {
                break;
            }
            self.engine.truncate_relation(&frontier)?;
            std::mem::swap(&mut frontier, &mut found);
        }
        Ok(rounds)
    }
}

/// Comma separated ids, e.g. `3,7`.
pub(crate) fn id_list(ids: &[EntityId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// VALUES rows, e.g. `(3),(7)`.
pub(crate) fn value_rows(ids: &[EntityId]) -> String {
    ids.iter()
        .map(|id| format!("({id})"))
        .collect::<Vec<_>>()
        .join(",")
}
