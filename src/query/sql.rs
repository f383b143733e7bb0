//! Collaborators that read identifiers and concepts from the store's own
//! tables through a [`SqlEngine`].

use std::sync::Arc;

use crate::query::description::QueryFeatures;
use crate::query::engine::{SqlEngine, SqlRow, SqlValue};
use crate::query::metadata::{
    ConceptDefinition, ConceptStore, EntityRecord, IdResolver, StoreLayout,
};
use crate::query::value::EntityRef;
use crate::types::{AskError, EntityId, Result};

/// Resolves ids through the `ids` table and redirects through `redirects`.
pub struct SqlIdResolver {
    engine: Arc<dyn SqlEngine>,
    ids_table: String,
    redirects_table: String,
}

impl SqlIdResolver {
    /// Creates a resolver over the given layout.
    pub fn new(engine: Arc<dyn SqlEngine>, layout: &StoreLayout) -> Self {
        Self {
            engine,
            ids_table: layout.ids_table.clone(),
            redirects_table: "redirects".to_owned(),
        }
    }

    fn redirect_target(&self, entity: &EntityRef) -> Result<Option<EntityId>> {
        let sql = format!(
            "SELECT target_id FROM {} WHERE title=?1 AND namespace=?2 LIMIT 1",
            self.redirects_table
        );
        let rows = self.engine.select(
            &sql,
            &[entity.title.as_str().into(), i64::from(entity.namespace).into()],
        )?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_i64)
            .map(|id| EntityId(id as u64)))
    }
}

impl IdResolver for SqlIdResolver {
    fn resolve(&self, entity: &EntityRef, canonical: bool) -> Result<EntityId> {
        if canonical && entity.interwiki.is_empty() {
            if let Some(target) = self.redirect_target(entity)? {
                return Ok(target);
            }
        }
        let sql = format!(
            "SELECT id FROM {} WHERE title=?1 AND namespace=?2 AND interwiki=?3 LIMIT 1",
            self.ids_table
        );
        let rows = self.engine.select(
            &sql,
            &[
                entity.title.as_str().into(),
                i64::from(entity.namespace).into(),
                entity.interwiki.as_str().into(),
            ],
        )?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(SqlValue::as_i64)
            .map(|id| EntityId(id as u64))
            .unwrap_or(EntityId::NONE))
    }

    fn reverse_lookup(&self, id: EntityId) -> Result<Option<EntityRecord>> {
        let sql = format!(
            "SELECT id, title, namespace, interwiki, sortkey FROM {} WHERE id=?1",
            self.ids_table
        );
        let rows = self.engine.select(&sql, &[id.0.into()])?;
        rows.first().map(entity_record).transpose()
    }
}

/// Reads concept definitions from the `concepts` table.
pub struct SqlConceptStore {
    engine: Arc<dyn SqlEngine>,
    table: String,
}

impl SqlConceptStore {
    /// Creates a store reading the `concepts` table.
    pub fn new(engine: Arc<dyn SqlEngine>) -> Self {
        Self {
            engine,
            table: "concepts".to_owned(),
        }
    }
}

impl ConceptStore for SqlConceptStore {
    fn concept_definition(&self, concept: EntityId) -> Result<Option<ConceptDefinition>> {
        let sql = format!(
            "SELECT concept_txt, concept_features, concept_size, concept_depth, cache_date, cache_count \
             FROM {} WHERE s_id=?1",
            self.table
        );
        let rows = self.engine.select(&sql, &[concept.0.into()])?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let column = |idx: usize| row.get(idx).cloned().unwrap_or(SqlValue::Null);
        Ok(Some(ConceptDefinition {
            text: column(0).as_text().unwrap_or_default(),
            features: QueryFeatures(column(1).as_i64().unwrap_or(0) as u32),
            size: column(2).as_i64().unwrap_or(0),
            depth: column(3).as_i64().unwrap_or(0),
            cache_date: column(4).as_i64(),
            cache_count: column(5).as_i64().map(|count| count as u64),
        }))
    }
}

/// Decodes an `(id, title, namespace, interwiki, sortkey)` row.
pub(crate) fn entity_record(row: &SqlRow) -> Result<EntityRecord> {
    let malformed = || AskError::Engine("malformed entity row".to_owned());
    let id = row.first().and_then(SqlValue::as_i64).ok_or_else(malformed)?;
    let title = row.get(1).and_then(SqlValue::as_text).ok_or_else(malformed)?;
    let namespace = row.get(2).and_then(SqlValue::as_i64).ok_or_else(malformed)?;
    let interwiki = row.get(3).and_then(SqlValue::as_text).unwrap_or_default();
    let sortkey = row.get(4).and_then(SqlValue::as_text).unwrap_or_default();
    Ok(EntityRecord {
        id: EntityId(id as u64),
        entity: EntityRef {
            title,
            namespace: namespace as i32,
            interwiki,
        },
        sortkey,
    })
}
