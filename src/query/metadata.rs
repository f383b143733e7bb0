//! Collaborators consulted while compiling a description: identifier
//! resolution, the property-table registry and the concept store.
//!
//! Property values are spread over per-datatype tables. The registry tells
//! the compiler which table backs a property and how its object columns are
//! laid out; compilation branches on [`FieldKind`] rather than on runtime
//! type inspection.

use std::collections::HashMap;

use serde::Serialize;

use crate::query::description::{Description, QueryFeatures};
use crate::query::value::{EntityRef, PropertyRef};
use crate::types::{EntityId, Result};

/// Kind of an object column in a property table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum FieldKind {
    /// Id of another entity.
    EntityRef,
    /// Long text, not suitable for sorting.
    Text,
    /// Numeric value.
    Number,
    /// Unit label of a quantity.
    Unit,
    /// Short indexable string.
    String,
}

/// How a property table stores its subjects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SubjectKind {
    /// `s_id` column referencing the ids table.
    EntityId,
    /// Subjects stored by title; cannot be joined by queries.
    Title,
}

/// Physical layout of one property table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    /// Relation name.
    pub name: String,
    /// Subject storage.
    pub subject_kind: SubjectKind,
    /// Whether rows carry a `p_id` column; fixed tables hold one property.
    pub has_property_column: bool,
    /// Ordered object columns.
    pub fields: Vec<(String, FieldKind)>,
}

impl TableDescriptor {
    /// Table with an explicit property column shared by many properties.
    pub fn shared(name: impl Into<String>, fields: &[(&str, FieldKind)]) -> Self {
        Self {
            name: name.into(),
            subject_kind: SubjectKind::EntityId,
            has_property_column: true,
            fields: fields.iter().map(|(n, k)| ((*n).to_owned(), *k)).collect(),
        }
    }

    /// Table dedicated to one property.
    pub fn fixed(name: impl Into<String>, fields: &[(&str, FieldKind)]) -> Self {
        Self {
            has_property_column: false,
            ..Self::shared(name, fields)
        }
    }

    /// First object column of the given kind.
    pub fn field_of_kind(&self, kind: FieldKind) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, k)| *k == kind)
            .map(|(name, _)| name.as_str())
    }

    /// Column used to order by this property's values.
    pub fn sort_field(&self) -> Option<&str> {
        [FieldKind::Number, FieldKind::String, FieldKind::Text]
            .into_iter()
            .find_map(|kind| self.field_of_kind(kind))
    }
}

/// Names of the fixed relations the compiler joins directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreLayout {
    /// Entity id table: `id, title, namespace, interwiki, sortkey`.
    pub ids_table: String,
    /// Concept cache table: `s_id` (member), `o_id` (concept).
    pub concept_cache_table: String,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            ids_table: "ids".to_owned(),
            concept_cache_table: "concept_cache".to_owned(),
        }
    }
}

/// Built-in property linking an entity to its categories.
pub const INSTANCE_OF: &str = "_INST";
/// Built-in property linking a category to its supercategories.
pub const SUBCATEGORY_OF: &str = "_SUBC";
/// Built-in property linking a property to its superproperties.
pub const SUBPROPERTY_OF: &str = "_SUBP";
/// Built-in redirect property (title-subject table).
pub const REDIRECTS_TO: &str = "_REDI";

/// Stored entity as returned by [`IdResolver::reverse_lookup`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityRecord {
    /// Row id.
    pub id: EntityId,
    /// Title, namespace and interwiki.
    pub entity: EntityRef,
    /// Sort key.
    pub sortkey: String,
}

/// Resolves entity titles to ids and back.
pub trait IdResolver: Send + Sync {
    /// Returns the entity's id, or [`EntityId::NONE`] if it is unknown.
    /// With `canonical` set, redirects are followed to their target.
    fn resolve(&self, entity: &EntityRef, canonical: bool) -> Result<EntityId>;
    /// Returns the stored entity for an id.
    fn reverse_lookup(&self, id: EntityId) -> Result<Option<EntityRecord>>;
}

/// Maps properties and datatypes to their storage tables.
pub trait PropertyTableRegistry: Send + Sync {
    /// Table backing a property, if its datatype is known.
    fn table_for(&self, property: &PropertyRef) -> Option<TableDescriptor>;
    /// Table storing values of a datatype.
    fn table_for_type(&self, type_id: &str) -> Option<TableDescriptor>;
}

/// Stored definition and cache metadata of a concept.
#[derive(Clone, Debug, PartialEq)]
pub struct ConceptDefinition {
    /// Serialized description.
    pub text: String,
    /// Unix time of the last cache refresh.
    pub cache_date: Option<i64>,
    /// Number of cached members, if known.
    pub cache_count: Option<u64>,
    /// Features used by the definition.
    pub features: QueryFeatures,
    /// Size of the definition.
    pub size: i64,
    /// Depth of the definition.
    pub depth: i64,
}

/// Source of concept definitions.
pub trait ConceptStore: Send + Sync {
    /// Definition of the concept with the given id.
    fn concept_definition(&self, concept: EntityId) -> Result<Option<ConceptDefinition>>;
}

/// Turns stored concept text into a description.
pub trait DescriptionParser: Send + Sync {
    /// Parses a stored definition.
    fn parse(&self, text: &str) -> Result<Description>;
}

/// Reads definitions stored as JSON-serialized descriptions.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDescriptionParser;

impl DescriptionParser for JsonDescriptionParser {
    fn parse(&self, text: &str) -> Result<Description> {
        Ok(serde_json::from_str(text)?)
    }
}

/// In-memory id resolver used for tests or prototyping.
#[derive(Default)]
pub struct InMemoryIds {
    ids: HashMap<EntityRef, EntityId>,
    records: HashMap<EntityId, EntityRecord>,
    redirects: HashMap<EntityRef, EntityId>,
}

impl InMemoryIds {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity under `id`.
    pub fn with_entity(mut self, entity: EntityRef, id: u64) -> Self {
        let id = EntityId(id);
        self.records.insert(
            id,
            EntityRecord {
                id,
                sortkey: entity.sort_key(),
                entity: entity.clone(),
            },
        );
        self.ids.insert(entity, id);
        self
    }

    /// Registers `from` as a redirect to the entity with id `to`.
    pub fn with_redirect(mut self, from: EntityRef, to: u64) -> Self {
        self.redirects.insert(from, EntityId(to));
        self
    }
}

impl IdResolver for InMemoryIds {
    fn resolve(&self, entity: &EntityRef, canonical: bool) -> Result<EntityId> {
        if canonical {
            if let Some(target) = self.redirects.get(entity) {
                return Ok(*target);
            }
        }
        Ok(self.ids.get(entity).copied().unwrap_or(EntityId::NONE))
    }

    fn reverse_lookup(&self, id: EntityId) -> Result<Option<EntityRecord>> {
        Ok(self.records.get(&id).cloned())
    }
}

/// In-memory registry keyed by property key and datatype id.
#[derive(Default, Clone)]
pub struct InMemoryRegistry {
    types: HashMap<String, TableDescriptor>,
    properties: HashMap<String, TableDescriptor>,
}

impl InMemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry for the standard table layout: one shared table per
    /// datatype family plus fixed tables for the built-in properties.
    pub fn standard() -> Self {
        let wikipage = TableDescriptor::shared("di_wikipage", &[("o_id", FieldKind::EntityRef)]);
        let number = TableDescriptor::shared(
            "di_number",
            &[("o_sortkey", FieldKind::Number), ("o_serialized", FieldKind::String)],
        );
        let quantity = TableDescriptor::shared(
            "di_quantity",
            &[("o_value", FieldKind::Number), ("o_unit", FieldKind::Unit)],
        );
        let blob = TableDescriptor::shared(
            "di_blob",
            &[("o_hash", FieldKind::String), ("o_blob", FieldKind::Text)],
        );
        let redirects = TableDescriptor {
            name: "redirects".to_owned(),
            subject_kind: SubjectKind::Title,
            has_property_column: false,
            fields: vec![("target_id".to_owned(), FieldKind::EntityRef)],
        };
        Self::new()
            .with_type("_wpg", wikipage)
            .with_type("_num", number)
            .with_type("_qty", quantity)
            .with_type("_str", blob.clone())
            .with_type("_txt", blob)
            .with_fixed_property(
                INSTANCE_OF,
                TableDescriptor::fixed("inst", &[("o_id", FieldKind::EntityRef)]),
            )
            .with_fixed_property(
                SUBCATEGORY_OF,
                TableDescriptor::fixed("subc", &[("o_id", FieldKind::EntityRef)]),
            )
            .with_fixed_property(
                SUBPROPERTY_OF,
                TableDescriptor::fixed("subp", &[("o_id", FieldKind::EntityRef)]),
            )
            .with_fixed_property(REDIRECTS_TO, redirects)
    }

    /// Registers the table for a datatype.
    pub fn with_type(mut self, type_id: impl Into<String>, table: TableDescriptor) -> Self {
        self.types.insert(type_id.into(), table);
        self
    }

    /// Declares a property's datatype; the property uses that type's table.
    pub fn with_property(mut self, key: impl Into<String>, type_id: &str) -> Self {
        let key = key.into().replace(' ', "_");
        if let Some(table) = self.types.get(type_id).cloned() {
            self.properties.insert(key, table);
        }
        self
    }

    /// Gives a property its own table.
    pub fn with_fixed_property(mut self, key: impl Into<String>, table: TableDescriptor) -> Self {
        self.properties.insert(key.into(), table);
        self
    }
}

impl PropertyTableRegistry for InMemoryRegistry {
    fn table_for(&self, property: &PropertyRef) -> Option<TableDescriptor> {
        self.properties.get(&property.key).cloned()
    }

    fn table_for_type(&self, type_id: &str) -> Option<TableDescriptor> {
        self.types.get(type_id).cloned()
    }
}

/// In-memory concept store.
#[derive(Default)]
pub struct InMemoryConcepts {
    concepts: HashMap<EntityId, ConceptDefinition>,
}

impl InMemoryConcepts {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a concept definition computed from `description`.
    pub fn with_concept(mut self, id: u64, description: &Description, cache_date: Option<i64>) -> Self {
        let model = Default::default();
        self.concepts.insert(
            EntityId(id),
            ConceptDefinition {
                text: serde_json::to_string(description).unwrap_or_default(),
                cache_date,
                cache_count: cache_date.map(|_| 0),
                features: description.query_features(),
                size: description.size(model),
                depth: description.depth(),
            },
        );
        self
    }

    /// Stores a raw definition.
    pub fn with_definition(mut self, id: u64, definition: ConceptDefinition) -> Self {
        self.concepts.insert(EntityId(id), definition);
        self
    }
}

impl ConceptStore for InMemoryConcepts {
    fn concept_definition(&self, concept: EntityId) -> Result<Option<ConceptDefinition>> {
        Ok(self.concepts.get(&concept).cloned())
    }
}
