//! Translates descriptions into plan nodes.
//!
//! Compilation never touches data tables. It only consults the id resolver,
//! the property-table registry and the concept store, and records sort
//! fields for the keys a query wants to order by.

use std::collections::BTreeMap;

use tracing::debug;

use crate::query::config::{ConceptCaching, QueryConfig};
use crate::query::description::{Description, DescriptionKind};
use crate::query::engine::SqlValue;
use crate::query::errors::QueryIssue;
use crate::query::metadata::{
    ConceptDefinition, ConceptStore, DescriptionParser, FieldKind, IdResolver,
    PropertyTableRegistry, StoreLayout, SubjectKind, TableDescriptor, INSTANCE_OF,
};
use crate::query::plan::{CompilationContext, JoinField, PlanKind, PlanNodeId};
use crate::query::profile::{profile_timer, record_profile_timer, QueryProfileKind};
use crate::query::value::{like_pattern, Comparator, DataItem, EntityRef, PropertyRef};
use crate::types::{EntityId, Result};

const SUBJECT_COLUMN: &str = "s_id";
const PROPERTY_COLUMN: &str = "p_id";
const OBJECT_COLUMN: &str = "o_id";

/// Outcome of compiling one description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compiled {
    /// The description is represented by this node.
    Node(PlanNodeId),
    /// The description matches every entity; no node is needed.
    Unconstrained,
    /// No storage could represent the description.
    Failed(String),
}

/// Lookup services the compiler consults.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// Title to id resolution.
    pub ids: &'a dyn IdResolver,
    /// Property storage tables.
    pub registry: &'a dyn PropertyTableRegistry,
    /// Concept definitions.
    pub concepts: &'a dyn ConceptStore,
    /// Decoder for stored concept definitions.
    pub parser: &'a dyn DescriptionParser,
}

/// Builds plan nodes for one query.
pub struct Compiler<'a> {
    services: Collaborators<'a>,
    config: &'a QueryConfig,
    layout: &'a StoreLayout,
    sort_keys: Vec<String>,
    now: i64,
    issues: Vec<QueryIssue>,
    concept_stack: Vec<EntityId>,
}

impl<'a> Compiler<'a> {
    /// Creates a compiler. `now` is the current unix time, used to judge
    /// concept cache freshness.
    pub fn new(
        services: Collaborators<'a>,
        config: &'a QueryConfig,
        layout: &'a StoreLayout,
        now: i64,
    ) -> Self {
        Self {
            services,
            config,
            layout,
            sort_keys: Vec::new(),
            now,
            issues: Vec::new(),
            concept_stack: Vec::new(),
        }
    }

    /// Property keys the query orders by; the empty key is the entity's own
    /// sort key.
    pub fn with_sort_keys(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.sort_keys = keys.into_iter().collect();
        self
    }

    /// Issues recorded so far, leaving the compiler's list empty.
    pub fn take_issues(&mut self) -> Vec<QueryIssue> {
        std::mem::take(&mut self.issues)
    }

    /// Compiles a top-level description into a root node over the ids table
    /// that carries every requested sort field it can.
    pub fn compile_query(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        description: &Description,
    ) -> Result<PlanNodeId> {
        let start = profile_timer();
        let compiled = self.compile(ctx, description)?;
        let inner = match compiled {
            Compiled::Node(id) => Some(id),
            Compiled::Unconstrained => None,
            Compiled::Failed(reason) => {
                debug!(reason = %reason, "query.compile.unsatisfiable");
                self.issues.push(QueryIssue::Unsatisfiable { reason });
                Some(ctx.add_empty())
            }
        };
        let root = self.wrap_root(ctx, inner);
        if self.config.sorting_support {
            self.apply_order_conditions(ctx, root)?;
        }
        debug!(nodes = ctx.len(), root = %ctx.node(root).alias, "query.compile.done");
        record_profile_timer(QueryProfileKind::Compile, start);
        Ok(root)
    }

    /// Anchors the plan on the id table and hides internal entities, whose
    /// interwiki marker starts with `:`.
    fn wrap_root(&self, ctx: &mut CompilationContext<'_>, inner: Option<PlanNodeId>) -> PlanNodeId {
        let ids_table = self.layout.ids_table.as_str();
        let root = match inner {
            Some(id) if ctx.node(id).table.as_deref() == Some(ids_table) => id,
            None => ctx.add_table(ids_table, "id"),
            Some(id) => {
                let root = ctx.add_table(ids_table, "id");
                let sort_fields = ctx.node(id).sort_fields.clone();
                let node = ctx.node_mut(root);
                let on = node.column("id");
                node.components.insert(id, on);
                node.sort_fields = sort_fields;
                root
            }
        };
        let node = ctx.node_mut(root);
        let condition = format!("{} NOT LIKE ':%'", node.column("interwiki"));
        node.add_condition(&condition);
        root
    }

    /// Makes sure every requested sort key has a column on the root node.
    /// Missing property keys get an extra inner-joined property restriction.
    fn apply_order_conditions(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        root: PlanNodeId,
    ) -> Result<()> {
        let missing: Vec<String> = self
            .sort_keys
            .iter()
            .filter(|key| !ctx.node(root).sort_fields.contains_key(*key))
            .cloned()
            .collect();
        for key in missing {
            if key.is_empty() {
                let node = ctx.node_mut(root);
                let field = node.column("sortkey");
                node.sort_fields.insert(key, field);
                continue;
            }
            let extra = Description::some_property(PropertyRef::new(key.as_str()), Description::thing());
            match self.compile(ctx, &extra)? {
                Compiled::Node(id) => {
                    let fields = ctx.node(id).sort_fields.clone();
                    let node = ctx.node_mut(root);
                    let on = node.column("id");
                    node.components.insert(id, on);
                    for (k, v) in fields {
                        node.sort_fields.entry(k).or_insert(v);
                    }
                }
                Compiled::Unconstrained | Compiled::Failed(_) => {
                    debug!(key = %key, "query.compile.sort_key_unavailable");
                }
            }
        }
        Ok(())
    }

    /// Compiles one description.
    pub fn compile(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        description: &Description,
    ) -> Result<Compiled> {
        match &description.kind {
            DescriptionKind::Thing => Ok(Compiled::Unconstrained),
            DescriptionKind::Namespace { namespace } => {
                let id = ctx.add_table(&self.layout.ids_table, "id");
                let node = ctx.node_mut(id);
                let condition = format!("{}={}", node.column("namespace"), namespace);
                node.add_condition(&condition);
                Ok(Compiled::Node(id))
            }
            DescriptionKind::Class { categories } => self.compile_class(ctx, categories),
            DescriptionKind::Concept { concept } => self.compile_concept(ctx, concept),
            DescriptionKind::Value { item, comparator } => {
                self.compile_page_value(ctx, item, *comparator)
            }
            DescriptionKind::Conjunction { children } => {
                self.compile_connective(ctx, children, PlanKind::Conjunction)
            }
            DescriptionKind::Disjunction { children } => {
                self.compile_connective(ctx, children, PlanKind::Disjunction)
            }
            DescriptionKind::SomeProperty {
                property,
                description,
            } => self.compile_some_property(ctx, property, description),
            DescriptionKind::ValueList { .. } => {
                debug!("query.compile.value_list_outside_property");
                Ok(Compiled::Unconstrained)
            }
        }
    }

    fn compile_connective(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        children: &[Description],
        kind: PlanKind,
    ) -> Result<Compiled> {
        let mut parts = Vec::new();
        let mut failures = Vec::new();
        for child in children {
            match self.compile(ctx, child)? {
                Compiled::Node(id) => parts.push(id),
                Compiled::Unconstrained if kind == PlanKind::Disjunction => {
                    return Ok(Compiled::Unconstrained);
                }
                Compiled::Unconstrained => {}
                Compiled::Failed(reason) => {
                    debug!(reason = %reason, "query.compile.branch_dropped");
                    failures.push(reason);
                }
            }
        }
        match parts.len() {
            0 if failures.is_empty() => Ok(Compiled::Unconstrained),
            0 => Ok(Compiled::Failed(failures.join("; "))),
            1 => Ok(Compiled::Node(parts[0])),
            _ => {
                let mut sort_fields = BTreeMap::new();
                if kind != PlanKind::Disjunction {
                    for part in &parts {
                        for (key, field) in &ctx.node(*part).sort_fields {
                            sort_fields.entry(key.clone()).or_insert_with(|| field.clone());
                        }
                    }
                }
                let id = ctx.add(kind);
                let node = ctx.node_mut(id);
                node.components = parts.into_iter().map(|part| (part, String::new())).collect();
                node.sort_fields = sort_fields;
                Ok(Compiled::Node(id))
            }
        }
    }

    fn compile_class(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        categories: &[EntityRef],
    ) -> Result<Compiled> {
        let mut seeds = Vec::new();
        for category in categories {
            let id = self.services.ids.resolve(category, true)?;
            if id.is_known() && !seeds.contains(&id) {
                seeds.push(id);
            }
        }
        if seeds.is_empty() {
            return Ok(Compiled::Node(ctx.add_empty()));
        }
        let Some(table) = self.services.registry.table_for(&PropertyRef::new(INSTANCE_OF)) else {
            return Ok(Compiled::Failed("no table stores category membership".to_owned()));
        };
        let object = table
            .field_of_kind(FieldKind::EntityRef)
            .unwrap_or(OBJECT_COLUMN)
            .to_owned();
        let id = ctx.add_table(&table.name, SUBJECT_COLUMN);
        let hierarchy = ctx.add(PlanKind::ClassHierarchy);
        ctx.node_mut(hierarchy).join_field = JoinField::Values(seeds);
        let node = ctx.node_mut(id);
        let on = node.column(&object);
        node.components.insert(hierarchy, on);
        Ok(Compiled::Node(id))
    }

    fn compile_page_value(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        item: &DataItem,
        comparator: Comparator,
    ) -> Result<Compiled> {
        let DataItem::Page(page) = item else {
            return Ok(Compiled::Failed(format!(
                "value '{}' is not attached to a property",
                item.serialization()
            )));
        };
        if comparator == Comparator::Eq {
            let id = self.services.ids.resolve(page, self.config.equality_support)?;
            let ids = if id.is_known() { vec![id] } else { Vec::new() };
            return Ok(Compiled::Node(ctx.add_values(ids)));
        }
        let id = ctx.add_table(&self.layout.ids_table, "id");
        let column = ctx.node(id).column("sortkey");
        let condition = self.comparison(&column, comparator, SqlValue::Text(page.sort_key()));
        ctx.node_mut(id).add_condition(&condition);
        Ok(Compiled::Node(id))
    }

    fn compile_some_property(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        property: &PropertyRef,
        sub: &Description,
    ) -> Result<Compiled> {
        let registry = self.services.registry;
        let table = registry
            .table_for(property)
            .or_else(|| value_type(sub).and_then(|type_id| registry.table_for_type(type_id)));
        let Some(table) = table else {
            return Ok(Compiled::Failed(format!(
                "property '{}' has no storage table",
                property.label()
            )));
        };
        if table.subject_kind != SubjectKind::EntityId {
            return Ok(Compiled::Failed(format!(
                "table '{}' is not keyed by entity id",
                table.name
            )));
        }
        let object = table.field_of_kind(FieldKind::EntityRef).map(str::to_owned);
        if property.inverse && object.is_none() {
            return Ok(Compiled::Failed(format!(
                "property '{}' has no entity values to invert",
                property.key
            )));
        }
        let (subject, object) = match (&object, property.inverse) {
            (Some(object), true) => (object.clone(), Some(SUBJECT_COLUMN.to_owned())),
            (object, _) => (SUBJECT_COLUMN.to_owned(), object.clone()),
        };

        let id = ctx.add_table(&table.name, &subject);
        if table.has_property_column {
            let pid = self.services.ids.resolve(&property.entity(), true)?;
            if !pid.is_known() {
                debug!(property = %property.key, "query.compile.unknown_property");
                ctx.node_mut(id).make_empty();
                return Ok(Compiled::Node(id));
            }
            let hierarchy = ctx.add(PlanKind::PropertyHierarchy);
            ctx.node_mut(hierarchy).join_field = JoinField::Values(vec![pid]);
            let node = ctx.node_mut(id);
            let on = node.column(PROPERTY_COLUMN);
            node.components.insert(hierarchy, on);
        }

        let sort_requested = !property.inverse && self.sort_keys.contains(&property.key);
        match object {
            Some(object) => {
                match self.compile(ctx, sub)? {
                    Compiled::Node(child) => {
                        let node = ctx.node_mut(id);
                        let on = node.column(&object);
                        node.components.insert(child, on);
                    }
                    Compiled::Unconstrained => {}
                    Compiled::Failed(reason) => {
                        debug!(reason = %reason, "query.compile.branch_dropped");
                        ctx.node_mut(id).make_empty();
                        return Ok(Compiled::Node(id));
                    }
                }
                if sort_requested {
                    let ids_table = &self.layout.ids_table;
                    let node = ctx.node_mut(id);
                    let sort_alias = format!("ids{}", node.alias);
                    let join = format!(
                        " INNER JOIN {ids_table} AS {sort_alias} ON {sort_alias}.id={}",
                        node.column(&object)
                    );
                    node.from.push_str(&join);
                    node.sort_fields
                        .insert(property.key.clone(), format!("{sort_alias}.sortkey"));
                }
            }
            None => {
                let alias = ctx.node(id).alias.clone();
                match self.value_condition(sub, &table, &alias) {
                    Ok(Some(condition)) => ctx.node_mut(id).add_condition(&condition),
                    Ok(None) => {}
                    Err(reason) => {
                        debug!(reason = %reason, "query.compile.branch_dropped");
                        ctx.node_mut(id).make_empty();
                        return Ok(Compiled::Node(id));
                    }
                }
                if sort_requested {
                    if let Some(field) = table.sort_field() {
                        let node = ctx.node_mut(id);
                        let column = node.column(field);
                        node.sort_fields.insert(property.key.clone(), column);
                    }
                }
            }
        }
        Ok(Compiled::Node(id))
    }

    /// WHERE text restricting the value columns of `table`. `Err` means the
    /// description cannot be expressed over this table.
    fn value_condition(
        &self,
        description: &Description,
        table: &TableDescriptor,
        alias: &str,
    ) -> std::result::Result<Option<String>, String> {
        match &description.kind {
            DescriptionKind::Thing => Ok(None),
            DescriptionKind::Value { item, comparator } => self
                .value_comparison(item, *comparator, table, alias, None)
                .map(Some),
            DescriptionKind::Conjunction { children } => {
                let mut parts = Vec::new();
                for child in children {
                    if let Some(condition) = self.value_condition(child, table, alias)? {
                        parts.push(condition);
                    }
                }
                Ok(join_conditions(parts, " AND "))
            }
            DescriptionKind::Disjunction { children } => {
                let mut parts = Vec::new();
                let mut failure = None;
                for child in children {
                    match self.value_condition(child, table, alias) {
                        Ok(Some(condition)) => parts.push(condition),
                        Ok(None) => return Ok(None),
                        Err(reason) => failure = Some(reason),
                    }
                }
                match (parts.is_empty(), failure) {
                    (true, Some(reason)) => Err(reason),
                    _ => Ok(join_conditions(parts, " OR ")),
                }
            }
            DescriptionKind::ValueList { slots } => {
                let mut parts = Vec::new();
                for (index, slot) in slots.iter().enumerate() {
                    let Some(slot) = slot else {
                        continue;
                    };
                    let Some((field, _)) = table.fields.get(index) else {
                        return Err(format!(
                            "table '{}' has no field for slot {}",
                            table.name,
                            index + 1
                        ));
                    };
                    match &slot.kind {
                        DescriptionKind::Thing => {}
                        DescriptionKind::Value { item, comparator } => parts.push(
                            self.value_comparison(item, *comparator, table, alias, Some(field.as_str()))?,
                        ),
                        _ => return Err("value list slots hold plain values only".to_owned()),
                    }
                }
                Ok(join_conditions(parts, " AND "))
            }
            _ => Err(format!(
                "page condition '{}' on value table '{}'",
                description.query_string(true),
                table.name
            )),
        }
    }

    fn value_comparison(
        &self,
        item: &DataItem,
        comparator: Comparator,
        table: &TableDescriptor,
        alias: &str,
        field: Option<&str>,
    ) -> std::result::Result<String, String> {
        let missing = |kind: &str| format!("table '{}' has no {kind} field", table.name);
        let (field, value, unit) = match (field, item) {
            (Some(field), item) => (field.to_owned(), literal(item), None),
            (None, DataItem::Number(n)) => (
                table.field_of_kind(FieldKind::Number).ok_or_else(|| missing("number"))?.to_owned(),
                SqlValue::Real(*n),
                None,
            ),
            (None, DataItem::Quantity { value, unit }) => (
                table.field_of_kind(FieldKind::Number).ok_or_else(|| missing("number"))?.to_owned(),
                SqlValue::Real(*value),
                (!unit.is_empty()).then(|| unit.clone()),
            ),
            (None, DataItem::String(s)) => (
                table
                    .field_of_kind(FieldKind::String)
                    .or_else(|| table.field_of_kind(FieldKind::Text))
                    .ok_or_else(|| missing("string"))?
                    .to_owned(),
                SqlValue::Text(s.clone()),
                None,
            ),
            (None, DataItem::Text(s)) => (
                table
                    .field_of_kind(FieldKind::Text)
                    .or_else(|| table.field_of_kind(FieldKind::String))
                    .ok_or_else(|| missing("text"))?
                    .to_owned(),
                SqlValue::Text(s.clone()),
                None,
            ),
            (None, DataItem::Page(page)) => {
                return Err(format!(
                    "page value '{}' on value table '{}'",
                    page.prefixed_text(),
                    table.name
                ))
            }
        };
        let mut condition = self.comparison(&format!("{alias}.{field}"), comparator, value);
        if let (Some(unit), Some(unit_field)) = (unit, table.field_of_kind(FieldKind::Unit)) {
            let quoted = self.config.dialect.quote(&SqlValue::Text(unit));
            condition = format!("({condition} AND {alias}.{unit_field}={quoted})");
        }
        Ok(condition)
    }

    fn comparison(&self, column: &str, comparator: Comparator, value: SqlValue) -> String {
        let dialect = self.config.dialect;
        if comparator.is_pattern() {
            let pattern = like_pattern(&value.as_text().unwrap_or_default());
            format!(
                "{column}{}{}{}",
                comparator.sql_operator(),
                dialect.quote(&SqlValue::Text(pattern)),
                dialect.like_escape()
            )
        } else {
            format!("{column}{}{}", comparator.sql_operator(), dialect.quote(&value))
        }
    }

    fn compile_concept(
        &mut self,
        ctx: &mut CompilationContext<'_>,
        concept: &EntityRef,
    ) -> Result<Compiled> {
        let title = concept.prefixed_text();
        let cid = self.services.ids.resolve(concept, true)?;
        let definition = if cid.is_known() {
            self.services.concepts.concept_definition(cid)?
        } else {
            None
        };
        let Some(definition) = definition else {
            self.issues.push(QueryIssue::ConceptUndefined { concept: title });
            return Ok(Compiled::Node(ctx.add_empty()));
        };
        if self.concept_stack.contains(&cid) {
            self.issues.push(QueryIssue::ConceptCycle { concept: title });
            return Ok(Compiled::Node(ctx.add_empty()));
        }

        let computable = self.may_compute(&definition);
        if let Some(cache_date) = definition.cache_date {
            let lifetime = self.config.concept_cache_lifetime_minutes * 60;
            if cache_date > self.now - lifetime || !computable {
                debug!(concept = %title, cache_date, "query.compile.concept_cache");
                let id = ctx.add_table(&self.layout.concept_cache_table, SUBJECT_COLUMN);
                let node = ctx.node_mut(id);
                let condition = format!("{}={}", node.column(OBJECT_COLUMN), cid);
                node.add_condition(&condition);
                return Ok(Compiled::Node(id));
            }
        }
        if definition.text.is_empty() {
            return Ok(Compiled::Node(ctx.add_empty()));
        }
        if !computable {
            self.issues.push(QueryIssue::ConceptNotComputable { concept: title });
            return Ok(Compiled::Node(ctx.add_empty()));
        }
        let parsed = match self.services.parser.parse(&definition.text) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.issues.push(QueryIssue::ConceptInvalid {
                    concept: title,
                    message: err.to_string(),
                });
                return Ok(Compiled::Node(ctx.add_empty()));
            }
        };
        debug!(concept = %title, size = definition.size, depth = definition.depth, "query.compile.concept_expand");
        self.concept_stack.push(cid);
        let compiled = self.compile(ctx, &parsed.simplify());
        self.concept_stack.pop();
        compiled
    }

    fn may_compute(&self, definition: &ConceptDefinition) -> bool {
        match self.config.concept_caching {
            ConceptCaching::None => true,
            ConceptCaching::Hard => {
                definition
                    .features
                    .excess(self.config.concept_features)
                    .is_empty()
                    && definition.size <= self.config.concept_max_size
                    && definition.depth <= self.config.concept_max_depth
            }
            ConceptCaching::All => false,
        }
    }
}

/// Datatype of the values a property restriction talks about, used when the
/// property itself has no registered table.
fn value_type(description: &Description) -> Option<&'static str> {
    match &description.kind {
        DescriptionKind::Value { item, .. } => Some(item.type_id()),
        DescriptionKind::Conjunction { children } | DescriptionKind::Disjunction { children } => {
            children.iter().find_map(value_type)
        }
        DescriptionKind::Thing | DescriptionKind::ValueList { .. } => None,
        DescriptionKind::Class { .. }
        | DescriptionKind::Concept { .. }
        | DescriptionKind::Namespace { .. }
        | DescriptionKind::SomeProperty { .. } => Some("_wpg"),
    }
}

fn literal(item: &DataItem) -> SqlValue {
    match item {
        DataItem::Page(page) => SqlValue::Text(page.sort_key()),
        DataItem::Number(n) => SqlValue::Real(*n),
        DataItem::Quantity { value, .. } => SqlValue::Real(*value),
        DataItem::String(s) | DataItem::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn join_conditions(mut parts: Vec<String>, separator: &str) -> Option<String> {
    match parts.len() {
        0 => None,
        1 => parts.pop(),
        _ => Some(format!("({})", parts.join(separator))),
    }
}
