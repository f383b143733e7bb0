//! Composable query conditions ("descriptions") with cost accounting and
//! budget-driven pruning.
//!
//! Descriptions are immutable by convention: every structural operation
//! returns a new tree, since one description may be shared by several
//! places of a compiled query. The builder functions (`conjunction`,
//! `disjunction`) apply the absorption rules eagerly:
//!
//! * nested connectives of the same kind are flattened,
//! * `Thing` is dropped from conjunctions and absorbs disjunctions,
//! * class descriptions inside one disjunction merge into a single class.
//!
//! Unary and empty connectives are only collapsed by [`Description::simplify`]
//! and by pruning.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

use crate::query::value::{namespace_prefix, Comparator, DataItem, EntityRef, PropertyRef};

/// Bitmask of the query features a description uses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryFeatures(pub u32);

impl QueryFeatures {
    /// No features.
    pub const NONE: QueryFeatures = QueryFeatures(0);
    /// Property restrictions.
    pub const PROPERTY: QueryFeatures = QueryFeatures(1);
    /// Category membership.
    pub const CATEGORY: QueryFeatures = QueryFeatures(2);
    /// Concept references.
    pub const CONCEPT: QueryFeatures = QueryFeatures(4);
    /// Namespace restrictions.
    pub const NAMESPACE: QueryFeatures = QueryFeatures(8);
    /// Conjunctions.
    pub const CONJUNCTION: QueryFeatures = QueryFeatures(16);
    /// Disjunctions.
    pub const DISJUNCTION: QueryFeatures = QueryFeatures(32);
    /// Every feature.
    pub const ALL: QueryFeatures = QueryFeatures(63);

    /// Returns true if every flag of `other` is set in `self`.
    pub fn contains(self, other: QueryFeatures) -> bool {
        self.0 & other.0 == other.0
    }

    /// Flags set in `self` but not in `allowed`.
    pub fn excess(self, allowed: QueryFeatures) -> QueryFeatures {
        QueryFeatures(self.0 & !allowed.0)
    }

    /// Whether no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the set flags.
    pub fn names(self) -> Vec<&'static str> {
        const NAMES: [(QueryFeatures, &str); 6] = [
            (QueryFeatures::PROPERTY, "property"),
            (QueryFeatures::CATEGORY, "category"),
            (QueryFeatures::CONCEPT, "concept"),
            (QueryFeatures::NAMESPACE, "namespace"),
            (QueryFeatures::CONJUNCTION, "conjunction"),
            (QueryFeatures::DISJUNCTION, "disjunction"),
        ];
        NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for QueryFeatures {
    type Output = QueryFeatures;

    fn bitor(self, rhs: Self) -> Self::Output {
        QueryFeatures(self.0 | rhs.0)
    }
}

impl BitOrAssign for QueryFeatures {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for QueryFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryFeatures({})", self.names().join("|"))
    }
}

/// Settings that change how descriptions are costed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CostModel {
    /// With category hierarchies enabled a class costs one unit no matter
    /// how many categories it lists.
    pub category_hierarchy: bool,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            category_hierarchy: true,
        }
    }
}

/// Opaque output column request carried along with a description.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrintRequest {
    /// Column label.
    pub label: String,
    /// Selector in the caller's syntax (for example `?Population`).
    pub selector: String,
}

impl PrintRequest {
    /// Builds a print request.
    pub fn new(label: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            selector: selector.into(),
        }
    }
}

/// Variant of a description node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DescriptionKind {
    /// Matches everything.
    Thing,
    /// Member of any of the listed categories.
    Class {
        /// Categories in insertion order.
        categories: Vec<EntityRef>,
    },
    /// Reference to a stored named query.
    Concept {
        /// Concept entity.
        concept: EntityRef,
    },
    /// Restriction to one namespace.
    Namespace {
        /// Namespace number.
        namespace: i32,
    },
    /// Literal value restriction.
    Value {
        /// Value compared against.
        item: DataItem,
        /// Comparison operator.
        #[serde(default)]
        comparator: Comparator,
    },
    /// All children must hold.
    Conjunction {
        /// Ordered children.
        children: Vec<Description>,
    },
    /// Any child must hold.
    Disjunction {
        /// Ordered children.
        children: Vec<Description>,
    },
    /// Some value of `property` satisfies `description`.
    SomeProperty {
        /// Restricted property.
        property: PropertyRef,
        /// Condition on the property's values.
        description: Box<Description>,
    },
    /// Positional restriction of a multi-field value; `None` is unconstrained.
    ValueList {
        /// One optional condition per field.
        slots: Vec<Option<Description>>,
    },
}

/// A query condition together with its print requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Description {
    /// Node variant.
    #[serde(flatten)]
    pub kind: DescriptionKind,
    /// Output requests; ordered, without duplicates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub print_requests: Vec<PrintRequest>,
}

impl From<DescriptionKind> for Description {
    fn from(kind: DescriptionKind) -> Self {
        Description::new(kind)
    }
}

impl Description {
    /// Wraps a kind without normalisation.
    pub fn new(kind: DescriptionKind) -> Self {
        Self {
            kind,
            print_requests: Vec::new(),
        }
    }

    /// The universal condition.
    pub fn thing() -> Self {
        Self::new(DescriptionKind::Thing)
    }

    /// Membership in any of `categories`.
    pub fn class(categories: impl IntoIterator<Item = EntityRef>) -> Self {
        let mut merged: Vec<EntityRef> = Vec::new();
        for cat in categories {
            if !merged.contains(&cat) {
                merged.push(cat);
            }
        }
        Self::new(DescriptionKind::Class { categories: merged })
    }

    /// Reference to a concept.
    pub fn concept(concept: EntityRef) -> Self {
        Self::new(DescriptionKind::Concept { concept })
    }

    /// Restriction to a namespace.
    pub fn namespace(namespace: i32) -> Self {
        Self::new(DescriptionKind::Namespace { namespace })
    }

    /// Literal value restriction.
    pub fn value(item: DataItem, comparator: Comparator) -> Self {
        Self::new(DescriptionKind::Value { item, comparator })
    }

    /// Equality restriction on a page.
    pub fn page(page: EntityRef) -> Self {
        Self::value(DataItem::Page(page), Comparator::Eq)
    }

    /// Existential property restriction.
    pub fn some_property(property: PropertyRef, description: Description) -> Self {
        Self::new(DescriptionKind::SomeProperty {
            property,
            description: Box::new(description),
        })
    }

    /// Positional multi-field restriction.
    pub fn value_list(slots: Vec<Option<Description>>) -> Self {
        Self::new(DescriptionKind::ValueList { slots })
    }

    /// Builds a conjunction, flattening nested conjunctions and dropping `Thing`.
    pub fn conjunction(children: impl IntoIterator<Item = Description>) -> Self {
        let mut result = Self::new(DescriptionKind::Conjunction {
            children: Vec::new(),
        });
        for child in children {
            result.add_conjunct(child);
        }
        result
    }

    /// Builds a disjunction, flattening nested disjunctions, merging classes and
    /// collapsing to `Thing` if any member is `Thing`.
    pub fn disjunction(children: impl IntoIterator<Item = Description>) -> Self {
        let mut result = Self::new(DescriptionKind::Disjunction {
            children: Vec::new(),
        });
        for child in children {
            result.add_disjunct(child);
        }
        result
    }

    /// Appends a print request unless an identical one is present.
    pub fn add_print_request(&mut self, request: PrintRequest) {
        if !self.print_requests.contains(&request) {
            self.print_requests.push(request);
        }
    }

    /// Builder form of [`Description::add_print_request`].
    pub fn with_print_request(mut self, request: PrintRequest) -> Self {
        self.add_print_request(request);
        self
    }

    fn absorb_print_requests(&mut self, requests: Vec<PrintRequest>) {
        for request in requests {
            self.add_print_request(request);
        }
    }

    fn add_conjunct(&mut self, mut child: Description) {
        let hoisted = std::mem::take(&mut child.print_requests);
        self.absorb_print_requests(hoisted);
        let DescriptionKind::Conjunction { children } = &mut self.kind else {
            return;
        };
        match child.kind {
            DescriptionKind::Thing => {}
            DescriptionKind::Conjunction { children: nested } => children.extend(nested),
            kind => children.push(Description::new(kind)),
        }
    }

    fn add_disjunct(&mut self, mut child: Description) {
        let hoisted = std::mem::take(&mut child.print_requests);
        self.absorb_print_requests(hoisted);
        let DescriptionKind::Disjunction { children } = &mut self.kind else {
            return;
        };
        match child.kind {
            DescriptionKind::Thing => {
                self.kind = DescriptionKind::Thing;
            }
            DescriptionKind::Disjunction { children: nested } => {
                for grandchild in nested {
                    self.add_disjunct(grandchild);
                    if self.is_thing() {
                        return;
                    }
                }
            }
            DescriptionKind::Class { categories } => {
                let existing = children.iter_mut().find_map(|c| match &mut c.kind {
                    DescriptionKind::Class { categories } => Some(categories),
                    _ => None,
                });
                match existing {
                    Some(merged) => {
                        for cat in categories {
                            if !merged.contains(&cat) {
                                merged.push(cat);
                            }
                        }
                    }
                    None => children.push(Description::new(DescriptionKind::Class { categories })),
                }
            }
            kind => children.push(Description::new(kind)),
        }
    }

    /// Whether this is the universal condition.
    pub fn is_thing(&self) -> bool {
        matches!(self.kind, DescriptionKind::Thing)
    }

    /// Number of primitive conditions.
    pub fn size(&self, model: CostModel) -> i64 {
        match &self.kind {
            DescriptionKind::Thing => 0,
            DescriptionKind::Class { categories } => {
                if model.category_hierarchy {
                    1
                } else {
                    categories.len() as i64
                }
            }
            DescriptionKind::Concept { .. }
            | DescriptionKind::Namespace { .. }
            | DescriptionKind::Value { .. } => 1,
            DescriptionKind::Conjunction { children } | DescriptionKind::Disjunction { children } => {
                children.iter().map(|c| c.size(model)).sum()
            }
            DescriptionKind::SomeProperty { description, .. } => 1 + description.size(model),
            DescriptionKind::ValueList { slots } => slots.iter().flatten().map(|c| c.size(model)).sum(),
        }
    }

    /// Property nesting depth.
    pub fn depth(&self) -> i64 {
        match &self.kind {
            DescriptionKind::Conjunction { children } | DescriptionKind::Disjunction { children } => {
                children.iter().map(Description::depth).max().unwrap_or(0)
            }
            DescriptionKind::SomeProperty { description, .. } => 1 + description.depth(),
            DescriptionKind::ValueList { slots } => {
                slots.iter().flatten().map(Description::depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }

    /// Features used by this node and all of its descendants.
    pub fn query_features(&self) -> QueryFeatures {
        match &self.kind {
            DescriptionKind::Thing | DescriptionKind::Value { .. } => QueryFeatures::NONE,
            DescriptionKind::Class { .. } => QueryFeatures::CATEGORY,
            DescriptionKind::Concept { .. } => QueryFeatures::CONCEPT,
            DescriptionKind::Namespace { .. } => QueryFeatures::NAMESPACE,
            DescriptionKind::Conjunction { children } => children
                .iter()
                .fold(QueryFeatures::CONJUNCTION, |acc, c| acc | c.query_features()),
            DescriptionKind::Disjunction { children } => children
                .iter()
                .fold(QueryFeatures::DISJUNCTION, |acc, c| acc | c.query_features()),
            DescriptionKind::SomeProperty { description, .. } => {
                QueryFeatures::PROPERTY | description.query_features()
            }
            DescriptionKind::ValueList { slots } => slots
                .iter()
                .flatten()
                .fold(QueryFeatures::NONE, |acc, c| acc | c.query_features()),
        }
    }

    /// True if the description can match at most one entity. Conservative.
    pub fn is_singleton(&self) -> bool {
        match &self.kind {
            DescriptionKind::Value { comparator, .. } => *comparator == Comparator::Eq,
            DescriptionKind::Conjunction { children } => children.iter().any(Description::is_singleton),
            _ => false,
        }
    }

    /// Re-applies the absorption rules recursively and collapses empty and
    /// unary connectives.
    pub fn simplify(&self) -> Description {
        let simplified = match &self.kind {
            DescriptionKind::Conjunction { children } => {
                collapse(Description::conjunction(children.iter().map(Description::simplify)))
            }
            DescriptionKind::Disjunction { children } => {
                collapse(Description::disjunction(children.iter().map(Description::simplify)))
            }
            DescriptionKind::SomeProperty {
                property,
                description,
            } => Description::some_property(property.clone(), description.simplify()),
            DescriptionKind::ValueList { slots } => Description::value_list(
                slots
                    .iter()
                    .map(|slot| slot.as_ref().map(Description::simplify).filter(|d| !d.is_thing()))
                    .collect(),
            ),
            other => Description::new(other.clone()),
        };
        let mut result = simplified;
        let mut requests = self.print_requests.clone();
        for request in std::mem::take(&mut result.print_requests) {
            if !requests.contains(&request) {
                requests.push(request);
            }
        }
        result.print_requests = requests;
        result
    }

    /// Convenience wrapper around [`Description::prune`] starting from fresh budgets.
    pub fn pruned(&self, model: CostModel, max_size: i64, max_depth: i64) -> (Description, Vec<String>) {
        let mut size = max_size;
        let mut depth = max_depth;
        let mut log = Vec::new();
        let result = self.prune(model, &mut size, &mut depth, &mut log);
        (result, log)
    }

    /// Returns a copy of this description that fits into the remaining
    /// `max_size` / `max_depth` budgets, consuming them. Excised parts are
    /// replaced by `Thing` and their serialization is appended to `log`.
    pub fn prune(
        &self,
        model: CostModel,
        max_size: &mut i64,
        max_depth: &mut i64,
        log: &mut Vec<String>,
    ) -> Description {
        match &self.kind {
            DescriptionKind::Class { categories } => self.prune_class(categories, model, max_size, log),
            DescriptionKind::Conjunction { children } => {
                self.prune_connective(children, false, model, max_size, max_depth, log)
            }
            DescriptionKind::Disjunction { children } => {
                self.prune_connective(children, true, model, max_size, max_depth, log)
            }
            DescriptionKind::SomeProperty {
                property,
                description,
            } => {
                if *max_size <= 0 || *max_depth <= 0 {
                    return self.excise(log);
                }
                *max_size -= 1;
                *max_depth -= 1;
                let sub = description.prune(model, max_size, max_depth, log);
                let mut result = Description::some_property(property.clone(), sub);
                result.print_requests = self.print_requests.clone();
                result
            }
            DescriptionKind::ValueList { slots } => self.prune_value_list(slots, model, max_size, max_depth, log),
            _ => {
                let size = self.size(model);
                let depth = self.depth();
                if *max_size < size || *max_depth < depth {
                    return self.excise(log);
                }
                *max_size -= size;
                *max_depth -= depth;
                self.clone()
            }
        }
    }

    fn excise(&self, log: &mut Vec<String>) -> Description {
        log.push(self.query_string(false));
        let mut thing = Description::thing();
        thing.print_requests = self.print_requests.clone();
        thing
    }

    fn prune_class(
        &self,
        categories: &[EntityRef],
        model: CostModel,
        max_size: &mut i64,
        log: &mut Vec<String>,
    ) -> Description {
        let size = self.size(model);
        if *max_size >= size {
            *max_size -= size;
            return self.clone();
        }
        if *max_size <= 0 {
            return self.excise(log);
        }
        let keep = (*max_size as usize).min(categories.len());
        let dropped = Description::class(categories[keep..].iter().cloned());
        log.push(dropped.query_string(false));
        *max_size = 0;
        let mut result = Description::class(categories[..keep].iter().cloned());
        result.print_requests = self.print_requests.clone();
        result
    }

    fn prune_connective(
        &self,
        children: &[Description],
        disjunctive: bool,
        model: CostModel,
        max_size: &mut i64,
        max_depth: &mut i64,
        log: &mut Vec<String>,
    ) -> Description {
        if *max_size <= 0 && self.size(model) > 0 {
            return self.excise(log);
        }
        let mut child_log = Vec::new();
        let mut new_depth = *max_depth;
        let mut pruned = Vec::with_capacity(children.len());
        for child in children {
            let mut rest_depth = *max_depth;
            pruned.push(child.prune(model, max_size, &mut rest_depth, &mut child_log));
            new_depth = new_depth.min(rest_depth);
        }
        let mut result = if disjunctive {
            Description::disjunction(pruned)
        } else {
            Description::conjunction(pruned)
        };
        if result.is_thing() || connective_children(&result).is_empty() {
            // Either a disjunct was pruned to `Thing` (absorbing the whole
            // disjunction) or nothing survived. Without dropped children the
            // connective already was equivalent to `Thing`.
            let mut thing = if child_log.is_empty() {
                let mut thing = Description::thing();
                thing.print_requests = self.print_requests.clone();
                thing
            } else {
                self.excise(log)
            };
            for request in result.print_requests {
                thing.add_print_request(request);
            }
            return thing;
        }
        log.extend(child_log);
        *max_depth = new_depth;
        let mut requests = self.print_requests.clone();
        for request in std::mem::take(&mut result.print_requests) {
            if !requests.contains(&request) {
                requests.push(request);
            }
        }
        result.print_requests = requests;
        collapse(result)
    }

    fn prune_value_list(
        &self,
        slots: &[Option<Description>],
        model: CostModel,
        max_size: &mut i64,
        max_depth: &mut i64,
        log: &mut Vec<String>,
    ) -> Description {
        if *max_size <= 0 {
            return self.excise(log);
        }
        let mut child_log = Vec::new();
        let mut new_depth = *max_depth;
        let mut pruned = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Some(desc) => {
                    let mut rest_depth = *max_depth;
                    let sub = desc.prune(model, max_size, &mut rest_depth, &mut child_log);
                    new_depth = new_depth.min(rest_depth);
                    pruned.push(if sub.is_thing() { None } else { Some(sub) });
                }
                None => pruned.push(None),
            }
        }
        if pruned.iter().all(Option::is_none) {
            return self.excise(log);
        }
        log.extend(child_log);
        *max_depth = new_depth;
        let mut result = Description::value_list(pruned);
        result.print_requests = self.print_requests.clone();
        result
    }

    /// Serializes the condition in `#ask` syntax. `as_value` selects the
    /// form used in value position (after `::`).
    pub fn query_string(&self, as_value: bool) -> String {
        match &self.kind {
            DescriptionKind::Thing => {
                if as_value {
                    "+".to_owned()
                } else {
                    String::new()
                }
            }
            DescriptionKind::Class { categories } => {
                let mut result = String::from("[[");
                for (idx, cat) in categories.iter().enumerate() {
                    if idx == 0 {
                        result.push_str(&cat.prefixed_text());
                    } else {
                        result.push_str("||");
                        result.push_str(&cat.text());
                    }
                }
                result.push_str("]]");
                wrap_subquery(result, as_value)
            }
            DescriptionKind::Concept { concept } => {
                wrap_subquery(format!("[[{}]]", concept.prefixed_text()), as_value)
            }
            DescriptionKind::Namespace { namespace } => {
                wrap_subquery(format!("[[:{}:+]]", namespace_prefix(*namespace)), as_value)
            }
            DescriptionKind::Value { item, comparator } => {
                let value = item.serialization();
                if as_value {
                    format!("{}{value}", comparator.symbol())
                } else if *comparator == Comparator::Eq {
                    format!("[[:{value}]]")
                } else {
                    format!("[[{}{value}]]", comparator.symbol())
                }
            }
            DescriptionKind::Conjunction { children } => {
                let parts: Vec<String> = children
                    .iter()
                    .map(|c| c.query_string(false))
                    .filter(|s| !s.is_empty())
                    .collect();
                if parts.is_empty() {
                    return if as_value { "+".to_owned() } else { String::new() };
                }
                wrap_subquery(parts.join(" "), as_value)
            }
            DescriptionKind::Disjunction { children } => {
                let sep = if as_value { "||" } else { " OR " };
                let parts: Vec<String> = children
                    .iter()
                    .map(|c| {
                        let sub = c.query_string(as_value);
                        match (&c.kind, as_value) {
                            (DescriptionKind::SomeProperty { .. }, true) => format!("<q>[[{sub}]]</q>"),
                            (DescriptionKind::SomeProperty { .. }, false) => format!("<q>{sub}</q>"),
                            _ => sub,
                        }
                    })
                    .collect();
                let joined = parts.join(sep);
                if as_value {
                    joined
                } else {
                    format!("<q>{joined}</q>")
                }
            }
            DescriptionKind::SomeProperty {
                property,
                description,
            } => {
                let mut chain = property.label();
                let mut last: &Description = description;
                while let DescriptionKind::SomeProperty {
                    property: next,
                    description: inner,
                } = &last.kind
                {
                    if next.is_builtin() || property.is_builtin() {
                        break;
                    }
                    chain.push('.');
                    chain.push_str(&next.label());
                    last = inner;
                }
                let body = format!("[[{chain}::{}]]", last.query_string(true));
                if as_value {
                    format!("<q>{body}</q>")
                } else {
                    body
                }
            }
            DescriptionKind::ValueList { slots } => {
                let parts: Vec<String> = slots
                    .iter()
                    .map(|slot| match slot {
                        Some(desc) => desc.query_string(true),
                        None => "?".to_owned(),
                    })
                    .collect();
                parts.join(";")
            }
        }
    }
}

impl fmt::Display for Description {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_string(false))
    }
}

fn wrap_subquery(body: String, as_value: bool) -> String {
    if as_value {
        format!("<q>{body}</q>")
    } else {
        body
    }
}

fn connective_children(desc: &Description) -> &[Description] {
    match &desc.kind {
        DescriptionKind::Conjunction { children } | DescriptionKind::Disjunction { children } => children,
        _ => &[],
    }
}

/// Collapses a connective with zero children to `Thing` and one with a
/// single child to that child, keeping the connective's print requests.
fn collapse(desc: Description) -> Description {
    let Description {
        kind,
        print_requests,
    } = desc;
    let mut result = match kind {
        DescriptionKind::Conjunction { mut children } | DescriptionKind::Disjunction { mut children }
            if children.len() <= 1 =>
        {
            children.pop().unwrap_or_else(Description::thing)
        }
        kind => Description::new(kind),
    };
    let mut requests = print_requests;
    for request in std::mem::take(&mut result.print_requests) {
        if !requests.contains(&request) {
            requests.push(request);
        }
    }
    result.print_requests = requests;
    result
}
