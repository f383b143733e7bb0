//! Plan nodes produced by the compiler and materialized by the executor.
//!
//! Nodes live in an arena owned by a [`CompilationContext`] and refer to
//! each other by [`PlanNodeId`]. Every node carries the same quadruple the
//! executor eventually folds into the final statement: a join table, a join
//! field, extra FROM text and a WHERE fragment.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::types::EntityId;

/// Index of a node inside a [`CompilationContext`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PlanNodeId(pub usize);

/// What a node stands for before execution.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanKind {
    /// Rows of a stored table, restricted by components and WHERE text.
    Table,
    /// A literal set of entity ids.
    Value,
    /// Intersection of components.
    Conjunction,
    /// Union of components, materialized into a temporary relation.
    Disjunction,
    /// Seed categories whose subcategory closure is needed.
    ClassHierarchy,
    /// Seed properties whose subproperty closure is needed.
    PropertyHierarchy,
}

impl PlanKind {
    fn name(self) -> &'static str {
        match self {
            PlanKind::Table => "Table",
            PlanKind::Value => "Value",
            PlanKind::Conjunction => "Conjunction",
            PlanKind::Disjunction => "Disjunction",
            PlanKind::ClassHierarchy => "ClassHierarchy",
            PlanKind::PropertyHierarchy => "PropertyHierarchy",
        }
    }
}

/// How a node exposes the ids it matches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinField {
    /// A qualified column of the node's join table, e.g. `t3.s_id`.
    Column(String),
    /// Literal ids. An empty list matches nothing.
    Values(Vec<EntityId>),
}

impl JoinField {
    /// A join field that matches no entity.
    pub fn nothing() -> Self {
        JoinField::Values(Vec::new())
    }
}

/// One node of a compiled plan.
#[derive(Clone, Debug)]
pub struct PlanNode {
    /// Node variant.
    pub kind: PlanKind,
    /// Unique alias; also names the node's temporary relation, if any.
    pub alias: String,
    /// Join table, absent for value nodes.
    pub table: Option<String>,
    /// Matched ids.
    pub join_field: JoinField,
    /// Additional FROM text appended after the node's own join.
    pub from: String,
    /// WHERE fragment, empty when unrestricted.
    pub where_clause: String,
    /// Child nodes with the expression each must equal.
    pub components: BTreeMap<PlanNodeId, String>,
    /// Sort key to qualified column.
    pub sort_fields: BTreeMap<String, String>,
}

impl PlanNode {
    fn new(kind: PlanKind, alias: String) -> Self {
        Self {
            kind,
            alias,
            table: None,
            join_field: JoinField::nothing(),
            from: String::new(),
            where_clause: String::new(),
            components: BTreeMap::new(),
            sort_fields: BTreeMap::new(),
        }
    }

    /// Qualified column of this node's alias.
    pub fn column(&self, name: &str) -> String {
        format!("{}.{}", self.alias, name)
    }

    /// True when the node can never match anything.
    pub fn is_empty_result(&self) -> bool {
        matches!(&self.join_field, JoinField::Values(ids) if ids.is_empty())
    }

    /// Appends a condition with AND.
    pub fn add_condition(&mut self, condition: &str) {
        if condition.is_empty() {
            return;
        }
        if self.where_clause.is_empty() {
            self.where_clause = condition.to_owned();
        } else {
            self.where_clause = format!("{} AND {}", self.where_clause, condition);
        }
    }

    /// Turns the node into one that matches nothing.
    pub fn make_empty(&mut self) {
        self.kind = PlanKind::Value;
        self.table = None;
        self.join_field = JoinField::nothing();
        self.from.clear();
        self.where_clause.clear();
        self.components.clear();
    }
}

/// Shared source of plan aliases. Aliases name temporary relations, so
/// every store draws from [`AliasSequence::global`]; concurrent queries on
/// one connection then never reuse a relation name.
#[derive(Debug, Default)]
pub struct AliasSequence(AtomicU64);

static GLOBAL_ALIASES: AliasSequence = AliasSequence(AtomicU64::new(0));

impl AliasSequence {
    /// Creates a private sequence starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide sequence.
    pub fn global() -> &'static AliasSequence {
        &GLOBAL_ALIASES
    }

    /// Returns the next unused alias.
    pub fn next_alias(&self) -> String {
        format!("t{}", self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// Arena of plan nodes for one query.
pub struct CompilationContext<'a> {
    nodes: Vec<PlanNode>,
    aliases: &'a AliasSequence,
}

impl<'a> CompilationContext<'a> {
    /// Creates an empty context drawing aliases from `aliases`.
    pub fn new(aliases: &'a AliasSequence) -> Self {
        Self {
            nodes: Vec::new(),
            aliases,
        }
    }

    /// Allocates a node with a fresh alias.
    pub fn add(&mut self, kind: PlanKind) -> PlanNodeId {
        let id = PlanNodeId(self.nodes.len());
        self.nodes.push(PlanNode::new(kind, self.aliases.next_alias()));
        id
    }

    /// Allocates a value node over `ids`.
    pub fn add_values(&mut self, ids: Vec<EntityId>) -> PlanNodeId {
        let id = self.add(PlanKind::Value);
        self.nodes[id.0].join_field = JoinField::Values(ids);
        id
    }

    /// Allocates a node that matches nothing.
    pub fn add_empty(&mut self) -> PlanNodeId {
        self.add_values(Vec::new())
    }

    /// Allocates a table node joined through `column` of its own alias.
    pub fn add_table(&mut self, table: &str, column: &str) -> PlanNodeId {
        let id = self.add(PlanKind::Table);
        let node = &mut self.nodes[id.0];
        node.table = Some(table.to_owned());
        node.join_field = JoinField::Column(node.column(column));
        id
    }

    /// Borrows a node.
    pub fn node(&self, id: PlanNodeId) -> &PlanNode {
        &self.nodes[id.0]
    }

    /// Mutably borrows a node.
    pub fn node_mut(&mut self, id: PlanNodeId) -> &mut PlanNode {
        &mut self.nodes[id.0]
    }

    /// Overwrites `target` with a copy of `source`.
    pub fn replace_with(&mut self, target: PlanNodeId, source: PlanNodeId) {
        let copy = self.nodes[source.0].clone();
        self.nodes[target.0] = copy;
    }

    /// Number of allocated nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no node was allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Tree rendering of the plan below `root`, for debug output.
    pub fn explain(&self, root: PlanNodeId) -> ExplainNode {
        let node = self.node(root);
        let mut explain = ExplainNode::new(node.kind.name(), &node.alias);
        if let Some(table) = &node.table {
            explain.props.push(ExplainProp::new("table", table));
        }
        match &node.join_field {
            JoinField::Column(column) => explain.props.push(ExplainProp::new("join", column)),
            JoinField::Values(ids) => {
                let ids = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>();
                explain
                    .props
                    .push(ExplainProp::new("values", format!("[{}]", ids.join(","))));
            }
        }
        if !node.where_clause.is_empty() {
            explain.props.push(ExplainProp::new("where", &node.where_clause));
        }
        for (key, field) in &node.sort_fields {
            explain
                .props
                .push(ExplainProp::new(format!("sort[{key}]"), field));
        }
        explain.inputs = node
            .components
            .iter()
            .map(|(child, on)| {
                let mut input = self.explain(*child);
                if !on.is_empty() {
                    input.props.insert(0, ExplainProp::new("on", on));
                }
                input
            })
            .collect();
        explain
    }
}

/// Human-readable plan node used by debug traces.
#[derive(Clone, Debug, Serialize)]
pub struct ExplainNode {
    /// Node kind.
    pub op: String,
    /// Node alias.
    pub alias: String,
    /// Node attributes.
    pub props: Vec<ExplainProp>,
    /// Component nodes.
    pub inputs: Vec<ExplainNode>,
}

impl ExplainNode {
    /// Creates a node without attributes or inputs.
    pub fn new(op: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            alias: alias.into(),
            props: Vec::new(),
            inputs: Vec::new(),
        }
    }

    /// Indented multi-line rendering.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, indent: usize) {
        out.push_str(&"  ".repeat(indent));
        out.push_str(&self.op);
        out.push_str(" [");
        out.push_str(&self.alias);
        out.push(']');
        for prop in &self.props {
            out.push_str(&format!(" {}={}", prop.key, prop.value));
        }
        out.push('\n');
        for input in &self.inputs {
            input.render_into(out, indent + 1);
        }
    }
}

/// Single attribute of an [`ExplainNode`].
#[derive(Clone, Debug, Serialize)]
pub struct ExplainProp {
    /// Attribute name.
    pub key: String,
    /// Attribute value.
    pub value: String,
}

impl ExplainProp {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
