//! Entity references, property references and literal data items used by
//! query descriptions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Main (article) namespace.
pub const NS_MAIN: i32 = 0;
/// Category namespace; class descriptions refer to entities in it.
pub const NS_CATEGORY: i32 = 14;
/// Property namespace.
pub const NS_PROPERTY: i32 = 102;
/// Concept namespace.
pub const NS_CONCEPT: i32 = 108;

/// Returns the display prefix for well-known namespaces.
pub fn namespace_prefix(ns: i32) -> String {
    match ns {
        NS_MAIN => String::new(),
        1 => "Talk".to_owned(),
        2 => "User".to_owned(),
        4 => "Project".to_owned(),
        6 => "File".to_owned(),
        10 => "Template".to_owned(),
        12 => "Help".to_owned(),
        NS_CATEGORY => "Category".to_owned(),
        NS_PROPERTY => "Property".to_owned(),
        NS_CONCEPT => "Concept".to_owned(),
        other => format!("NS{other}"),
    }
}

/// Reference to a stored entity by title, namespace and interwiki prefix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    /// Database key of the title (underscores instead of spaces).
    pub title: String,
    /// Namespace number.
    #[serde(default)]
    pub namespace: i32,
    /// Interwiki prefix; empty for local entities.
    #[serde(default)]
    pub interwiki: String,
}

impl EntityRef {
    /// Builds a reference with an explicit namespace.
    pub fn new(title: impl Into<String>, namespace: i32) -> Self {
        Self {
            title: title.into().replace(' ', "_"),
            namespace,
            interwiki: String::new(),
        }
    }

    /// Builds a reference to a page in the main namespace.
    pub fn page(title: impl Into<String>) -> Self {
        Self::new(title, NS_MAIN)
    }

    /// Builds a reference to a category.
    pub fn category(title: impl Into<String>) -> Self {
        Self::new(title, NS_CATEGORY)
    }

    /// Builds a reference to a concept.
    pub fn concept(title: impl Into<String>) -> Self {
        Self::new(title, NS_CONCEPT)
    }

    /// Human-readable title (spaces instead of underscores).
    pub fn text(&self) -> String {
        self.title.replace('_', " ")
    }

    /// Fully prefixed title such as `Category:Cities`.
    pub fn prefixed_text(&self) -> String {
        let prefix = namespace_prefix(self.namespace);
        if prefix.is_empty() {
            self.text()
        } else {
            format!("{prefix}:{}", self.text())
        }
    }

    /// Key used for lexical comparisons against the `sortkey` column.
    pub fn sort_key(&self) -> String {
        self.text()
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefixed_text())
    }
}

/// Reference to a property, optionally traversed in inverse direction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyRef {
    /// Property key; keys starting with `_` denote built-in properties.
    pub key: String,
    /// When set, the restriction applies to the object side of the relation.
    #[serde(default)]
    pub inverse: bool,
}

impl PropertyRef {
    /// Builds a forward property reference.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into().replace(' ', "_"),
            inverse: false,
        }
    }

    /// Builds an inverse property reference.
    pub fn inverse(key: impl Into<String>) -> Self {
        Self {
            inverse: true,
            ..Self::new(key)
        }
    }

    /// Whether the property is built in rather than user defined.
    pub fn is_builtin(&self) -> bool {
        self.key.starts_with('_')
    }

    /// The entity describing this property in the property namespace.
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(self.key.clone(), NS_PROPERTY)
    }

    /// Label used when serializing conditions.
    pub fn label(&self) -> String {
        let label = self.key.replace('_', " ");
        if self.inverse {
            format!("-{label}")
        } else {
            label
        }
    }
}

/// Literal value of a value restriction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataItem {
    /// Reference to another entity.
    Page(EntityRef),
    /// Plain number.
    Number(f64),
    /// Number with a unit of measurement.
    Quantity {
        /// Numeric magnitude.
        value: f64,
        /// Unit label.
        unit: String,
    },
    /// Short, indexable string.
    String(String),
    /// Long free text.
    Text(String),
}

impl DataItem {
    /// Datatype identifier used to find a storage table when a property's
    /// own table is unknown.
    pub fn type_id(&self) -> &'static str {
        match self {
            DataItem::Page(_) => "_wpg",
            DataItem::Number(_) => "_num",
            DataItem::Quantity { .. } => "_qty",
            DataItem::String(_) => "_str",
            DataItem::Text(_) => "_txt",
        }
    }

    /// Serialization used inside condition strings.
    pub fn serialization(&self) -> String {
        match self {
            DataItem::Page(page) => page.prefixed_text(),
            DataItem::Number(n) => format_number(*n),
            DataItem::Quantity { value, unit } => format!("{} {unit}", format_number(*value)),
            DataItem::String(s) | DataItem::Text(s) => s.clone(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Comparison applied by a value restriction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    /// Equality.
    #[default]
    Eq,
    /// Less than or equal.
    Leq,
    /// Greater than or equal.
    Geq,
    /// Not equal.
    Neq,
    /// Wildcard match (`*` and `?`).
    Like,
    /// Negated wildcard match.
    Nlke,
    /// Strictly less.
    Less,
    /// Strictly greater.
    Grtr,
}

impl Comparator {
    /// Prefix used in condition strings.
    pub fn symbol(self) -> &'static str {
        match self {
            Comparator::Eq => "",
            Comparator::Leq => "≤",
            Comparator::Geq => "≥",
            Comparator::Neq => "!",
            Comparator::Like => "~",
            Comparator::Nlke => "!~",
            Comparator::Less => "<",
            Comparator::Grtr => ">",
        }
    }

    /// SQL operator implementing the comparison.
    pub fn sql_operator(self) -> &'static str {
        match self {
            Comparator::Eq => "=",
            Comparator::Leq => "<=",
            Comparator::Geq => ">=",
            Comparator::Neq => "!=",
            Comparator::Like => " LIKE ",
            Comparator::Nlke => " NOT LIKE ",
            Comparator::Less => "<",
            Comparator::Grtr => ">",
        }
    }

    /// Whether the operand must be rewritten as a LIKE pattern.
    pub fn is_pattern(self) -> bool {
        matches!(self, Comparator::Like | Comparator::Nlke)
    }
}

/// Rewrites a user wildcard string into a SQL LIKE pattern: literal `%` and
/// `_` are escaped, `*` becomes `%` and `?` becomes `_`.
pub fn like_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        match ch {
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            '*' => out.push('%'),
            '?' => out.push('_'),
            other => out.push(other),
        }
    }
    out
}
