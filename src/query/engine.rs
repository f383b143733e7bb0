//! Relational engine driver used by the compiler, executor and SQL-backed
//! collaborators.
//!
//! Statements are plain SQL strings; literals produced by the compiler are
//! quoted through [`Dialect::quote`], ad-hoc lookups bind positional
//! parameters instead.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::Result;

/// SQL dialects the compiler can target. They differ only in temporary
/// table handling, duplicate-ignoring inserts and LIKE escaping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// SQLite.
    #[default]
    Sqlite,
    /// PostgreSQL.
    Postgres,
}

impl Dialect {
    /// DDL for a temporary single-column id relation.
    pub fn create_temp_id_table(self, name: &str) -> String {
        match self {
            Dialect::Sqlite => {
                format!("CREATE TEMPORARY TABLE IF NOT EXISTS {name} (id INTEGER PRIMARY KEY)")
            }
            Dialect::Postgres => format!(
                "CREATE TEMPORARY TABLE IF NOT EXISTS {name} (id INTEGER PRIMARY KEY) ON COMMIT PRESERVE ROWS"
            ),
        }
    }

    /// Drops a temporary relation if present.
    pub fn drop_temp_table(self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS {name}")
    }

    /// Removes every row of a relation.
    pub fn truncate(self, name: &str) -> String {
        match self {
            Dialect::Sqlite => format!("DELETE FROM {name}"),
            Dialect::Postgres => format!("TRUNCATE TABLE {name}"),
        }
    }

    /// Insert that silently skips rows violating the primary key. `body` is
    /// the part after the table name (column list plus `VALUES`/`SELECT`).
    pub fn insert_ignore(self, table: &str, body: &str) -> String {
        match self {
            Dialect::Sqlite => format!("INSERT OR IGNORE INTO {table} {body}"),
            Dialect::Postgres => format!("INSERT INTO {table} {body} ON CONFLICT DO NOTHING"),
        }
    }

    /// Suffix appended to LIKE comparisons so that `\` escapes wildcards.
    pub fn like_escape(self) -> &'static str {
        match self {
            Dialect::Sqlite => " ESCAPE '\\'",
            Dialect::Postgres => "",
        }
    }

    /// Expression ordering rows randomly.
    pub fn random(self) -> &'static str {
        "RANDOM()"
    }

    /// Whether ORDER BY columns must also appear in a DISTINCT select list.
    pub fn selects_sort_fields(self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Renders a literal for inclusion in generated SQL.
    pub fn quote(self, value: &SqlValue) -> String {
        match value {
            SqlValue::Null => "NULL".to_owned(),
            SqlValue::Integer(v) => v.to_string(),
            SqlValue::Real(v) => {
                if v.is_finite() {
                    format!("{v:?}")
                } else {
                    "NULL".to_owned()
                }
            }
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

/// Column value exchanged with the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Integer.
    Integer(i64),
    /// Floating point number.
    Real(f64),
    /// Text.
    Text(String),
}

impl SqlValue {
    /// Integer view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            SqlValue::Real(v) => Some(*v as i64),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }

    /// Floating point view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(v) => Some(*v as f64),
            SqlValue::Real(v) => Some(*v),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }

    /// Text view of the value.
    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Integer(v) => Some(v.to_string()),
            SqlValue::Real(v) => Some(v.to_string()),
            SqlValue::Null => None,
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<u64> for SqlValue {
    fn from(value: u64) -> Self {
        SqlValue::Integer(value as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Real(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_owned())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// One result row.
pub type SqlRow = Vec<SqlValue>;

/// Synchronous relational driver.
pub trait SqlEngine: Send + Sync {
    /// Dialect of generated statements.
    fn dialect(&self) -> Dialect;

    /// Runs a query and returns all rows.
    fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Runs a data-modifying statement and returns the affected row count.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize>;

    /// Runs an INSERT and returns the number of inserted rows.
    fn insert(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.execute(sql, params)
    }

    /// Creates an empty temporary `(id)` relation.
    fn create_temporary_id_relation(&self, name: &str) -> Result<()> {
        self.execute(&self.dialect().create_temp_id_table(name), &[])
            .map(|_| ())
    }

    /// Drops a temporary relation.
    fn drop_temporary_relation(&self, name: &str) -> Result<()> {
        self.execute(&self.dialect().drop_temp_table(name), &[])
            .map(|_| ())
    }

    /// Empties a relation.
    fn truncate_relation(&self, name: &str) -> Result<()> {
        self.execute(&self.dialect().truncate(name), &[]).map(|_| ())
    }
}

/// [`SqlEngine`] over a single SQLite connection.
pub struct SqliteEngine {
    conn: Mutex<Connection>,
}

impl SqliteEngine {
    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    /// Runs a batch of `;`-separated statements, e.g. fixture DDL.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

fn convert(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Real(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl SqlEngine for SqliteEngine {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn select(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        trace!(sql, "query.engine.select");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let columns = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for idx in 0..columns {
                values.push(convert(row.get_ref(idx)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        trace!(sql, "query.engine.execute");
        let conn = self.conn.lock();
        Ok(conn.execute(sql, params_from_iter(params.iter()))?)
    }
}
