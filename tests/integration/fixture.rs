//! Shared SQLite store used by the integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use sombra_ask::query::engine::SqlValue;
use sombra_ask::query::{InMemoryRegistry, QueryConfig, QueryStore, SqlEngine, SqliteEngine};
use tempfile::TempDir;

pub const BERLIN: u64 = 1;
pub const PARIS: u64 = 2;
pub const HAMBURG: u64 = 3;
pub const LYON: u64 = 4;
pub const TINY_TOWN: u64 = 5;
pub const GERMANY: u64 = 6;
pub const FRANCE: u64 = 7;
pub const CITIES: u64 = 10;
pub const CAPITALS: u64 = 11;
pub const GERMAN_CITIES: u64 = 12;
pub const TOWNS: u64 = 15;
pub const BIG_CITIES: u64 = 30;
pub const CACHED_CAPITALS: u64 = 31;
pub const UNDEFINED_CONCEPT: u64 = 32;
pub const LOOP_CONCEPT: u64 = 33;
pub const INTERNAL_BERLIN: u64 = 40;

const SCHEMA: &str = "
CREATE TABLE ids (id INTEGER PRIMARY KEY, title TEXT NOT NULL, namespace INTEGER NOT NULL,
                  interwiki TEXT NOT NULL DEFAULT '', sortkey TEXT NOT NULL);
CREATE TABLE redirects (title TEXT NOT NULL, namespace INTEGER NOT NULL, target_id INTEGER NOT NULL);
CREATE TABLE di_wikipage (s_id INTEGER NOT NULL, p_id INTEGER NOT NULL, o_id INTEGER NOT NULL);
CREATE TABLE di_number (s_id INTEGER NOT NULL, p_id INTEGER NOT NULL, o_sortkey REAL, o_serialized TEXT);
CREATE TABLE di_quantity (s_id INTEGER NOT NULL, p_id INTEGER NOT NULL, o_value REAL, o_unit TEXT);
CREATE TABLE di_blob (s_id INTEGER NOT NULL, p_id INTEGER NOT NULL, o_hash TEXT, o_blob TEXT);
CREATE TABLE inst (s_id INTEGER NOT NULL, o_id INTEGER NOT NULL);
CREATE TABLE subc (s_id INTEGER NOT NULL, o_id INTEGER NOT NULL);
CREATE TABLE subp (s_id INTEGER NOT NULL, o_id INTEGER NOT NULL);
CREATE TABLE concepts (s_id INTEGER PRIMARY KEY, concept_txt TEXT, concept_features INTEGER,
                       concept_size INTEGER, concept_depth INTEGER, cache_date INTEGER, cache_count INTEGER);
CREATE TABLE concept_cache (s_id INTEGER NOT NULL, o_id INTEGER NOT NULL);
";

const DATA: &str = "
INSERT INTO ids VALUES
  (1, 'Berlin', 0, '', 'Berlin'),
  (2, 'Paris', 0, '', 'Paris'),
  (3, 'Hamburg', 0, '', 'Hamburg'),
  (4, 'Lyon', 0, '', 'Lyon'),
  (5, 'Tiny_Town', 0, '', 'Tiny Town'),
  (6, 'Germany', 0, '', 'Germany'),
  (7, 'France', 0, '', 'France'),
  (10, 'Cities', 14, '', 'Cities'),
  (11, 'Capitals', 14, '', 'Capitals'),
  (12, 'German_cities', 14, '', 'German cities'),
  (15, 'Towns', 14, '', 'Towns'),
  (20, 'Population', 102, '', 'Population'),
  (21, 'Located_in', 102, '', 'Located in'),
  (22, 'Area', 102, '', 'Area'),
  (23, 'Nickname', 102, '', 'Nickname'),
  (24, 'Inhabitants', 102, '', 'Inhabitants'),
  (30, 'Big_cities', 108, '', 'Big cities'),
  (31, 'Cached_capitals', 108, '', 'Cached capitals'),
  (32, 'Undefined', 108, '', 'Undefined'),
  (33, 'Loop', 108, '', 'Loop'),
  (40, 'Berlin', 0, ':redirect', 'Zz internal');
INSERT INTO redirects VALUES ('Berlin_City', 0, 1);
INSERT INTO di_number VALUES
  (1, 20, 3600000, '3600000'),
  (2, 20, 2100000, '2100000'),
  (3, 20, 1800000, '1800000'),
  (4, 20, 500000, '500000'),
  (5, 24, 900, '900');
INSERT INTO di_wikipage VALUES (1, 21, 6), (3, 21, 6), (2, 21, 7), (4, 21, 7);
INSERT INTO di_quantity VALUES (1, 22, 891.8, 'km2'), (2, 22, 105.4, 'km2'), (3, 22, 755.2, 'mi2');
INSERT INTO di_blob VALUES (1, 23, 'Spree-Athen', NULL), (2, 23, 'Ville Lumiere', NULL);
INSERT INTO inst VALUES (1, 11), (2, 11), (3, 12), (4, 10), (5, 15), (40, 10);
INSERT INTO subc VALUES (11, 10), (12, 10);
INSERT INTO subp VALUES (24, 20);
INSERT INTO concept_cache VALUES (1, 31), (2, 31);
";

/// Temporary database file with the store schema and sample data.
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
    pub engine: Arc<SqliteEngine>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("store.db");
        let engine = Arc::new(open(&path));
        Self { dir, path, engine }
    }

    pub fn registry() -> InMemoryRegistry {
        InMemoryRegistry::standard()
            .with_property("Population", "_num")
            .with_property("Inhabitants", "_num")
            .with_property("Located in", "_wpg")
            .with_property("Area", "_qty")
            .with_property("Nickname", "_str")
    }

    pub fn store(&self, config: QueryConfig) -> QueryStore {
        QueryStore::sqlite(self.engine.clone(), Arc::new(Self::registry()), config)
    }

    pub fn execute(&self, sql: &str) {
        self.engine.execute_batch(sql).expect("fixture statement");
    }

    pub fn add_concept(&self, id: u64, text: &str, features: u32, size: i64, depth: i64, cache_date: Option<i64>) {
        self.engine
            .execute(
                "INSERT INTO concepts VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)",
                &[
                    SqlValue::Integer(id as i64),
                    SqlValue::Text(text.to_owned()),
                    SqlValue::Integer(i64::from(features)),
                    SqlValue::Integer(size),
                    SqlValue::Integer(depth),
                    cache_date.map(SqlValue::Integer).unwrap_or(SqlValue::Null),
                ],
            )
            .expect("insert concept");
    }

    /// Names of the temporary tables currently present on the connection.
    pub fn temp_tables(&self) -> Vec<String> {
        self.engine
            .select(
                "SELECT name FROM sqlite_temp_master WHERE type='table' ORDER BY name",
                &[],
            )
            .expect("temp master")
            .into_iter()
            .filter_map(|row| row.first().and_then(SqlValue::as_text))
            .collect()
    }
}

pub fn open(path: &Path) -> SqliteEngine {
    let engine = SqliteEngine::open(path).expect("open sqlite");
    engine.execute_batch(SCHEMA).expect("schema");
    engine.execute_batch(DATA).expect("data");
    engine
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64
}
