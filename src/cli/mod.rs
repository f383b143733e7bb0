#![forbid(unsafe_code)]

//! Command-line interface utilities.

/// Running JSON-serialized queries against a SQLite store.
pub mod ask;
