#![forbid(unsafe_code)]

//! Identifier newtypes and the crate-wide error type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Row identifier of an entity in the `ids` table. `0` never names an entity.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Sentinel returned by resolvers for unknown entities.
    pub const NONE: EntityId = EntityId(0);

    /// Returns true when this id refers to a stored entity.
    pub fn is_known(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        EntityId(value)
    }
}

impl From<EntityId> for u64 {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

/// Hard errors raised by the compiler, executor and storage collaborators.
#[derive(thiserror::Error, Debug)]
pub enum AskError {
    /// The relational engine rejected or failed a statement.
    #[error("engine: {0}")]
    Engine(String),
    /// Invalid argument with a formatted message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// A serialized description could not be decoded.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),
    /// Configuration file could not be decoded.
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
    /// I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for AskError {
    fn from(err: rusqlite::Error) -> Self {
        AskError::Engine(err.to_string())
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, AskError>;
