//! Core data types: entity identities, slot keys and field values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a normalized entity: `(typeName, id)`.
///
/// Two entities with equal keys are the same object; every reference to
/// an entity goes through its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// GraphQL type name (e.g. "Entry")
    pub type_name: String,
    /// Entity id, stringified
    pub id: String,
}

impl EntityKey {
    /// Create a new entity key.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)
    }
}

/// Identity of a cache slot: a root field plus its canonical key arguments.
///
/// `args` holds the canonical JSON serialization of the key-bearing
/// argument subset (keys sorted). It is empty when the field has no key
/// arguments. Build these through [`QuerySlotManager::resolve_slot`].
///
/// [`QuerySlotManager::resolve_slot`]: crate::slots::QuerySlotManager::resolve_slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    /// Root field name (e.g. "entries")
    pub field: String,
    /// Canonical key-argument string
    pub args: String,
}

impl SlotKey {
    pub(crate) fn new(field: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            args: args.into(),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            write!(f, "{}", self.field)
        } else {
            write!(f, "{}({})", self.field, self.args)
        }
    }
}

/// A stored field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Plain JSON value (including embedded objects without identity)
    Scalar(serde_json::Value),
    /// Reference to another entity
    Ref(EntityKey),
    /// Ordered list of entity references
    RefList(Vec<EntityKey>),
}

impl Value {
    /// Shorthand for a string scalar.
    pub fn string(s: impl Into<String>) -> Self {
        Self::Scalar(serde_json::Value::String(s.into()))
    }

    /// Entity keys referenced by this value.
    pub fn references(&self) -> &[EntityKey] {
        match self {
            Self::Scalar(_) => &[],
            Self::Ref(key) => std::slice::from_ref(key),
            Self::RefList(keys) => keys,
        }
    }

    /// Get the scalar JSON value, if this is a scalar.
    pub fn as_scalar(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Scalar(v) => Some(v),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Scalar(value)
    }
}

impl From<EntityKey> for Value {
    fn from(key: EntityKey) -> Self {
        Self::Ref(key)
    }
}

impl From<Vec<EntityKey>> for Value {
    fn from(keys: Vec<EntityKey>) -> Self {
        Self::RefList(keys)
    }
}

/// Where a [`QueryResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// Rendered from the cache
    Cache,
    /// Rendered from the cache right after a network write
    Network,
}

/// Field-level error reported by the server next to (possibly partial) data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQlError {
    /// Human readable message
    pub message: String,
    /// Response path of the failing field, if reported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<serde_json::Value>,
}

impl GraphQlError {
    /// Create an error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
        }
    }
}

impl fmt::Display for GraphQlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of a query or watch delivery.
///
/// `data` is `None` on a cache miss: the slot was never written, was
/// evicted, or references an entity missing a selected field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Rendered data, keyed by root field
    pub data: Option<serde_json::Value>,
    /// Field errors that came with the data
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
    /// Origin of the result
    pub source: ResultSource,
}

impl QueryResult {
    pub(crate) fn from_cache(data: Option<serde_json::Value>) -> Self {
        Self {
            data,
            errors: Vec::new(),
            source: ResultSource::Cache,
        }
    }

    /// True when the cache had nothing to render.
    pub fn is_miss(&self) -> bool {
        self.data.is_none()
    }
}
