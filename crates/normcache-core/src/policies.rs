//! Explicit dispatch tables: key-argument declarations and field modifiers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::store::ReadHelpers;
use crate::types::Value;

/// Type name owning the root query fields.
pub const ROOT_QUERY_TYPE: &str = "Query";

/// Pure transform `(current value, helpers) -> new value`.
pub type FieldModifier = Arc<dyn Fn(&Value, &ReadHelpers<'_>) -> Value + Send + Sync>;

/// Table of field modifiers keyed by `(typeName, fieldName)`.
///
/// Modifiers on [`ROOT_QUERY_TYPE`] apply to every slot of their field;
/// any other type applies to that field of every entity of the type.
#[derive(Clone, Default)]
pub struct Modifiers {
    entries: BTreeMap<(String, String), FieldModifier>,
}

impl Modifiers {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a modifier for an entity field.
    pub fn field<F>(mut self, type_name: impl Into<String>, field: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &ReadHelpers<'_>) -> Value + Send + Sync + 'static,
    {
        self.entries
            .insert((type_name.into(), field.into()), Arc::new(f));
        self
    }

    /// Register a modifier for every slot of a root query field.
    pub fn root_field<F>(self, field: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &ReadHelpers<'_>) -> Value + Send + Sync + 'static,
    {
        self.field(ROOT_QUERY_TYPE, field, f)
    }

    /// Iterate `(typeName, fieldName, modifier)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &FieldModifier)> {
        self.entries
            .iter()
            .map(|((t, f), m)| (t.as_str(), f.as_str(), m))
    }

    /// Number of registered modifiers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no modifier is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.entries.keys().map(|(t, field)| format!("{}.{}", t, field)))
            .finish()
    }
}

/// Per-type field policies: which arguments identify a slot.
///
/// Fields without a declaration treat every argument as key-bearing.
#[derive(Debug, Clone, Default)]
pub struct TypePolicies {
    key_args: HashMap<(String, String), Vec<String>>,
}

impl TypePolicies {
    /// Create an empty policy set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the key-bearing arguments of `type_name.field`.
    pub fn with_key_args<I, S>(mut self, type_name: &str, field: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_args.insert(
            (type_name.to_string(), field.to_string()),
            args.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Declared key arguments of a root query field.
    pub fn key_args(&self, field: &str) -> Option<&[String]> {
        self.key_args
            .get(&(ROOT_QUERY_TYPE.to_string(), field.to_string()))
            .map(Vec::as_slice)
    }
}
