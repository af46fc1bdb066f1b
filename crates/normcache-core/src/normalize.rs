//! Response normalization and result rendering.
//!
//! Normalization turns response JSON into a [`NormalizedWrites`] plan
//! without touching the store, so a malformed response is rejected before
//! anything is written. Rendering walks a slot back out of the store,
//! following one level of reference indirection, and records every key
//! the result depends on.

use serde_json::{json, Map};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::descriptor::QueryDescriptor;
use crate::error::CacheError;
use crate::store::{CacheStore, ChangeSet};
use crate::types::{EntityKey, SlotKey, Value};

/// Default field holding an entity's id.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Default field holding an entity's type name.
pub const DEFAULT_TYPENAME_FIELD: &str = "__typename";

/// Writes extracted from one response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedWrites {
    /// Entity fields, merged per entity
    pub entities: BTreeMap<EntityKey, BTreeMap<String, Value>>,
    /// Slot lists
    pub slots: Vec<(SlotKey, Vec<EntityKey>)>,
}

impl NormalizedWrites {
    /// True if the response produced nothing to store.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.slots.is_empty()
    }
}

/// Splits response data into identity-addressed entities.
#[derive(Debug, Clone)]
pub struct Normalizer {
    id_field: String,
    typename_field: String,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(DEFAULT_ID_FIELD, DEFAULT_TYPENAME_FIELD)
    }
}

impl Normalizer {
    /// Create a normalizer using custom identity fields.
    pub fn new(id_field: impl Into<String>, typename_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            typename_field: typename_field.into(),
        }
    }

    /// Normalize `data` for `descriptor`.
    ///
    /// Query results are also written into `slot`; mutation results only
    /// contribute entities.
    pub fn normalize(
        &self,
        descriptor: &QueryDescriptor,
        slot: &SlotKey,
        data: &serde_json::Value,
    ) -> Result<NormalizedWrites, CacheError> {
        let operation = descriptor.operation_name.as_str();
        let mut writes = NormalizedWrites::default();

        let Some(root) = data.get(&descriptor.root_field) else {
            if descriptor.is_mutation() {
                return Ok(writes);
            }
            return Err(CacheError::invalid_response(
                operation,
                format!("missing root field '{}'", descriptor.root_field),
            ));
        };

        let Some(shape) = &descriptor.shape else {
            // Scalar root: nothing addressable to store
            return Ok(writes);
        };

        let items: Vec<&serde_json::Value> = match (root, shape.list) {
            (serde_json::Value::Null, _) => Vec::new(),
            (serde_json::Value::Array(items), true) => items.iter().collect(),
            (item @ serde_json::Value::Object(_), false) => vec![item],
            (_, true) => {
                return Err(CacheError::invalid_response(operation, "expected a list"));
            }
            (_, false) => {
                return Err(CacheError::invalid_response(operation, "expected an object"));
            }
        };

        let mut refs = Vec::with_capacity(items.len());
        for item in items {
            let Some(object) = item.as_object() else {
                return Err(CacheError::invalid_response(
                    operation,
                    "list item is not an object",
                ));
            };
            let key = self
                .normalize_entity(object, Some(&shape.type_name), &mut writes)
                .ok_or_else(|| {
                    CacheError::invalid_response(
                        operation,
                        format!("entity without '{}' field", self.id_field),
                    )
                })?;
            refs.push(key);
        }

        if !descriptor.is_mutation() {
            writes.slots.push((slot.clone(), refs));
        }
        Ok(writes)
    }

    /// Identity of a response object, if it has one.
    fn identify(
        &self,
        object: &Map<String, serde_json::Value>,
        default_type: Option<&str>,
    ) -> Option<EntityKey> {
        let id = match object.get(&self.id_field)? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let type_name = object
            .get(&self.typename_field)
            .and_then(serde_json::Value::as_str)
            .or(default_type)?;
        Some(EntityKey::new(type_name, id))
    }

    fn normalize_entity(
        &self,
        object: &Map<String, serde_json::Value>,
        default_type: Option<&str>,
        writes: &mut NormalizedWrites,
    ) -> Option<EntityKey> {
        let key = self.identify(object, default_type)?;
        let mut fields = BTreeMap::new();
        for (name, value) in object {
            if *name == self.typename_field {
                continue;
            }
            fields.insert(name.clone(), self.field_value(value, writes));
        }
        writes.entities.entry(key.clone()).or_default().extend(fields);
        Some(key)
    }

    /// Nested objects become references only when they carry their own
    /// identity (id and type name); anything else is stored inline.
    fn field_value(&self, value: &serde_json::Value, writes: &mut NormalizedWrites) -> Value {
        match value {
            serde_json::Value::Object(object) if self.identify(object, None).is_some() => {
                match self.normalize_entity(object, None, writes) {
                    Some(key) => Value::Ref(key),
                    None => Value::Scalar(value.clone()),
                }
            }
            serde_json::Value::Array(items) if !items.is_empty() && self.all_identified(items) => {
                let keys = items
                    .iter()
                    .filter_map(serde_json::Value::as_object)
                    .filter_map(|object| self.normalize_entity(object, None, writes))
                    .collect();
                Value::RefList(keys)
            }
            _ => Value::Scalar(value.clone()),
        }
    }

    fn all_identified(&self, items: &[serde_json::Value]) -> bool {
        items.iter().all(|item| {
            item.as_object()
                .is_some_and(|object| self.identify(object, None).is_some())
        })
    }
}

/// Keys a rendered result depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependencies {
    /// The slot the result was read from
    pub slot: SlotKey,
    /// Every entity reachable from the slot
    pub entities: BTreeSet<EntityKey>,
}

impl Dependencies {
    /// Whether a change set touches any dependency.
    pub fn affected_by(&self, changes: &ChangeSet) -> bool {
        changes.touches_slot(&self.slot)
            || self
                .entities
                .iter()
                .any(|key| changes.touches_entity(key))
    }
}

/// Result data plus the keys it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    /// Rendered data, `None` on a miss
    pub data: Option<serde_json::Value>,
    /// Dependencies for change tracking
    pub dependencies: Dependencies,
}

/// Render the visible contents of `slot` for `descriptor`.
///
/// The result is a miss when the slot is absent, when the descriptor has
/// no entity shape, or when a listed entity lacks a selected field.
pub fn render(store: &CacheStore, descriptor: &QueryDescriptor, slot: &SlotKey) -> Rendered {
    let refs = store.read_slot(slot);
    let dependencies = Dependencies {
        slot: slot.clone(),
        entities: reachable(store, refs.unwrap_or_default()),
    };

    let data = match (refs, &descriptor.shape) {
        (Some(refs), Some(shape)) => {
            let rendered: Option<Vec<serde_json::Value>> = refs
                .iter()
                .map(|key| render_entity(store, key, &shape.fields))
                .collect();
            rendered.map(|items| {
                let root = if shape.list {
                    serde_json::Value::Array(items)
                } else {
                    items.into_iter().next().unwrap_or(serde_json::Value::Null)
                };
                let mut data = Map::new();
                data.insert(descriptor.root_field.clone(), root);
                serde_json::Value::Object(data)
            })
        }
        _ => None,
    };

    Rendered { data, dependencies }
}

/// Entities transitively reachable from `roots` through visible fields.
fn reachable(store: &CacheStore, roots: &[EntityKey]) -> BTreeSet<EntityKey> {
    let mut seen: BTreeSet<EntityKey> = BTreeSet::new();
    let mut queue: VecDeque<EntityKey> = roots.iter().cloned().collect();
    while let Some(key) = queue.pop_front() {
        if !seen.insert(key.clone()) {
            continue;
        }
        if let Some(fields) = store.entity_fields(&key) {
            for value in fields.values() {
                queue.extend(value.references().iter().cloned());
            }
        }
    }
    seen
}

fn render_entity(
    store: &CacheStore,
    key: &EntityKey,
    fields: &[String],
) -> Option<serde_json::Value> {
    let mut object = Map::new();
    object.insert(DEFAULT_TYPENAME_FIELD.to_string(), json!(key.type_name));
    for field in fields {
        let value = store.read(key, field)?;
        let rendered = match value {
            Value::Scalar(v) => v.clone(),
            Value::Ref(target) => render_reference(store, target),
            Value::RefList(targets) => targets
                .iter()
                .map(|target| render_reference(store, target))
                .collect(),
        };
        object.insert(field.clone(), rendered);
    }
    Some(serde_json::Value::Object(object))
}

/// One level of indirection: scalar fields inline, deeper refs as `__ref`.
fn render_reference(store: &CacheStore, key: &EntityKey) -> serde_json::Value {
    let mut object = Map::new();
    object.insert(DEFAULT_TYPENAME_FIELD.to_string(), json!(key.type_name));
    for (name, value) in store.entity_fields(key).unwrap_or_default() {
        let rendered = match value {
            Value::Scalar(v) => v,
            Value::Ref(target) => json!({ "__ref": target.to_string() }),
            Value::RefList(targets) => targets
                .iter()
                .map(|t| json!({ "__ref": t.to_string() }))
                .collect(),
        };
        object.insert(name, rendered);
    }
    serde_json::Value::Object(object)
}
