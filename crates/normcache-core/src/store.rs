//! Cache Store
//!
//! Normalized entity graph with a stack of optimistic patch layers.
//!
//! # Layers
//!
//! ```text
//! Patch(3)   newest    ┐
//! Patch(2)             │ read resolves top-down,
//! Patch(1)             │ first layer holding the field wins
//! Base       oldest    ┘
//! ```
//!
//! Rollback pops a patch. Commit writes the server result into the base
//! layer and pops the patch in the same call, so no reader ever sees the
//! state in between. Either way every patch above the popped one is
//! rebuilt by replaying its recorded writes over the new view below it.

use serde::Serialize;
use serde_json::{json, Map};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::CacheError;
use crate::normalize::NormalizedWrites;
use crate::policies::{Modifiers, ROOT_QUERY_TYPE};
use crate::types::{EntityKey, SlotKey, Value};

/// Key under which slots appear in [`CacheStore::extract`].
pub const ROOT_QUERY: &str = "ROOT_QUERY";

/// Identifier of an optimistic patch layer, ordered by creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PatchId(pub(crate) u64);

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Writes that (re)build a patch layer from the view beneath it.
pub type PatchReplay = Arc<dyn Fn(&mut CacheWriter<'_>) + Send + Sync>;

/// Target of a write, or the vantage point of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerId {
    /// Server-confirmed data
    Base,
    /// An optimistic overlay
    Patch(PatchId),
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base => write!(f, "base"),
            Self::Patch(id) => write!(f, "patch {}", id),
        }
    }
}

/// Keys touched by one logical write.
///
/// `resolution` is set when the write resolved an optimistic patch; such
/// writes notify every dependent watcher even if its rendered result did
/// not change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Entities whose fields changed
    pub entities: BTreeSet<EntityKey>,
    /// Slots whose lists changed
    pub slots: BTreeSet<SlotKey>,
    /// Whether this write resolved a patch
    pub resolution: bool,
}

impl ChangeSet {
    /// True when nothing was touched.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.slots.is_empty()
    }

    /// Number of touched keys.
    pub fn len(&self) -> usize {
        self.entities.len() + self.slots.len()
    }

    /// Whether the given entity was touched.
    pub fn touches_entity(&self, key: &EntityKey) -> bool {
        self.entities.contains(key)
    }

    /// Whether the given slot was touched.
    pub fn touches_slot(&self, slot: &SlotKey) -> bool {
        self.slots.contains(slot)
    }

    /// Merge another change set into this one.
    pub fn extend(&mut self, other: ChangeSet) {
        self.entities.extend(other.entities);
        self.slots.extend(other.slots);
        self.resolution |= other.resolution;
    }
}

#[derive(Debug, Default, Clone)]
struct Layer {
    entities: HashMap<EntityKey, HashMap<String, Value>>,
    slots: HashMap<SlotKey, Vec<EntityKey>>,
}

impl Layer {
    fn field(&self, key: &EntityKey, field: &str) -> Option<&Value> {
        self.entities.get(key).and_then(|fields| fields.get(field))
    }

    fn touched(&self) -> ChangeSet {
        ChangeSet {
            entities: self.entities.keys().cloned().collect(),
            slots: self.slots.keys().cloned().collect(),
            resolution: false,
        }
    }

    /// Entities this layer writes or points at.
    fn referenced_entities(&self) -> impl Iterator<Item = &EntityKey> {
        let written = self.entities.keys();
        let field_refs = self
            .entities
            .values()
            .flat_map(|fields| fields.values().flat_map(Value::references));
        let slot_refs = self.slots.values().flatten();
        written.chain(field_refs).chain(slot_refs)
    }
}

struct Patch {
    id: PatchId,
    name: String,
    layer: Layer,
    /// Absent for patches written by hand; those keep their layer as is
    replay: Option<PatchReplay>,
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("layer", &self.layer)
            .field("replayable", &self.replay.is_some())
            .finish()
    }
}

/// Normalized store: a base layer plus ordered optimistic patches.
///
/// Reads are total: absence is reported as `None`, never as an error.
#[derive(Debug, Default)]
pub struct CacheStore {
    base: Layer,
    patches: Vec<Patch>,
    next_patch: u64,
}

impl CacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The layer currently visible to readers (newest patch, or base).
    pub fn top_layer(&self) -> LayerId {
        self.patches
            .last()
            .map_or(LayerId::Base, |p| LayerId::Patch(p.id))
    }

    /// Whether a layer exists.
    pub fn has_layer(&self, layer: LayerId) -> bool {
        match layer {
            LayerId::Base => true,
            LayerId::Patch(id) => self.patch_index(id).is_some(),
        }
    }

    /// Number of unresolved patches.
    pub fn patch_count(&self) -> usize {
        self.patches.len()
    }

    /// Unresolved patches, oldest first, with their mutation names.
    pub fn pending_patches(&self) -> impl Iterator<Item = (PatchId, &str)> {
        self.patches.iter().map(|p| (p.id, p.name.as_str()))
    }

    /// Number of entities in the base layer.
    pub fn entity_count(&self) -> usize {
        self.base.entities.len()
    }

    fn patch_index(&self, id: PatchId) -> Option<usize> {
        self.patches.binary_search_by_key(&id, |p| p.id).ok()
    }

    /// Layers visible from `layer`, newest first.
    fn view(&self, layer: LayerId) -> impl DoubleEndedIterator<Item = &Layer> {
        let upto = match layer {
            LayerId::Base => 0,
            LayerId::Patch(id) => self.patch_index(id).map_or(0, |i| i + 1),
        };
        self.patches[..upto]
            .iter()
            .rev()
            .map(|p| &p.layer)
            .chain(std::iter::once(&self.base))
    }

    /// Every layer, base included.
    fn all_layers(&self) -> impl Iterator<Item = &Layer> {
        std::iter::once(&self.base).chain(self.patches.iter().map(|p| &p.layer))
    }

    fn layer_mut(&mut self, layer: LayerId) -> Option<&mut Layer> {
        match layer {
            LayerId::Base => Some(&mut self.base),
            LayerId::Patch(id) => {
                let index = self.patch_index(id)?;
                Some(&mut self.patches[index].layer)
            }
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Visible value of an entity field.
    pub fn read(&self, key: &EntityKey, field: &str) -> Option<&Value> {
        self.read_in(self.top_layer(), key, field)
    }

    /// Value of an entity field as seen from `layer`.
    pub fn read_in(&self, layer: LayerId, key: &EntityKey, field: &str) -> Option<&Value> {
        self.view(layer).find_map(|l| l.field(key, field))
    }

    /// Visible reference list of a slot.
    pub fn read_slot(&self, slot: &SlotKey) -> Option<&[EntityKey]> {
        self.read_slot_in(self.top_layer(), slot)
    }

    /// Reference list of a slot as seen from `layer`.
    pub fn read_slot_in(&self, layer: LayerId, slot: &SlotKey) -> Option<&[EntityKey]> {
        self.view(layer)
            .find_map(|l| l.slots.get(slot))
            .map(Vec::as_slice)
    }

    /// Whether an entity is visible from `layer`.
    pub fn contains_entity_in(&self, layer: LayerId, key: &EntityKey) -> bool {
        self.view(layer).any(|l| l.entities.contains_key(key))
    }

    /// All visible fields of an entity, merged across layers.
    pub fn entity_fields(&self, key: &EntityKey) -> Option<BTreeMap<String, Value>> {
        let mut merged: Option<BTreeMap<String, Value>> = None;
        for layer in self.view(self.top_layer()).rev() {
            if let Some(fields) = layer.entities.get(key) {
                let target = merged.get_or_insert_with(BTreeMap::new);
                for (name, value) in fields {
                    target.insert(name.clone(), value.clone());
                }
            }
        }
        merged
    }

    /// Slot keys of a root field visible from `layer`, sorted.
    pub fn slots_for_field_in(&self, layer: LayerId, field: &str) -> Vec<SlotKey> {
        let keys: BTreeSet<&SlotKey> = self
            .view(layer)
            .flat_map(|l| l.slots.keys())
            .filter(|slot| slot.field == field)
            .collect();
        keys.into_iter().cloned().collect()
    }

    /// Entities of a type visible from `layer`, sorted.
    pub fn entities_of_type_in(&self, layer: LayerId, type_name: &str) -> Vec<EntityKey> {
        let keys: BTreeSet<&EntityKey> = self
            .view(layer)
            .flat_map(|l| l.entities.keys())
            .filter(|key| key.type_name == type_name)
            .collect();
        keys.into_iter().cloned().collect()
    }

    /// Entity keys stored in the base layer.
    pub fn base_entities(&self) -> impl Iterator<Item = &EntityKey> {
        self.base.entities.keys()
    }

    /// Entities referenced by any field of `key`, across all layers.
    pub fn references_of(&self, key: &EntityKey) -> Vec<EntityKey> {
        self.all_layers()
            .filter_map(|l| l.entities.get(key))
            .flat_map(|fields| fields.values().flat_map(Value::references))
            .cloned()
            .collect()
    }

    /// Entities listed by any slot, in any layer.
    pub fn slot_roots(&self) -> impl Iterator<Item = &EntityKey> {
        self.all_layers().flat_map(|l| l.slots.values().flatten())
    }

    /// Entities written or referenced by unresolved patches.
    pub fn patch_roots(&self) -> impl Iterator<Item = &EntityKey> {
        self.patches
            .iter()
            .flat_map(|p| p.layer.referenced_entities())
    }

    /// Read-only helpers seeing the store from `layer`.
    pub fn helpers(&self, layer: LayerId) -> ReadHelpers<'_> {
        ReadHelpers { store: self, layer }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Open a writer on `layer`.
    ///
    /// Fails with [`CacheError::PatchConflict`] if the patch was already
    /// resolved.
    pub fn writer(&mut self, layer: LayerId) -> Result<CacheWriter<'_>, CacheError> {
        match layer {
            LayerId::Patch(patch) if !self.has_layer(layer) => {
                Err(CacheError::PatchConflict { patch })
            }
            _ => Ok(CacheWriter {
                store: self,
                layer,
                changes: ChangeSet::default(),
            }),
        }
    }

    /// Upsert a single entity field into `layer`.
    pub fn write(
        &mut self,
        key: &EntityKey,
        field: &str,
        value: Value,
        layer: LayerId,
    ) -> Result<ChangeSet, CacheError> {
        let mut writer = self.writer(layer)?;
        writer.write_field(key, field, value);
        Ok(writer.into_changes())
    }

    /// Apply a pure transform to a base slot's reference list.
    ///
    /// A slot that was never written is left untouched.
    pub fn modify_field<F>(&mut self, slot: &SlotKey, transform: F) -> ChangeSet
    where
        F: FnOnce(&[EntityKey], &ReadHelpers<'_>) -> Vec<EntityKey>,
    {
        let mut writer = CacheWriter {
            store: self,
            layer: LayerId::Base,
            changes: ChangeSet::default(),
        };
        writer.modify_field(slot, transform);
        writer.into_changes()
    }

    /// Push a new, empty patch layer on top of the stack.
    pub fn push_patch(&mut self, name: impl Into<String>) -> PatchId {
        self.next_patch += 1;
        let id = PatchId(self.next_patch);
        let name = name.into();
        debug!("Pushed patch {} for '{}'", id, name);
        self.patches.push(Patch {
            id,
            name,
            layer: Layer::default(),
            replay: None,
        });
        id
    }

    /// Push a patch built by `replay` and keep `replay` to rebuild it
    /// whenever a patch beneath it resolves.
    pub fn push_replayable_patch(
        &mut self,
        name: impl Into<String>,
        replay: PatchReplay,
    ) -> (PatchId, ChangeSet) {
        let id = self.push_patch(name);
        let mut writer = CacheWriter {
            store: self,
            layer: LayerId::Patch(id),
            changes: ChangeSet::default(),
        };
        replay(&mut writer);
        let changes = writer.into_changes();
        if let Some(patch) = self.patches.last_mut() {
            patch.replay = Some(replay);
        }
        (id, changes)
    }

    /// Drop a patch without touching the base layer.
    pub fn discard_patch(&mut self, id: PatchId) -> Result<ChangeSet, CacheError> {
        let (index, patch) = self.remove_patch(id)?;
        let mut changes = patch.layer.touched();
        self.replay_patches_from(index, &mut changes);
        changes.resolution = true;
        debug!(
            "Discarded patch {} for '{}' ({} keys)",
            id,
            patch.name,
            changes.len()
        );
        Ok(changes)
    }

    /// Pop a patch and apply the confirmed writes to base, in one step.
    pub fn commit_patch<F>(&mut self, id: PatchId, apply: F) -> Result<ChangeSet, CacheError>
    where
        F: FnOnce(&mut CacheWriter<'_>),
    {
        let (index, patch) = self.remove_patch(id)?;
        let mut writer = CacheWriter {
            store: self,
            layer: LayerId::Base,
            changes: patch.layer.touched(),
        };
        apply(&mut writer);
        let mut changes = writer.into_changes();
        self.replay_patches_from(index, &mut changes);
        changes.resolution = true;
        debug!(
            "Committed patch {} for '{}' ({} keys)",
            id,
            patch.name,
            changes.len()
        );
        Ok(changes)
    }

    fn remove_patch(&mut self, id: PatchId) -> Result<(usize, Patch), CacheError> {
        let index = self
            .patch_index(id)
            .ok_or(CacheError::PatchConflict { patch: id })?;
        Ok((index, self.patches.remove(index)))
    }

    /// Rebuild the patches from `index` upwards, oldest first, recording
    /// the keys of both their stale and their rebuilt layers.
    fn replay_patches_from(&mut self, index: usize, changes: &mut ChangeSet) {
        for position in index..self.patches.len() {
            let Some(replay) = self.patches[position].replay.clone() else {
                continue;
            };
            let id = self.patches[position].id;
            let stale = std::mem::take(&mut self.patches[position].layer);
            changes.extend(stale.touched());

            let mut writer = CacheWriter {
                store: self,
                layer: LayerId::Patch(id),
                changes: ChangeSet::default(),
            };
            replay(&mut writer);
            changes.extend(writer.into_changes());
            changes.extend(self.patches[position].layer.touched());
            debug!("Replayed patch {} for '{}'", id, self.patches[position].name);
        }
    }

    /// Drop every base slot of a root field. Entities are left alone.
    pub fn evict_slot(&mut self, field: &str) -> ChangeSet {
        let mut changes = ChangeSet::default();
        self.base.slots.retain(|slot, _| {
            if slot.field == field {
                changes.slots.insert(slot.clone());
                false
            } else {
                true
            }
        });
        debug!("Evicted {} slots of '{}'", changes.slots.len(), field);
        changes
    }

    /// Remove an entity from the base layer.
    pub fn evict_entity(&mut self, key: &EntityKey) -> bool {
        self.base.entities.remove(key).is_some()
    }

    /// Returns whether the visible value changed.
    fn set_field(&mut self, layer: LayerId, key: &EntityKey, field: &str, value: Value) -> bool {
        let before = self.read(key, field).cloned();
        let Some(target) = self.layer_mut(layer) else {
            return false;
        };
        target
            .entities
            .entry(key.clone())
            .or_default()
            .insert(field.to_string(), value);
        let changed = self.read(key, field) != before.as_ref();
        trace!("write {}.{} in {} (changed: {})", key, field, layer, changed);
        changed
    }

    fn set_slot(&mut self, layer: LayerId, slot: &SlotKey, refs: Vec<EntityKey>) -> bool {
        let before = self.read_slot(slot).map(<[EntityKey]>::to_vec);
        let Some(target) = self.layer_mut(layer) else {
            return false;
        };
        target.slots.insert(slot.clone(), refs);
        let changed = self.read_slot(slot) != before.as_deref();
        trace!("write slot {} in {} (changed: {})", slot, layer, changed);
        changed
    }

    /// Serialize the base layer as JSON, for inspection.
    ///
    /// References render as `{"__ref": "Type:id"}`; slots are grouped
    /// under `ROOT_QUERY`.
    pub fn extract(&self) -> serde_json::Value {
        let mut out = Map::new();

        let mut root = Map::new();
        if !self.base.slots.is_empty() {
            root.insert("__typename".to_string(), json!(ROOT_QUERY_TYPE));
            for (slot, refs) in &self.base.slots {
                root.insert(slot.to_string(), refs_json(refs));
            }
            out.insert(ROOT_QUERY.to_string(), serde_json::Value::Object(root));
        }

        for (key, fields) in &self.base.entities {
            let mut entity = Map::new();
            entity.insert("__typename".to_string(), json!(key.type_name));
            for (name, value) in fields {
                entity.insert(name.clone(), value_json(value));
            }
            out.insert(key.to_string(), serde_json::Value::Object(entity));
        }

        serde_json::Value::Object(out)
    }
}

fn ref_json(key: &EntityKey) -> serde_json::Value {
    json!({ "__ref": key.to_string() })
}

fn refs_json(keys: &[EntityKey]) -> serde_json::Value {
    serde_json::Value::Array(keys.iter().map(ref_json).collect())
}

fn value_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Scalar(v) => v.clone(),
        Value::Ref(key) => ref_json(key),
        Value::RefList(keys) => refs_json(keys),
    }
}

/// Read-only view handed to transforms.
#[derive(Clone, Copy)]
pub struct ReadHelpers<'a> {
    store: &'a CacheStore,
    layer: LayerId,
}

impl<'a> ReadHelpers<'a> {
    /// Read an entity field.
    pub fn read_field(&self, key: &EntityKey, field: &str) -> Option<&'a Value> {
        self.store.read_in(self.layer, key, field)
    }

    /// Read a string scalar field.
    pub fn read_str(&self, key: &EntityKey, field: &str) -> Option<&'a str> {
        self.read_field(key, field)
            .and_then(Value::as_scalar)
            .and_then(serde_json::Value::as_str)
    }

    /// Whether the entity exists.
    pub fn exists(&self, key: &EntityKey) -> bool {
        self.store.contains_entity_in(self.layer, key)
    }
}

/// Writes into one layer, recording what became visibly different.
pub struct CacheWriter<'a> {
    store: &'a mut CacheStore,
    layer: LayerId,
    changes: ChangeSet,
}

impl<'a> CacheWriter<'a> {
    /// The layer being written.
    pub fn layer(&self) -> LayerId {
        self.layer
    }

    /// Helpers seeing the store from this writer's layer.
    pub fn helpers(&self) -> ReadHelpers<'_> {
        self.store.helpers(self.layer)
    }

    /// Read an entity field from this writer's layer.
    pub fn read_field(&self, key: &EntityKey, field: &str) -> Option<&Value> {
        self.store.read_in(self.layer, key, field)
    }

    /// Read a slot from this writer's layer.
    pub fn read_slot(&self, slot: &SlotKey) -> Option<&[EntityKey]> {
        self.store.read_slot_in(self.layer, slot)
    }

    /// Slots of a root field visible from this writer's layer.
    pub fn slots_for_field(&self, field: &str) -> Vec<SlotKey> {
        self.store.slots_for_field_in(self.layer, field)
    }

    /// Upsert an entity field.
    pub fn write_field(&mut self, key: &EntityKey, field: &str, value: Value) {
        if self.store.set_field(self.layer, key, field, value) {
            self.changes.entities.insert(key.clone());
        }
    }

    /// Replace a slot's reference list.
    pub fn write_slot(&mut self, slot: &SlotKey, refs: Vec<EntityKey>) {
        if self.store.set_slot(self.layer, slot, refs) {
            self.changes.slots.insert(slot.clone());
        }
    }

    /// Apply a pure transform to a slot's reference list.
    ///
    /// Returns false when the slot does not exist in this view.
    pub fn modify_field<F>(&mut self, slot: &SlotKey, transform: F) -> bool
    where
        F: FnOnce(&[EntityKey], &ReadHelpers<'_>) -> Vec<EntityKey>,
    {
        let Some(current) = self.store.read_slot_in(self.layer, slot) else {
            return false;
        };
        let next = transform(current, &self.store.helpers(self.layer));
        self.write_slot(slot, next);
        true
    }

    /// Run every modifier of a dispatch table against this layer.
    ///
    /// Modifiers registered on the root query type apply to every slot of
    /// their field; others apply to that field on every entity of their
    /// type. Returns the number of fields visited.
    pub fn modify(&mut self, modifiers: &Modifiers) -> usize {
        let mut visited = 0;
        for (type_name, field, modifier) in modifiers.iter() {
            if type_name == ROOT_QUERY_TYPE {
                for slot in self.slots_for_field(field) {
                    let Some(current) = self.read_slot(&slot) else {
                        continue;
                    };
                    let current = Value::RefList(current.to_vec());
                    let next = modifier(&current, &self.helpers());
                    visited += 1;
                    match next {
                        Value::RefList(refs) => self.write_slot(&slot, refs),
                        _ => warn!("Modifier for slot {} returned a non-list value", slot),
                    }
                }
            } else {
                for key in self.store.entities_of_type_in(self.layer, type_name) {
                    let Some(current) = self.read_field(&key, field).cloned() else {
                        continue;
                    };
                    let next = modifier(&current, &self.helpers());
                    visited += 1;
                    self.write_field(&key, field, next);
                }
            }
        }
        visited
    }

    /// Apply normalized response writes.
    pub fn apply(&mut self, writes: &NormalizedWrites) {
        for (key, fields) in &writes.entities {
            for (field, value) in fields {
                self.write_field(key, field, value.clone());
            }
        }
        for (slot, refs) in &writes.slots {
            self.write_slot(slot, refs.clone());
        }
    }

    /// Changes recorded so far.
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    /// Finish writing and return the recorded changes.
    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }
}
