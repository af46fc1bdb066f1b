//! Mutation Coordinator
//!
//! Drives each mutation through
//! `Pending -> Resolving -> {Committed | RolledBack}`.
//!
//! `start` pushes a patch holding the optimistic result. `commit` writes
//! the server result into base and pops the patch in one store call;
//! `roll_back` only pops it. Both consume the [`PendingMutation`] so a
//! mutation cannot be resolved twice through the public API.
//!
//! The coordinator only remembers unresolved mutations; a resolved id is
//! forgotten, and resolving it again is a `PatchConflict`.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::descriptor::QueryDescriptor;
use crate::error::CacheError;
use crate::normalize::{NormalizedWrites, Normalizer};
use crate::slots::Variables;
use crate::store::{CacheStore, CacheWriter, ChangeSet, PatchId, PatchReplay};
use crate::types::SlotKey;

/// Cache update run against the patch (optimistic data) and again against
/// base (server data) on commit.
pub type UpdateFn = Arc<dyn Fn(&mut CacheWriter<'_>, &serde_json::Value) + Send + Sync>;

/// Lifecycle of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    /// Optimistic patch applied, awaiting the network
    Pending,
    /// Network answered, outcome being applied
    Resolving,
    /// Server result merged into base
    Committed,
    /// Patch discarded
    RolledBack,
}

impl MutationState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

/// Identifier of a started mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MutationId(u64);

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// A mutation to run.
#[derive(Clone)]
pub struct MutationRequest {
    /// Mutation descriptor
    pub descriptor: QueryDescriptor,
    /// Variables sent to the server
    pub variables: Variables,
    /// Response assumed until the server answers
    pub optimistic: Option<serde_json::Value>,
    /// Cache update applied with the optimistic and the server data
    pub update: Option<UpdateFn>,
}

impl MutationRequest {
    /// A mutation without optimistic data or update.
    pub fn new(descriptor: QueryDescriptor, variables: Variables) -> Self {
        Self {
            descriptor,
            variables,
            optimistic: None,
            update: None,
        }
    }

    /// Set the optimistic response data.
    pub fn with_optimistic(mut self, data: serde_json::Value) -> Self {
        self.optimistic = Some(data);
        self
    }

    /// Set the cache update.
    pub fn with_update<F>(mut self, update: F) -> Self
    where
        F: Fn(&mut CacheWriter<'_>, &serde_json::Value) + Send + Sync + 'static,
    {
        self.update = Some(Arc::new(update));
        self
    }

    pub(crate) fn root_slot(&self) -> SlotKey {
        SlotKey::new(&self.descriptor.root_field, "")
    }
}

impl fmt::Debug for MutationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRequest")
            .field("operation", &self.descriptor.operation_name)
            .field("variables", &self.variables)
            .field("optimistic", &self.optimistic)
            .field("has_update", &self.update.is_some())
            .finish()
    }
}

/// A started, unresolved mutation.
#[derive(Debug)]
pub struct PendingMutation {
    id: MutationId,
    patch: PatchId,
    request: MutationRequest,
}

impl PendingMutation {
    /// The mutation id.
    pub fn id(&self) -> MutationId {
        self.id
    }

    /// The patch holding the optimistic result.
    pub fn patch(&self) -> PatchId {
        self.patch
    }

    /// The request being run.
    pub fn request(&self) -> &MutationRequest {
        &self.request
    }
}

/// Tracks mutation state and applies patches to the store.
#[derive(Debug, Default)]
pub struct MutationCoordinator {
    states: HashMap<MutationId, MutationState>,
    next_id: u64,
}

impl MutationCoordinator {
    /// Create a coordinator with no mutations.
    pub fn new() -> Self {
        Self::default()
    }

    /// State of an unresolved mutation; `None` once it was resolved.
    pub fn state(&self, id: MutationId) -> Option<MutationState> {
        self.states.get(&id).copied()
    }

    /// Number of mutations not yet in a terminal state.
    pub fn in_flight(&self) -> usize {
        self.states.len()
    }

    /// Push a patch holding the optimistic result.
    ///
    /// If the optimistic data does not normalize, the patch is dropped
    /// again and the mutation never starts.
    pub fn start(
        &mut self,
        store: &mut CacheStore,
        normalizer: &Normalizer,
        request: MutationRequest,
    ) -> Result<(PendingMutation, ChangeSet), CacheError> {
        let optimistic = match &request.optimistic {
            Some(data) => Some(normalizer.normalize(&request.descriptor, &request.root_slot(), data)?),
            None => None,
        };

        self.next_id += 1;
        let id = MutationId(self.next_id);
        let name = &request.descriptor.operation_name;
        let (patch, changes) = match (optimistic, request.optimistic.clone()) {
            (Some(writes), Some(data)) => {
                let update = request.update.clone();
                let replay: PatchReplay = Arc::new(move |writer: &mut CacheWriter<'_>| {
                    writer.apply(&writes);
                    if let Some(update) = &update {
                        update(writer, &data);
                    }
                });
                store.push_replayable_patch(name, replay)
            }
            _ => (store.push_patch(name), ChangeSet::default()),
        };

        self.states.insert(id, MutationState::Pending);
        info!(
            "Started mutation {} '{}' on patch {} ({} optimistic changes)",
            id,
            request.descriptor.operation_name,
            patch,
            changes.len()
        );

        Ok((PendingMutation { id, patch, request }, changes))
    }

    fn begin_resolving(&mut self, pending: &PendingMutation) -> Result<(), CacheError> {
        match self.states.get_mut(&pending.id) {
            Some(state) if *state == MutationState::Pending => {
                *state = MutationState::Resolving;
                Ok(())
            }
            other => {
                error!(
                    "Mutation {} resolved from state {:?}",
                    pending.id,
                    other.map(|s| *s)
                );
                Err(CacheError::PatchConflict {
                    patch: pending.patch,
                })
            }
        }
    }

    fn finish(&mut self, id: MutationId, state: MutationState) {
        self.states.remove(&id);
        debug!("Mutation {} reached {:?}", id, state);
    }

    /// Forget a mutation whose patch could not be resolved.
    fn abandon(&mut self, pending: &PendingMutation, err: CacheError) -> CacheError {
        self.states.remove(&pending.id);
        error!("Mutation {} abandoned: {}", pending.id, err);
        err
    }

    /// Apply the server result to base and drop the patch, atomically.
    pub fn commit(
        &mut self,
        store: &mut CacheStore,
        pending: PendingMutation,
        writes: &NormalizedWrites,
        data: &serde_json::Value,
    ) -> Result<ChangeSet, CacheError> {
        self.begin_resolving(&pending)?;
        let update = pending.request.update.clone();
        let changes = store
            .commit_patch(pending.patch, |writer| {
                writer.apply(writes);
                if let Some(update) = &update {
                    update(writer, data);
                }
            })
            .map_err(|e| self.abandon(&pending, e))?;
        self.finish(pending.id, MutationState::Committed);
        info!(
            "Committed mutation {} '{}' ({} changes)",
            pending.id,
            pending.request.descriptor.operation_name,
            changes.len()
        );
        Ok(changes)
    }

    /// Drop the patch, leaving base untouched.
    pub fn roll_back(
        &mut self,
        store: &mut CacheStore,
        pending: PendingMutation,
    ) -> Result<ChangeSet, CacheError> {
        self.begin_resolving(&pending)?;
        let changes = store
            .discard_patch(pending.patch)
            .map_err(|e| self.abandon(&pending, e))?;
        self.finish(pending.id, MutationState::RolledBack);
        warn!(
            "Rolled back mutation {} '{}'",
            pending.id, pending.request.descriptor.operation_name
        );
        debug!("Rollback touched {} keys", changes.len());
        Ok(changes)
    }
}
