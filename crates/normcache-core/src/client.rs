//! The caller-facing cache facade.
//!
//! [`NormalizedCache`] owns one store and wires the slot manager, hub,
//! mutation coordinator and sweeper around it. Cloning is cheap; clones
//! share the same store.
//!
//! The store lock is taken for each synchronous step and released before
//! any `.await` and before watcher callbacks run, so callbacks may read the
//! cache (or unsubscribe) re-entrantly.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::descriptor::QueryDescriptor;
use crate::error::CacheError;
use crate::gc::{GcReport, GcSweeper};
use crate::hub::{SubscriptionHub, WatchHandle};
use crate::link::{Link, Operation, Response};
use crate::metrics::CacheMetrics;
use crate::mutation::{MutationCoordinator, MutationRequest};
use crate::normalize::{render, NormalizedWrites, Normalizer, DEFAULT_ID_FIELD, DEFAULT_TYPENAME_FIELD};
use crate::policies::{Modifiers, TypePolicies};
use crate::slots::{FetchPolicy, QuerySlotManager, Variables};
use crate::store::{CacheStore, ChangeSet, LayerId};
use crate::types::{GraphQlError, QueryResult, ResultSource, SlotKey};

/// Construction options for [`NormalizedCache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Key-argument declarations per root field
    pub type_policies: TypePolicies,
    /// Run the sweeper after each commit or rollback
    pub gc_after_mutation: bool,
    /// Field holding an entity's id
    pub id_field: String,
    /// Field holding an entity's type name
    pub typename_field: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            type_policies: TypePolicies::default(),
            gc_after_mutation: true,
            id_field: DEFAULT_ID_FIELD.to_string(),
            typename_field: DEFAULT_TYPENAME_FIELD.to_string(),
        }
    }
}

impl CacheOptions {
    /// Replace the type policies.
    pub fn with_type_policies(mut self, policies: TypePolicies) -> Self {
        self.type_policies = policies;
        self
    }

    /// Enable or disable the post-mutation sweep.
    pub fn with_gc_after_mutation(mut self, enabled: bool) -> Self {
        self.gc_after_mutation = enabled;
        self
    }
}

#[derive(Debug, Default)]
struct CacheState {
    store: CacheStore,
    coordinator: MutationCoordinator,
    metrics: CacheMetrics,
}

struct Inner {
    state: Mutex<CacheState>,
    hub: Arc<SubscriptionHub>,
    link: Arc<dyn Link>,
    slots: QuerySlotManager,
    normalizer: Normalizer,
    gc_after_mutation: bool,
}

/// Normalized object cache with live watchers and optimistic mutations.
#[derive(Clone)]
pub struct NormalizedCache {
    inner: Arc<Inner>,
}

impl NormalizedCache {
    /// Create a cache with default options.
    pub fn new(link: Arc<dyn Link>) -> Self {
        Self::with_options(link, CacheOptions::default())
    }

    /// Create a cache with explicit options.
    pub fn with_options(link: Arc<dyn Link>, options: CacheOptions) -> Self {
        debug!(
            "Creating cache over link '{}' (gc after mutation: {})",
            link.name(),
            options.gc_after_mutation
        );
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(CacheState::default()),
                hub: SubscriptionHub::new(),
                link,
                slots: QuerySlotManager::new(options.type_policies),
                normalizer: Normalizer::new(options.id_field, options.typename_field),
                gc_after_mutation: options.gc_after_mutation,
            }),
        }
    }

    /// Slot a descriptor resolves to for the given variables.
    pub fn slot_for(&self, descriptor: &QueryDescriptor, variables: &Variables) -> SlotKey {
        self.inner.slots.resolve_for(descriptor, variables)
    }

    /// Run a query under `policy`.
    ///
    /// Cache-only never fails on absence: a miss resolves with no data.
    /// Network-only fails when the link fails or the response carries no
    /// usable data; partial errors are returned alongside the data.
    pub async fn query(
        &self,
        descriptor: &QueryDescriptor,
        variables: &Variables,
        policy: FetchPolicy,
    ) -> Result<QueryResult, CacheError> {
        match policy {
            FetchPolicy::CacheOnly => Ok(self.read_query(descriptor, variables)),
            FetchPolicy::NetworkOnly => self.fetch(descriptor, variables).await,
        }
    }

    async fn fetch(
        &self,
        descriptor: &QueryDescriptor,
        variables: &Variables,
    ) -> Result<QueryResult, CacheError> {
        let operation = Operation::new(descriptor.clone(), variables.clone());
        info!(
            "Requesting '{}' via {}",
            operation.name(),
            self.inner.link.name()
        );

        let response = self.inner.link.request(&operation).await.map_err(|e| {
            warn!("Request '{}' failed: {}", operation.name(), e);
            CacheError::from(e)
        })?;
        let Response { data, errors } = response;
        let data = usable_data(&descriptor.operation_name, data, &errors)?;
        if !errors.is_empty() {
            warn!(
                "Request '{}' returned {} field errors with partial data",
                operation.name(),
                errors.len()
            );
        }

        let slot = self.slot_for(descriptor, variables);
        let rendered = self.write_result(descriptor, &slot, &data)?;
        self.inner.state.lock().metrics.record_network_write();
        let data = match (&descriptor.shape, rendered) {
            (None, _) => data,
            (Some(_), Some(rendered)) => rendered,
            // Stored, but a listed entity lacks a selected field
            (Some(_), None) if errors.is_empty() => {
                return Err(CacheError::no_data(&descriptor.operation_name))
            }
            (Some(_), None) => {
                return Err(CacheError::graphql(&descriptor.operation_name, errors))
            }
        };

        Ok(QueryResult {
            data: Some(data),
            errors,
            source: ResultSource::Network,
        })
    }

    /// Normalize `data` into base as if `descriptor` had returned it.
    pub fn write_query(
        &self,
        descriptor: &QueryDescriptor,
        variables: &Variables,
        data: &serde_json::Value,
    ) -> Result<(), CacheError> {
        let slot = self.slot_for(descriptor, variables);
        self.write_result(descriptor, &slot, data).map(|_| ())
    }

    /// Write a response into base, deliver, and render the slot again.
    fn write_result(
        &self,
        descriptor: &QueryDescriptor,
        slot: &SlotKey,
        data: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>, CacheError> {
        let writes = self.inner.normalizer.normalize(descriptor, slot, data)?;
        let (changes, rendered) = {
            let mut state = self.inner.state.lock();
            let changes = apply_to_base(&mut state.store, &writes)?;
            (changes, render(&state.store, descriptor, slot).data)
        };
        debug!(
            "Stored '{}' into {} ({} changed keys)",
            descriptor.operation_name,
            slot,
            changes.len()
        );
        self.broadcast(&changes);
        Ok(rendered)
    }

    /// Synchronous cache-only read.
    pub fn read_query(&self, descriptor: &QueryDescriptor, variables: &Variables) -> QueryResult {
        let slot = self.slot_for(descriptor, variables);
        let mut state = self.inner.state.lock();
        let rendered = render(&state.store, descriptor, &slot);
        state.metrics.record_read(rendered.data.is_some());
        QueryResult::from_cache(rendered.data)
    }

    /// Register a watcher.
    ///
    /// The callback receives the current result before this returns. A
    /// network-only watcher also issues one request on the current tokio
    /// runtime and then follows the cache.
    pub fn watch<F>(
        &self,
        descriptor: QueryDescriptor,
        variables: Variables,
        policy: FetchPolicy,
        callback: F,
    ) -> WatchHandle
    where
        F: Fn(&QueryResult) + Send + Sync + 'static,
    {
        let slot = self.slot_for(&descriptor, &variables);
        let handle = self.inner.hub.subscribe_with(
            descriptor.clone(),
            slot,
            policy,
            Arc::new(callback),
            |descriptor, slot| render(&self.inner.state.lock().store, descriptor, slot),
        );

        if policy == FetchPolicy::NetworkOnly {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let cache = self.clone();
                    let id = handle.id();
                    runtime.spawn(async move {
                        if let Err(e) = cache.fetch(&descriptor, &variables).await {
                            warn!("Initial fetch for watcher {} failed: {}", id, e);
                        }
                    });
                }
                Err(_) => warn!(
                    "No tokio runtime; watcher {} on {} only follows the cache",
                    handle.id(),
                    handle.slot()
                ),
            }
        }
        handle
    }

    /// Run a mutation: optimistic patch, network round trip, then commit
    /// or roll back.
    ///
    /// Any failure (link error, field errors, missing or malformed data)
    /// rolls the patch back before the error is returned.
    pub async fn mutate(&self, request: MutationRequest) -> Result<QueryResult, CacheError> {
        let operation = Operation::new(request.descriptor.clone(), request.variables.clone());
        let root_slot = request.root_slot();

        let (pending, changes) = {
            let mut state = self.inner.state.lock();
            let state = &mut *state;
            state
                .coordinator
                .start(&mut state.store, &self.inner.normalizer, request)?
        };
        self.broadcast(&changes);

        info!(
            "Sending mutation '{}' via {}",
            operation.name(),
            self.inner.link.name()
        );
        let outcome = match self.inner.link.request(&operation).await {
            Ok(Response { data, errors }) if errors.is_empty() => {
                usable_data(operation.name(), data, &errors).and_then(|data| {
                    let writes = self
                        .inner
                        .normalizer
                        .normalize(&operation.descriptor, &root_slot, &data)?;
                    Ok((writes, data))
                })
            }
            Ok(Response { errors, .. }) => Err(CacheError::graphql(operation.name(), errors)),
            Err(e) => Err(CacheError::from(e)),
        };

        match outcome {
            Ok((writes, data)) => {
                let changes = {
                    let mut state = self.inner.state.lock();
                    let state = &mut *state;
                    let changes = state
                        .coordinator
                        .commit(&mut state.store, pending, &writes, &data)?;
                    state.metrics.record_commit();
                    changes
                };
                self.broadcast(&changes);
                self.sweep_after_mutation();
                Ok(QueryResult {
                    data: Some(data),
                    errors: Vec::new(),
                    source: ResultSource::Network,
                })
            }
            Err(err) => {
                warn!("Mutation '{}' failed: {}", operation.name(), err);
                let changes = {
                    let mut state = self.inner.state.lock();
                    let state = &mut *state;
                    let changes = state.coordinator.roll_back(&mut state.store, pending)?;
                    state.metrics.record_rollback();
                    changes
                };
                self.broadcast(&changes);
                self.sweep_after_mutation();
                Err(err)
            }
        }
    }

    fn sweep_after_mutation(&self) {
        if self.inner.gc_after_mutation {
            self.gc();
        }
    }

    /// Drop every slot of a root field and notify its watchers.
    ///
    /// Entities stay until the next [`gc`](Self::gc). Returns the number
    /// of slots removed.
    pub fn evict_slot(&self, field: &str) -> usize {
        let changes = self.inner.state.lock().store.evict_slot(field);
        let evicted = changes.slots.len();
        self.broadcast(&changes);
        evicted
    }

    /// Evict entities unreachable from any slot or pending mutation.
    pub fn gc(&self) -> GcReport {
        let report = {
            let mut state = self.inner.state.lock();
            let report = GcSweeper::sweep(&mut state.store);
            state.metrics.record_evictions(report.count());
            report
        };
        self.broadcast(&report.changes());
        report
    }

    /// Run modifiers against the base layer. Returns the fields visited.
    pub fn modify(&self, modifiers: &Modifiers) -> Result<usize, CacheError> {
        let (visited, changes) = {
            let mut state = self.inner.state.lock();
            let mut writer = state.store.writer(LayerId::Base)?;
            let visited = writer.modify(modifiers);
            (visited, writer.into_changes())
        };
        debug!(
            "Applied {} modifiers to {} fields ({} changed keys)",
            modifiers.len(),
            visited,
            changes.len()
        );
        self.broadcast(&changes);
        Ok(visited)
    }

    /// Base layer as JSON.
    pub fn extract(&self) -> serde_json::Value {
        self.inner.state.lock().store.extract()
    }

    /// Snapshot of the cache counters.
    pub fn metrics(&self) -> CacheMetrics {
        self.inner.state.lock().metrics.clone()
    }

    /// Number of registered watchers.
    pub fn watcher_count(&self) -> usize {
        self.inner.hub.len()
    }

    /// Number of mutations still awaiting resolution.
    pub fn pending_mutations(&self) -> usize {
        self.inner.state.lock().coordinator.in_flight()
    }

    /// Deliver one logical write to the watchers it concerns.
    fn broadcast(&self, changes: &ChangeSet) {
        let delivered = self.inner.hub.deliver(changes, |descriptor, slot| {
            render(&self.inner.state.lock().store, descriptor, slot)
        });
        if delivered > 0 {
            self.inner.state.lock().metrics.record_notifications(delivered);
        }
    }
}

impl std::fmt::Debug for NormalizedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedCache")
            .field("link", &self.inner.link.name())
            .field("watchers", &self.inner.hub.len())
            .finish_non_exhaustive()
    }
}

fn apply_to_base(store: &mut CacheStore, writes: &NormalizedWrites) -> Result<ChangeSet, CacheError> {
    let mut writer = store.writer(LayerId::Base)?;
    writer.apply(writes);
    Ok(writer.into_changes())
}

/// Response data the cache can use, or the error explaining its absence.
fn usable_data(
    operation: &str,
    data: Option<serde_json::Value>,
    errors: &[GraphQlError],
) -> Result<serde_json::Value, CacheError> {
    match data {
        Some(data) if !data.is_null() => Ok(data),
        _ if !errors.is_empty() => Err(CacheError::graphql(operation, errors.to_vec())),
        _ => Err(CacheError::no_data(operation)),
    }
}
