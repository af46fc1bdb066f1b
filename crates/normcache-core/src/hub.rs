//! Subscription Hub
//!
//! Keeps the registered watchers in subscription order and decides which
//! of them a write concerns. Rendering is supplied by the caller so the
//! hub never locks the store itself.
//!
//! Callbacks run with no hub or store lock held: a callback may read the
//! cache or unsubscribe any watcher, including ones later in the same
//! delivery round (those are then skipped).
//!
//! Lock order is registry, then store. `deliver` releases the registry
//! before rendering, so it never holds both.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::descriptor::QueryDescriptor;
use crate::normalize::Rendered;
use crate::slots::FetchPolicy;
use crate::store::ChangeSet;
use crate::types::{QueryResult, SlotKey};

/// Callback invoked with each delivered result.
pub type WatchCallback = Arc<dyn Fn(&QueryResult) + Send + Sync>;

/// Identifier of a registered watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

struct Watcher {
    id: WatcherId,
    descriptor: QueryDescriptor,
    slot: SlotKey,
    policy: FetchPolicy,
    active: AtomicBool,
    callback: WatchCallback,
    /// Last delivered result and the keys it depends on
    last: Mutex<Rendered>,
}

impl Watcher {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Record a fresh rendering; returns the result to deliver, if any.
    fn accept(&self, rendered: Rendered, force: bool) -> Option<QueryResult> {
        let mut last = self.last.lock();
        let changed = last.data != rendered.data;
        *last = rendered;
        (changed || force).then(|| QueryResult::from_cache(last.data.clone()))
    }
}

/// Registry of live watchers.
#[derive(Default)]
pub struct SubscriptionHub {
    watchers: Mutex<Vec<Arc<Watcher>>>,
    next_id: AtomicU64,
}

impl SubscriptionHub {
    /// Create an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of active watchers.
    pub fn len(&self) -> usize {
        self.watchers.lock().len()
    }

    /// True if no watcher is registered.
    pub fn is_empty(&self) -> bool {
        self.watchers.lock().is_empty()
    }

    /// Register a watcher and deliver its initial result synchronously.
    pub fn subscribe(
        self: &Arc<Self>,
        descriptor: QueryDescriptor,
        slot: SlotKey,
        policy: FetchPolicy,
        callback: WatchCallback,
        initial: Rendered,
    ) -> WatchHandle {
        self.subscribe_with(descriptor, slot, policy, callback, |_, _| initial)
    }

    /// Like [`subscribe`](Self::subscribe), rendering the initial result
    /// while the registry is locked.
    ///
    /// A [`deliver`](Self::deliver) that starts after `render` has read the
    /// store already sees the new watcher, so no write falls between the
    /// initial rendering and the first notification. The initial callback
    /// runs after the lock is released and reports the watcher's latest
    /// result.
    pub fn subscribe_with<R>(
        self: &Arc<Self>,
        descriptor: QueryDescriptor,
        slot: SlotKey,
        policy: FetchPolicy,
        callback: WatchCallback,
        render: R,
    ) -> WatchHandle
    where
        R: FnOnce(&QueryDescriptor, &SlotKey) -> Rendered,
    {
        let id = WatcherId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let watcher = {
            let mut watchers = self.watchers.lock();
            let initial = render(&descriptor, &slot);
            let watcher = Arc::new(Watcher {
                id,
                descriptor,
                slot,
                policy,
                active: AtomicBool::new(true),
                callback,
                last: Mutex::new(initial),
            });
            watchers.push(Arc::clone(&watcher));
            watcher
        };
        debug!(
            "Subscribed watcher {} to {} ({})",
            id, watcher.slot, watcher.policy
        );

        let first = QueryResult::from_cache(watcher.last.lock().data.clone());
        (watcher.callback)(&first);

        WatchHandle {
            watcher,
            hub: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: WatcherId) {
        self.watchers.lock().retain(|w| w.id != id);
    }

    /// Deliver one logical write to every watcher it concerns.
    ///
    /// Watchers are visited in subscription order. For a patch resolution
    /// every dependent watcher is called; otherwise only those whose
    /// rendered result changed. Returns the number of callbacks invoked.
    pub fn deliver<R>(&self, changes: &ChangeSet, render: R) -> usize
    where
        R: Fn(&QueryDescriptor, &SlotKey) -> Rendered,
    {
        if changes.is_empty() {
            return 0;
        }

        // Snapshot so callbacks may (un)subscribe without deadlocking
        let snapshot: Vec<Arc<Watcher>> = self.watchers.lock().clone();
        let mut delivered = 0;

        for watcher in snapshot {
            if !watcher.is_active() {
                continue;
            }
            if !watcher.last.lock().dependencies.affected_by(changes) {
                continue;
            }

            let rendered = render(&watcher.descriptor, &watcher.slot);
            let Some(result) = watcher.accept(rendered, changes.resolution) else {
                trace!("Watcher {} unchanged", watcher.id);
                continue;
            };

            // An earlier callback in this round may have unsubscribed it
            if !watcher.is_active() {
                continue;
            }
            trace!("Notifying watcher {}", watcher.id);
            (watcher.callback)(&result);
            delivered += 1;
        }

        if delivered > 0 {
            debug!(
                "Delivered {} notifications for {} changed keys",
                delivered,
                changes.len()
            );
        }
        delivered
    }
}

/// Handle to a registered watcher.
pub struct WatchHandle {
    watcher: Arc<Watcher>,
    hub: Weak<SubscriptionHub>,
}

impl WatchHandle {
    /// The watcher's id.
    pub fn id(&self) -> WatcherId {
        self.watcher.id
    }

    /// The slot being watched.
    pub fn slot(&self) -> &SlotKey {
        &self.watcher.slot
    }

    /// The watcher's fetch policy.
    pub fn policy(&self) -> FetchPolicy {
        self.watcher.policy
    }

    /// Whether the watcher still receives notifications.
    pub fn is_active(&self) -> bool {
        self.watcher.is_active()
    }

    /// Last result the watcher rendered.
    pub fn current(&self) -> QueryResult {
        QueryResult::from_cache(self.watcher.last.lock().data.clone())
    }

    /// Stop notifications, effective immediately.
    ///
    /// Idempotent: returns true only for the call that unsubscribed.
    pub fn unsubscribe(&self) -> bool {
        if !self.watcher.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.watcher.id);
        }
        debug!("Unsubscribed watcher {}", self.watcher.id);
        true
    }
}

impl fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchHandle")
            .field("id", &self.watcher.id)
            .field("slot", &self.watcher.slot)
            .field("active", &self.is_active())
            .finish()
    }
}
