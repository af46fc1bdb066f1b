//! Garbage collection of unreachable entities.
//!
//! Mark-and-sweep over the base layer. Roots are the entities listed by
//! any slot in any layer plus everything an unresolved patch writes or
//! points at, so a rollback never uncovers a dangling reference.

use std::collections::{BTreeSet, VecDeque};
use tracing::{debug, trace};

use crate::store::{CacheStore, ChangeSet};
use crate::types::EntityKey;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Evicted entities, sorted
    pub evicted: Vec<EntityKey>,
    /// Base entities still present
    pub retained: usize,
}

impl GcReport {
    /// Number of evicted entities.
    pub fn count(&self) -> usize {
        self.evicted.len()
    }

    /// The sweep expressed as a change set.
    pub fn changes(&self) -> ChangeSet {
        ChangeSet {
            entities: self.evicted.iter().cloned().collect(),
            ..ChangeSet::default()
        }
    }
}

/// Mark-and-sweep collector.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcSweeper;

impl GcSweeper {
    /// Entities reachable from the current roots.
    pub fn reachable(store: &CacheStore) -> BTreeSet<EntityKey> {
        let mut marked = BTreeSet::new();
        let mut queue: VecDeque<EntityKey> = store
            .slot_roots()
            .chain(store.patch_roots())
            .cloned()
            .collect();

        while let Some(key) = queue.pop_front() {
            if !marked.insert(key.clone()) {
                continue;
            }
            for next in store.references_of(&key) {
                if !marked.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
        trace!("Marked {} reachable entities", marked.len());
        marked
    }

    /// Evict every base entity not reachable from a root.
    pub fn sweep(store: &mut CacheStore) -> GcReport {
        let marked = Self::reachable(store);
        let mut evicted: Vec<EntityKey> = store
            .base_entities()
            .filter(|key| !marked.contains(*key))
            .cloned()
            .collect();
        evicted.sort();

        for key in &evicted {
            store.evict_entity(key);
        }

        let report = GcReport {
            evicted,
            retained: store.entity_count(),
        };
        if report.count() > 0 {
            debug!(
                "GC evicted {} entities, {} retained",
                report.count(),
                report.retained
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LayerId;
    use crate::types::{SlotKey, Value};
    use pretty_assertions::assert_eq;

    fn entry(id: &str) -> EntityKey {
        EntityKey::new("Entry", id)
    }

    fn slot() -> SlotKey {
        SlotKey::new("entries", r#"{"search":"1"}"#)
    }

    fn seeded() -> CacheStore {
        let mut store = CacheStore::new();
        let mut writer = store.writer(LayerId::Base).unwrap();
        for id in ["1", "2", "3"] {
            writer.write_field(&entry(id), "id", Value::string(id));
        }
        writer.write_slot(&slot(), vec![entry("1"), entry("2"), entry("3")]);
        store
    }

    #[test]
    fn test_sweep_keeps_listed_entities() {
        let mut store = seeded();
        let report = GcSweeper::sweep(&mut store);
        assert!(report.evicted.is_empty());
        assert_eq!(report.retained, 3);
    }

    #[test]
    fn test_sweep_evicts_unlisted_entities() {
        let mut store = seeded();
        store.modify_field(&slot(), |refs, _| refs[1..].to_vec());

        let report = GcSweeper::sweep(&mut store);
        assert_eq!(report.evicted, vec![entry("1")]);
        assert!(report.changes().touches_entity(&entry("1")));
        assert!(store.read(&entry("1"), "id").is_none());
        assert_eq!(store.entity_count(), 2);
    }

    #[test]
    fn test_sweep_follows_references() {
        let mut store = seeded();
        let author = EntityKey::new("User", "u1");
        let friend = EntityKey::new("User", "u2");
        store
            .write(&entry("1"), "author", Value::Ref(author.clone()), LayerId::Base)
            .unwrap();
        store
            .write(&author, "friends", Value::RefList(vec![friend.clone()]), LayerId::Base)
            .unwrap();
        store
            .write(&friend, "name", Value::string("Bo"), LayerId::Base)
            .unwrap();

        let report = GcSweeper::sweep(&mut store);
        assert!(report.evicted.is_empty());
        assert_eq!(report.retained, 5);
    }

    #[test]
    fn test_pending_patch_protects_base_entities() {
        let mut store = seeded();
        let patch = store.push_patch("removeEntry");
        store
            .writer(LayerId::Patch(patch))
            .unwrap()
            .write_slot(&slot(), vec![entry("2"), entry("3")]);

        // Entry:1 is still listed by the base slot underneath the patch
        let report = GcSweeper::sweep(&mut store);
        assert!(report.evicted.is_empty());

        store.discard_patch(patch).unwrap();
        assert_eq!(store.read_slot(&slot()).map(<[_]>::len), Some(3));
        assert!(store.read(&entry("1"), "id").is_some());
    }

    #[test]
    fn test_evicted_slot_releases_entities() {
        let mut store = seeded();
        store.evict_slot("entries");
        let report = GcSweeper::sweep(&mut store);
        assert_eq!(report.count(), 3);
        assert_eq!(report.retained, 0);
    }
}
