//! Consistency properties of the cache under writes, mutations and GC.
//!
//! Covers:
//! - write-order independence
//! - slot canonicalization through the facade
//! - optimistic commit and rollback as seen by watchers
//! - reachability-based collection, including pending mutations
//! - reads not blocked by outstanding requests

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use common::{
    cache_with_server, entries_query, ids, recorder, remove_entry, remove_entry_failed, search,
    EntriesServer,
};
use normcache_core::{
    CacheError, CacheOptions, CacheStore, EntityKey, FetchPolicy, LayerId, Modifiers,
    NormalizedCache, QueryDescriptor, Value, Variables,
};

// ============================================================================
// Store-level properties
// ============================================================================

#[test]
fn test_write_order_independence() {
    let writes = [
        (EntityKey::new("Entry", "1"), "id", Value::string("1")),
        (EntityKey::new("Entry", "1"), "title", Value::string("first")),
        (EntityKey::new("Entry", "2"), "id", Value::string("2")),
        (
            EntityKey::new("Entry", "2"),
            "next",
            Value::Ref(EntityKey::new("Entry", "1")),
        ),
    ];

    let mut forward = CacheStore::new();
    for (key, field, value) in writes.iter().cloned() {
        forward.write(&key, field, value, LayerId::Base).unwrap();
    }
    let mut backward = CacheStore::new();
    for (key, field, value) in writes.iter().rev().cloned() {
        backward.write(&key, field, value, LayerId::Base).unwrap();
    }

    assert_eq!(forward.extract(), backward.extract());
}

// ============================================================================
// Slots
// ============================================================================

#[tokio::test]
async fn test_non_key_args_share_a_slot() {
    let (cache, _server) = cache_with_server();

    let mut with_page = search("1");
    with_page.insert("page".into(), json!(2));
    assert_eq!(
        cache.slot_for(&entries_query(), &with_page),
        cache.slot_for(&entries_query(), &search("1"))
    );

    cache
        .query(&entries_query(), &with_page, FetchPolicy::NetworkOnly)
        .await
        .unwrap();
    let hit = cache.read_query(&entries_query(), &search("1"));
    assert_eq!(ids(&hit), vec!["1", "2", "3"]);
    assert!(cache.read_query(&entries_query(), &search("2")).is_miss());

    let metrics = cache.metrics();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
}

#[tokio::test]
async fn test_cache_only_never_requests() {
    let (cache, server) = cache_with_server();
    let result = cache
        .query(&entries_query(), &search("1"), FetchPolicy::CacheOnly)
        .await
        .unwrap();
    assert!(result.is_miss());
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_network_failure_rejects_query() {
    let (cache, server) = cache_with_server();
    server.set_offline(true);
    let err = cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Network(_)));
    assert!(err.is_remote());
}

// ============================================================================
// Optimistic mutations
// ============================================================================

#[tokio::test]
async fn test_commit_delivers_exactly_one_notification() {
    let (cache, server) = cache_with_server();
    cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap();
    let (seen, on_result) = recorder();
    let _watch = cache.watch(entries_query(), search("1"), FetchPolicy::CacheOnly, on_result);

    server.hold_requests(true);
    let task = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.mutate(remove_entry("1")).await })
    };
    server.gate.arrived().await;

    // Optimistic state is visible while the request is in flight
    assert_eq!(cache.pending_mutations(), 1);
    assert_eq!(ids(&cache.read_query(&entries_query(), &search("1"))), vec!["2", "3"]);
    let before_commit = seen.lock().len();
    assert_eq!(before_commit, 2);

    server.gate.release();
    task.await.unwrap().unwrap();

    assert_eq!(seen.lock().len(), before_commit + 1);
    assert_eq!(ids(&seen.lock()[before_commit]), vec!["2", "3"]);
    assert_eq!(cache.pending_mutations(), 0);
}

#[tokio::test]
async fn test_commit_matches_server_state() {
    let (cache, _server) = cache_with_server();
    cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap();
    cache.mutate(remove_entry("2")).await.unwrap();
    let committed = cache.extract();

    // Refetching from the server changes nothing
    cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap();
    assert_eq!(cache.extract(), committed);
}

#[tokio::test]
async fn test_rollback_restores_visible_state() {
    let (cache, server) = cache_with_server();
    cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap();
    let before = cache.extract();
    let before_read = cache.read_query(&entries_query(), &search("1"));

    let (seen, on_result) = recorder();
    let _watch = cache.watch(entries_query(), search("1"), FetchPolicy::CacheOnly, on_result);

    server.hold_requests(true);
    let task = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.mutate(remove_entry_failed("2")).await })
    };
    server.gate.arrived().await;
    assert_eq!(ids(&cache.read_query(&entries_query(), &search("1"))), vec!["1", "3"]);

    server.gate.release();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, CacheError::GraphQl { .. }));

    assert_eq!(cache.extract(), before);
    assert_eq!(cache.read_query(&entries_query(), &search("1")), before_read);
    // initial, optimistic, rollback
    assert_eq!(seen.lock().len(), 3);
    assert_eq!(server.entries(), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_independent_mutations_stack_in_call_order() {
    let (cache, server) = cache_with_server();
    cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap();

    server.hold_requests(true);
    let first = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.mutate(remove_entry("1")).await })
    };
    server.gate.arrived().await;
    let second = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.mutate(remove_entry_failed("3")).await })
    };
    server.gate.arrived().await;

    assert_eq!(cache.pending_mutations(), 2);
    assert_eq!(ids(&cache.read_query(&entries_query(), &search("1"))), vec!["2"]);

    server.gate.release();
    first.await.unwrap().unwrap();
    // The failing patch is still on top of the committed base
    assert_eq!(ids(&cache.read_query(&entries_query(), &search("1"))), vec!["2"]);

    server.gate.release();
    assert!(second.await.unwrap().is_err());
    assert_eq!(ids(&cache.read_query(&entries_query(), &search("1"))), vec!["2", "3"]);
}

#[tokio::test]
async fn test_reads_not_blocked_by_outstanding_request() {
    let (cache, server) = cache_with_server();
    cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap();

    server.hold_requests(true);
    let slow = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .query(&entries_query(), &search("2"), FetchPolicy::NetworkOnly)
                .await
        })
    };
    server.gate.arrived().await;

    assert_eq!(ids(&cache.read_query(&entries_query(), &search("1"))), vec!["1", "2", "3"]);
    cache.evict_slot("nothing");

    server.gate.release();
    assert_eq!(ids(&slow.await.unwrap().unwrap()), vec!["1", "2", "3"]);
}

// ============================================================================
// Garbage collection
// ============================================================================

#[tokio::test]
async fn test_gc_keeps_entities_of_pending_mutations() {
    let (cache, server) = cache_with_server();
    cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap();

    server.hold_requests(true);
    let task = {
        let cache = cache.clone();
        tokio::spawn(async move { cache.mutate(remove_entry_failed("1")).await })
    };
    server.gate.arrived().await;

    // The optimistic patch hides Entry:1 but base still lists it
    assert!(cache.gc().evicted.is_empty());

    server.gate.release();
    assert!(task.await.unwrap().is_err());
    assert_eq!(ids(&cache.read_query(&entries_query(), &search("1"))), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_gc_follows_references_and_evicts_orphans() {
    let server = EntriesServer::new(Vec::<String>::new());
    let cache = NormalizedCache::with_options(
        server,
        CacheOptions::default().with_gc_after_mutation(false),
    );
    let posts = QueryDescriptor::query("posts", "posts").returning_list("Post", ["id", "author"]);
    cache
        .write_query(
            &posts,
            &Variables::new(),
            &json!({"posts": [
                {"__typename": "Post", "id": "p1", "author": {"__typename": "User", "id": "u1", "name": "Ann"}},
                {"__typename": "Post", "id": "p2", "author": {"__typename": "User", "id": "u2", "name": "Bo"}}
            ]}),
        )
        .unwrap();

    assert!(cache.gc().evicted.is_empty());

    let rendered = cache.read_query(&posts, &Variables::new());
    assert_eq!(
        rendered.data.as_ref().map(|d| d["posts"][0]["author"]["name"].clone()),
        Some(json!("Ann"))
    );

    // Drop p1 from the list: p1 and its author become unreachable
    let modifiers = Modifiers::new().root_field("posts", |value, _| match value {
        Value::RefList(refs) => Value::RefList(refs[1..].to_vec()),
        other => other.clone(),
    });
    assert_eq!(cache.modify(&modifiers).unwrap(), 1);

    let report = cache.gc();
    assert_eq!(
        report.evicted,
        vec![EntityKey::new("Post", "p1"), EntityKey::new("User", "u1")]
    );
    assert_eq!(report.retained, 2);
}

#[tokio::test]
async fn test_unsubscribed_watcher_is_not_called() {
    let (cache, _server) = cache_with_server();
    let (seen, on_result) = recorder();
    let handle = cache.watch(entries_query(), search("1"), FetchPolicy::CacheOnly, on_result);
    assert!(handle.unsubscribe());
    assert!(!handle.unsubscribe());

    cache
        .query(&entries_query(), &search("1"), FetchPolicy::NetworkOnly)
        .await
        .unwrap();
    assert_eq!(seen.lock().len(), 1);
    assert!(!handle.is_active());
}
