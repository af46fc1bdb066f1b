//! Common test utilities for integration tests.
//!
//! This module provides an in-memory "entries" server behind the `Link`
//! trait plus the descriptors and mutations used across test files.

#![allow(dead_code)]
#![allow(unused_imports)]

pub mod entries_server;

use serde_json::json;
use std::sync::Arc;

use normcache_core::{
    FetchPolicy, MutationRequest, NormalizedCache, QueryDescriptor, QueryResult, Variables,
};

// Re-export commonly used items
pub use entries_server::{EntriesServer, Gate};

/// `entries(search:)` returning a list of `Entry { id }`.
pub fn entries_query() -> QueryDescriptor {
    QueryDescriptor::query("entries", "entries")
        .with_key_args(["search"])
        .returning_list("Entry", ["id"])
        .with_document("query entries($search: String) { entries(search: $search) { id } }")
}

pub fn search(term: &str) -> Variables {
    let mut variables = Variables::new();
    variables.insert("search".into(), json!(term));
    variables
}

fn removal(operation: &str, id: &'static str) -> MutationRequest {
    let mut variables = Variables::new();
    variables.insert("id".into(), json!(id));
    MutationRequest::new(QueryDescriptor::mutation(operation, operation), variables)
        .with_optimistic(json!({ operation: id }))
        .with_update(move |writer, _| {
            for slot in writer.slots_for_field("entries") {
                writer.modify_field(&slot, |refs, helpers| {
                    refs.iter()
                        .filter(|r| helpers.read_str(r, "id") != Some(id))
                        .cloned()
                        .collect()
                });
            }
        })
}

/// `removeEntry(id)` with an optimistic filter over every `entries` slot.
pub fn remove_entry(id: &'static str) -> MutationRequest {
    removal("removeEntry", id)
}

/// Same as [`remove_entry`] but against the always-failing mutation.
pub fn remove_entry_failed(id: &'static str) -> MutationRequest {
    removal("removeEntryFailed", id)
}

/// Ids listed by a result, in order.
pub fn ids(result: &QueryResult) -> Vec<String> {
    result
        .data
        .as_ref()
        .and_then(|data| data["entries"].as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// A cache over a fresh entries server holding `1, 2, 3`.
pub fn cache_with_server() -> (NormalizedCache, Arc<EntriesServer>) {
    let server = EntriesServer::new(["1", "2", "3"]);
    (NormalizedCache::new(server.clone()), server)
}

/// Records every delivered result.
pub fn recorder() -> (
    Arc<parking_lot::Mutex<Vec<QueryResult>>>,
    impl Fn(&QueryResult) + Send + Sync + 'static,
) {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |result: &QueryResult| sink.lock().push(result.clone()))
}
