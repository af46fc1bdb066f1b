//! The "entries" demo schema: operations and an in-process server.
//!
//! ```graphql
//! type Entry { id: ID! }
//! type Query { entries(search: String): [Entry!]! }
//! type Mutation {
//!   removeEntry(id: ID!): ID!
//!   removeEntryFailed(id: ID!): ID!
//! }
//! ```
//!
//! The server does no filtering: `entries` returns every entry whatever
//! the search term, and `removeEntry` only echoes the id back.

use serde_json::json;

use normcache_core::{MutationRequest, QueryDescriptor, Variables};

use crate::resolver::ResolverLink;

/// Ids served by [`demo_server`].
pub const DEMO_ENTRY_IDS: [&str; 3] = ["1", "2", "3"];

const ENTRIES_DOCUMENT: &str = "query entries($search: String) {
  entries(search: $search) {
    id
  }
}";

const REMOVE_ENTRY_DOCUMENT: &str = "mutation removeEntry($id: ID!) {
  removeEntry(id: $id)
}";

const REMOVE_ENTRY_FAILED_DOCUMENT: &str = "mutation removeEntryFailed($id: ID!) {
  removeEntryFailed(id: $id)
}";

/// `entries(search:)`, keyed by `search`.
pub fn entries_query() -> QueryDescriptor {
    QueryDescriptor::query("entries", "entries")
        .with_key_args(["search"])
        .returning_list("Entry", ["id"])
        .with_document(ENTRIES_DOCUMENT)
}

/// Variables for [`entries_query`].
pub fn search_variables(search: &str) -> Variables {
    let mut variables = Variables::new();
    variables.insert("search".into(), json!(search));
    variables
}

fn removal(operation: &str, document: &str, id: &str) -> MutationRequest {
    let mut variables = Variables::new();
    variables.insert("id".into(), json!(id));
    let removed = id.to_string();
    MutationRequest::new(
        QueryDescriptor::mutation(operation, operation).with_document(document),
        variables,
    )
    .with_optimistic(json!({ operation: id }))
    .with_update(move |writer, _| {
        for slot in writer.slots_for_field("entries") {
            writer.modify_field(&slot, |refs, helpers| {
                refs.iter()
                    .filter(|entry| helpers.read_str(entry, "id") != Some(removed.as_str()))
                    .cloned()
                    .collect()
            });
        }
    })
}

/// `removeEntry(id)`: optimistically drops the entry from every
/// `entries` slot.
pub fn remove_entry(id: &str) -> MutationRequest {
    removal("removeEntry", REMOVE_ENTRY_DOCUMENT, id)
}

/// `removeEntryFailed(id)`: same optimistic update, always rejected.
pub fn remove_entry_failed(id: &str) -> MutationRequest {
    removal("removeEntryFailed", REMOVE_ENTRY_FAILED_DOCUMENT, id)
}

fn requested_id(variables: &Variables) -> Result<serde_json::Value, String> {
    variables
        .get("id")
        .filter(|id| id.is_string())
        .cloned()
        .ok_or_else(|| "Variable \"$id\" of required type \"ID!\" was not provided.".to_string())
}

/// In-process server for the demo schema.
pub fn demo_server() -> ResolverLink {
    let entries: Vec<serde_json::Value> = DEMO_ENTRY_IDS
        .iter()
        .map(|id| json!({"__typename": "Entry", "id": id}))
        .collect();

    ResolverLink::new()
        .with_resolver("entries", move |_| Ok(serde_json::Value::Array(entries.clone())))
        .with_resolver("removeEntry", requested_id)
        .with_resolver("removeEntryFailed", |_| Err("Unexpected error.".to_string()))
}
