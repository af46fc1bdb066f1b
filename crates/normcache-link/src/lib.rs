//! normcache Link - Network channels for the normalized cache
//!
//! This crate provides `Link` implementations:
//! - `HttpLink`: GraphQL over HTTP POST (reqwest)
//! - `ResolverLink`: in-process resolvers keyed by root field
//! - `demo`: the "entries" demo schema, its operations and server

pub mod demo;
pub mod http;
pub mod resolver;

// Re-exports for convenience
pub use demo::{
    demo_server, entries_query, remove_entry, remove_entry_failed, search_variables,
    DEMO_ENTRY_IDS,
};
pub use http::{HttpLink, HttpLinkConfig, DEFAULT_TIMEOUT_SECS, DEFAULT_URI};
pub use resolver::{RecordedRequest, Resolver, ResolverLink};
