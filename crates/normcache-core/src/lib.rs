//! normcache Core - Client-side normalized object cache
//!
//! This crate provides the cache subsystem:
//! - Normalization of query results into identity-addressed entities
//! - Argument-keyed slots per root field
//! - Live watchers kept in sync with the store
//! - Optimistic mutations as stacked patch layers, committed or rolled back
//! - Reachability-based garbage collection
//!
//! ```text
//!  query / watch / mutate
//!          │
//!  ┌───────▼────────┐   request   ┌──────────┐
//!  │ NormalizedCache├────────────►│   Link   │
//!  └─┬─────┬──────┬─┘             └──────────┘
//!    │     │      │
//!    │  ┌──▼────────────────┐   ┌─────────────────┐
//!    │  │ MutationCoordinator├──►│   CacheStore    │◄── GcSweeper
//!    │  └───────────────────┘   │ base + patches  │
//!    │                          └────────┬────────┘
//!    │                                   │ ChangeSet
//!    └──────────────► SubscriptionHub ◄──┘
//! ```

pub mod client;
pub mod descriptor;
pub mod error;
pub mod gc;
pub mod hub;
pub mod link;
pub mod metrics;
pub mod mutation;
pub mod normalize;
pub mod policies;
pub mod slots;
pub mod store;
pub mod types;

// Facade re-exports
pub use client::{CacheOptions, NormalizedCache};

// Data model re-exports
pub use descriptor::{OperationKind, QueryDescriptor, Shape};
pub use types::{EntityKey, GraphQlError, QueryResult, ResultSource, SlotKey, Value};

// Component re-exports
pub use gc::{GcReport, GcSweeper};
pub use hub::{SubscriptionHub, WatchCallback, WatchHandle, WatcherId};
pub use mutation::{
    MutationCoordinator, MutationId, MutationRequest, MutationState, PendingMutation, UpdateFn,
};
pub use normalize::{render, Dependencies, NormalizedWrites, Normalizer, Rendered};
pub use policies::{FieldModifier, Modifiers, TypePolicies, ROOT_QUERY_TYPE};
pub use slots::{FetchPolicy, QuerySlotManager, Variables};
pub use store::{CacheStore, CacheWriter, ChangeSet, LayerId, PatchId, ReadHelpers, ROOT_QUERY};

// Network and error re-exports
pub use error::{CacheError, LinkError};
pub use link::{Link, Operation, Response};
pub use metrics::CacheMetrics;
