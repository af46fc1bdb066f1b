//! Network channel abstraction.
//!
//! The cache only needs `request(operation) -> response`; transports live
//! in the `normcache-link` crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::descriptor::QueryDescriptor;
use crate::error::LinkError;
use crate::slots::Variables;
use crate::types::GraphQlError;

/// An operation ready to be sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    /// What is being asked
    pub descriptor: QueryDescriptor,
    /// Variables, forwarded verbatim (key and non-key alike)
    pub variables: Variables,
}

impl Operation {
    /// Bundle a descriptor with its variables.
    pub fn new(descriptor: QueryDescriptor, variables: Variables) -> Self {
        Self {
            descriptor,
            variables,
        }
    }

    /// The operation name.
    pub fn name(&self) -> &str {
        &self.descriptor.operation_name
    }

    /// GraphQL-over-HTTP request body.
    pub fn to_request_body(&self) -> serde_json::Value {
        json!({
            "operationName": self.descriptor.operation_name,
            "query": self.descriptor.document,
            "variables": self.variables,
        })
    }
}

/// What the server answered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Result data; `None` when the server produced none
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Field-level errors
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
}

impl Response {
    /// A successful response.
    pub fn data(data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// A response carrying only errors.
    pub fn errors(errors: Vec<GraphQlError>) -> Self {
        Self { data: None, errors }
    }

    /// Whether the server reported field errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Network channel used by the cache.
///
/// Implementations must be cheap to share; the cache holds them behind an
/// `Arc` and may issue several requests concurrently.
#[async_trait]
pub trait Link: Send + Sync {
    /// Send one operation and wait for its outcome.
    async fn request(&self, operation: &Operation) -> Result<Response, LinkError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "link"
    }
}
