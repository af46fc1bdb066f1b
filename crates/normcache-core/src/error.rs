//! Cache and link error types.

use thiserror::Error;

use crate::store::PatchId;
use crate::types::GraphQlError;

/// Errors raised by a [`Link`](crate::link::Link) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Transport-level failure (connection refused, timeout, ...)
    #[error("connection failed: {0}")]
    Connection(String),

    /// Server answered with a non-success HTTP status
    #[error("server returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// Response body could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// An in-process resolver failed
    #[error("resolver for '{field}' failed: {message}")]
    Resolver { field: String, message: String },

    /// No resolver is registered for the operation
    #[error("no resolver registered for '{0}'")]
    UnknownOperation(String),
}

impl LinkError {
    /// Create a Connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a Status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create a Resolver error.
    pub fn resolver(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resolver {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the cache facade.
///
/// A cache miss is not an error: cache-only reads resolve with
/// `data: None` instead.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Transport-level failure
    #[error("network error: {0}")]
    Network(#[from] LinkError),

    /// The server answered without usable data and without errors
    #[error("operation '{operation}' returned no data")]
    NoData { operation: String },

    /// The server reported field errors
    #[error("operation '{operation}' failed: {}", join_messages(errors))]
    GraphQl {
        operation: String,
        errors: Vec<GraphQlError>,
    },

    /// Resolving a patch that was already resolved (or never existed).
    ///
    /// Unreachable while the mutation state machine is respected.
    #[error("optimistic patch {patch} is already resolved")]
    PatchConflict { patch: PatchId },

    /// Response data did not match the descriptor shape
    #[error("invalid response for '{operation}': {message}")]
    InvalidResponse { operation: String, message: String },
}

impl CacheError {
    /// Create a NoData error.
    pub fn no_data(operation: impl Into<String>) -> Self {
        Self::NoData {
            operation: operation.into(),
        }
    }

    /// Create a GraphQl error.
    pub fn graphql(operation: impl Into<String>, errors: Vec<GraphQlError>) -> Self {
        Self::GraphQl {
            operation: operation.into(),
            errors,
        }
    }

    /// Create an InvalidResponse error.
    pub fn invalid_response(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// True for failures caused by the network or the server.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::NoData { .. } | Self::GraphQl { .. }
        )
    }
}

fn join_messages(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::graphql(
            "removeEntryFailed",
            vec![GraphQlError::new("boom"), GraphQlError::new("again")],
        );
        assert!(err.to_string().contains("removeEntryFailed"));
        assert!(err.to_string().contains("boom; again"));

        let err = CacheError::from(LinkError::status(500, "Internal server error"));
        assert!(err.to_string().contains("500"));
        assert!(err.is_remote());
    }

    #[test]
    fn test_patch_conflict_is_not_remote() {
        let err = CacheError::PatchConflict { patch: PatchId(3) };
        assert!(!err.is_remote());
        assert!(err.to_string().contains("patch 3"));
    }
}
