//! In-process resolver link.
//!
//! Serves operations from closures keyed by root field, the way a schema's
//! resolver map would. Useful for demos and tests without a server.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Map;
use tracing::{debug, info};

use normcache_core::{GraphQlError, Link, LinkError, Operation, Response, Variables};

/// A root field resolver: variables in, field value or error message out.
pub type Resolver =
    Arc<dyn Fn(&Variables) -> Result<serde_json::Value, String> + Send + Sync>;

/// A request as the link received it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedRequest {
    /// Operation name
    pub operation_name: String,
    /// Variables as sent
    pub variables: Variables,
}

/// Link resolving operations in-process.
#[derive(Default)]
pub struct ResolverLink {
    resolvers: HashMap<String, Resolver>,
    latency: Option<Duration>,
    log: Mutex<Vec<RecordedRequest>>,
}

impl ResolverLink {
    /// A link with no resolvers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resolver for a root field.
    pub fn with_resolver<F>(mut self, field: impl Into<String>, resolver: F) -> Self
    where
        F: Fn(&Variables) -> Result<serde_json::Value, String> + Send + Sync + 'static,
    {
        self.resolvers.insert(field.into(), Arc::new(resolver));
        self
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Root fields with a registered resolver, sorted.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
        fields.sort_unstable();
        fields
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().clone()
    }
}

impl fmt::Debug for ResolverLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverLink")
            .field("fields", &self.fields())
            .field("latency", &self.latency)
            .finish()
    }
}

#[async_trait]
impl Link for ResolverLink {
    async fn request(&self, operation: &Operation) -> Result<Response, LinkError> {
        info!(
            "Request started! operation '{}' variables {}",
            operation.name(),
            serde_json::Value::Object(operation.variables.clone())
        );
        self.log.lock().push(RecordedRequest {
            operation_name: operation.name().to_string(),
            variables: operation.variables.clone(),
        });

        let field = operation.descriptor.root_field.as_str();
        let resolver = self
            .resolvers
            .get(field)
            .cloned()
            .ok_or_else(|| LinkError::UnknownOperation(field.to_string()))?;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match resolver(&operation.variables) {
            Ok(value) => {
                let mut data = Map::new();
                data.insert(field.to_string(), value);
                Ok(Response::data(serde_json::Value::Object(data)))
            }
            Err(message) => {
                debug!("Resolver for '{}' failed: {}", field, message);
                Ok(Response::errors(vec![GraphQlError {
                    message,
                    path: vec![serde_json::Value::String(field.to_string())],
                }]))
            }
        }
    }

    fn name(&self) -> &str {
        "resolver"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use normcache_core::QueryDescriptor;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn op(field: &str) -> Operation {
        Operation::new(QueryDescriptor::query(field, field), Variables::new())
    }

    #[tokio::test]
    async fn test_resolves_by_root_field() {
        let link = ResolverLink::new().with_resolver("answer", |_| Ok(json!(42)));
        let response = link.request(&op("answer")).await.unwrap();
        assert_eq!(response.data, Some(json!({"answer": 42})));
        assert_eq!(link.requests()[0].operation_name, "answer");
    }

    #[tokio::test]
    async fn test_resolver_error_becomes_field_error() {
        let link = ResolverLink::new().with_resolver("broken", |_| Err("boom".to_string()));
        let response = link.request(&op("broken")).await.unwrap();
        assert!(response.data.is_none());
        assert_eq!(response.errors[0].message, "boom");
        assert_eq!(response.errors[0].path, vec![json!("broken")]);
    }

    #[tokio::test]
    async fn test_unknown_field() {
        let link = ResolverLink::new();
        let err = link.request(&op("missing")).await.unwrap_err();
        assert_eq!(err, LinkError::UnknownOperation("missing".into()));
        // Still logged, like a server seeing the request
        assert_eq!(link.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let link = ResolverLink::new()
            .with_resolver("slow", |_| Ok(json!(true)))
            .with_latency(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        link.request(&op("slow")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
