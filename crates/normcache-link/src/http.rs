//! GraphQL over HTTP link
//!
//! # Endpoint Format
//!
//! - POST `{uri}`
//! - Request: `{"operationName": "...", "query": "...", "variables": {...}}`
//! - Response: `{"data": {...}, "errors": [{"message": "..."}]}`
//!
//! Field errors come back with status 200 and are handed to the cache
//! untouched; any non-2xx status is a transport failure.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use normcache_core::{Link, LinkError, Operation, Response};

/// Default endpoint, matching a local GraphQL dev server
pub const DEFAULT_URI: &str = "http://localhost:4000/";

/// Default timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Configuration for [`HttpLink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpLinkConfig {
    /// GraphQL endpoint
    pub uri: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
}

impl Default for HttpLinkConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            headers: BTreeMap::new(),
        }
    }
}

impl HttpLinkConfig {
    /// Config for the given endpoint with default settings
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Add a header sent with every request
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// Link posting operations to a GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct HttpLink {
    client: Client,
    config: HttpLinkConfig,
}

impl HttpLink {
    /// Create a new HTTP link
    pub fn new(config: HttpLinkConfig) -> Result<Self, LinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LinkError::connection(format!("HTTP client error: {}", e)))?;
        Ok(Self { client, config })
    }

    /// The endpoint requests are sent to
    pub fn uri(&self) -> &str {
        &self.config.uri
    }

    /// Link configuration
    pub fn config(&self) -> &HttpLinkConfig {
        &self.config
    }
}

#[async_trait]
impl Link for HttpLink {
    async fn request(&self, operation: &Operation) -> Result<Response, LinkError> {
        debug!(
            "POST {} operation '{}' variables {}",
            self.config.uri,
            operation.name(),
            serde_json::Value::Object(operation.variables.clone())
        );

        let mut request = self
            .client
            .post(&self.config.uri)
            .header("Content-Type", "application/json")
            .json(&operation.to_request_body());
        for (name, value) in &self.config.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LinkError::connection("Request timed out")
            } else if e.is_connect() {
                LinkError::connection(format!("Connection failed: {}", e))
            } else {
                LinkError::connection(format!("Request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Operation '{}' failed with status {}",
                operation.name(),
                status
            );
            return Err(LinkError::status(status.as_u16(), body));
        }

        response
            .json::<Response>()
            .await
            .map_err(|e| LinkError::Decode(e.to_string()))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use normcache_core::{QueryDescriptor, Variables};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entries_operation() -> Operation {
        let mut variables = Variables::new();
        variables.insert("search".into(), json!("1"));
        Operation::new(
            QueryDescriptor::query("entries", "entries").with_document("query entries { entries { id } }"),
            variables,
        )
    }

    fn test_link(server: &MockServer) -> HttpLink {
        HttpLink::new(HttpLinkConfig::new(server.uri()).with_timeout(5)).unwrap()
    }

    #[tokio::test]
    async fn test_request_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_json(json!({
                "operationName": "entries",
                "query": "query entries { entries { id } }",
                "variables": {"search": "1"}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": {"entries": [{"__typename": "Entry", "id": "1"}]}})),
            )
            .mount(&server)
            .await;

        let response = test_link(&server)
            .request(&entries_operation())
            .await
            .unwrap();
        assert!(!response.has_errors());
        assert_eq!(response.data.unwrap()["entries"][0]["id"], json!("1"));
    }

    #[tokio::test]
    async fn test_field_errors_are_not_transport_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "Unexpected error", "path": ["removeEntryFailed"]}]
            })))
            .mount(&server)
            .await;

        let response = test_link(&server)
            .request(&entries_operation())
            .await
            .unwrap();
        assert!(response.data.is_none());
        assert_eq!(response.errors[0].message, "Unexpected error");
        assert_eq!(response.errors[0].path, vec![json!("removeEntryFailed")]);
    }

    #[tokio::test]
    async fn test_custom_headers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .mount(&server)
            .await;

        let link = HttpLink::new(
            HttpLinkConfig::new(server.uri()).with_header("Authorization", "Bearer test-key"),
        )
        .unwrap();
        assert!(link.request(&entries_operation()).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Must provide query string."))
            .mount(&server)
            .await;

        let err = test_link(&server)
            .request(&entries_operation())
            .await
            .unwrap_err();
        assert_eq!(err, LinkError::status(400, "Must provide query string."));
    }

    #[tokio::test]
    async fn test_invalid_body_is_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .mount(&server)
            .await;

        let err = test_link(&server)
            .request(&entries_operation())
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Decode(_)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Nothing listens on the discard port
        let link = HttpLink::new(HttpLinkConfig::new("http://127.0.0.1:9/").with_timeout(2)).unwrap();
        let err = link.request(&entries_operation()).await.unwrap_err();
        assert!(matches!(err, LinkError::Connection(_)));
    }

    #[test]
    fn test_config_defaults() {
        let config = HttpLinkConfig::default();
        assert_eq!(config.uri, DEFAULT_URI);
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert!(config.headers.is_empty());
    }
}
