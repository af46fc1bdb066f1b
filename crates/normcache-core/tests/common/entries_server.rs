//! In-memory entries server used as the network link in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use normcache_core::{GraphQlError, Link, LinkError, Operation, Response};

/// Lets a test hold requests in flight and release them one at a time.
#[derive(Default)]
pub struct Gate {
    arrived: Notify,
    release: Notify,
}

impl Gate {
    /// Wait until a request reached the server.
    pub async fn arrived(&self) {
        self.arrived.notified().await;
    }

    /// Let one held request through.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Serves `entries`, `removeEntry` and `removeEntryFailed`.
///
/// Like the real resolver it does no server-side filtering: `entries`
/// returns every remaining entry whatever the search term.
pub struct EntriesServer {
    entries: Mutex<Vec<String>>,
    log: Mutex<Vec<(String, serde_json::Value)>>,
    gated: AtomicBool,
    offline: AtomicBool,
    pub gate: Gate,
}

impl EntriesServer {
    pub fn new<I, S>(ids: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            entries: Mutex::new(ids.into_iter().map(Into::into).collect()),
            log: Mutex::new(Vec::new()),
            gated: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            gate: Gate::default(),
        })
    }

    /// Hold every following request until [`Gate::release`].
    pub fn hold_requests(&self, hold: bool) {
        self.gated.store(hold, Ordering::SeqCst);
    }

    /// Fail every following request at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Operation names received so far.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    fn resolve(&self, operation: &Operation) -> Result<Response, LinkError> {
        let id = operation
            .variables
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);

        match operation.descriptor.root_field.as_str() {
            "entries" => {
                let items: Vec<_> = self
                    .entries
                    .lock()
                    .iter()
                    .map(|id| json!({"__typename": "Entry", "id": id}))
                    .collect();
                Ok(Response::data(json!({ "entries": items })))
            }
            "removeEntry" => {
                let id = id.ok_or_else(|| LinkError::resolver("removeEntry", "missing id"))?;
                self.entries.lock().retain(|e| *e != id);
                Ok(Response::data(json!({ "removeEntry": id })))
            }
            "removeEntryFailed" => Ok(Response::errors(vec![GraphQlError::new(
                "removeEntryFailed always fails",
            )])),
            other => Err(LinkError::UnknownOperation(other.to_string())),
        }
    }
}

#[async_trait]
impl Link for EntriesServer {
    async fn request(&self, operation: &Operation) -> Result<Response, LinkError> {
        self.log
            .lock()
            .push((operation.name().to_string(), json!(operation.variables)));

        if self.gated.load(Ordering::SeqCst) {
            self.gate.arrived.notify_one();
            self.gate.release.notified().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(LinkError::connection("server offline"));
        }
        self.resolve(operation)
    }

    fn name(&self) -> &str {
        "entries-server"
    }
}
