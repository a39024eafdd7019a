//! Error reporting service client.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::config::ErrorReportingConfig;
use crate::fault::Fault;

/// Fire-and-forget sink for uncaught faults.
pub trait ErrorReporter: Send + Sync + 'static {
    /// Queue one report. Must not block and must not fail.
    fn send(&self, fault: &Fault);

    /// Wait for queued reports to be delivered. Callers bound this with a
    /// timeout before the process exits.
    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Shared handle to the worker's error reporter.
pub type SharedReporter = Arc<dyn ErrorReporter>;

/// JSON body POSTed for each fault.
#[derive(Debug, Serialize)]
struct FaultReport {
    occurred_on: u64,
    kind: &'static str,
    message: String,
    stamp: String,
}

/// Reports faults to an HTTP collector.
pub struct HttpReporter {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    stamp: String,
    pending: Mutex<JoinSet<()>>,
}

impl HttpReporter {
    /// `stamp` identifies this worker build in every report.
    pub fn new(config: &ErrorReportingConfig, stamp: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            stamp: stamp.into(),
            pending: Mutex::new(JoinSet::new()),
        }
    }
}

impl ErrorReporter for HttpReporter {
    fn send(&self, fault: &Fault) {
        let report = FaultReport {
            occurred_on: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            kind: fault.kind(),
            message: fault.to_string(),
            stamp: self.stamp.clone(),
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(error = %fault, "No runtime available, fault report dropped");
            return;
        };

        let request = self
            .client
            .post(&self.endpoint)
            .header("X-ApiKey", &self.api_key)
            .json(&report);

        let delivery = async move {
            match request.send().await {
                Ok(res) if !res.status().is_success() => {
                    tracing::warn!(status = %res.status(), "Error reporting service rejected report");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Failed to send fault report"),
            }
        };

        match self.pending.lock() {
            Ok(mut pending) => {
                pending.spawn_on(delivery, &runtime);
            }
            Err(_) => {
                runtime.spawn(delivery);
            }
        }
    }

    fn flush(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut pending = match self.pending.lock() {
                Ok(mut pending) => std::mem::take(&mut *pending),
                Err(_) => return,
            };
            while pending.join_next().await.is_some() {}
        })
    }
}
