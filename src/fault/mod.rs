//! Per-request fault isolation.
//!
//! # Data Flow
//! ```text
//! request
//!     → boundary.rs (FaultBoundary::new: fresh scope per request)
//!     → handler(request, FaultScope)
//!         ├─ Ok(response)            → client
//!         ├─ Err(fault) / panic      → FaultPolicy::escalate → report once → abort connection + terminate worker
//!         └─ FaultScope::spawn task fails later → same escalation
//! ```
//!
//! # Design Decisions
//! - A fault escaping a handler means in-process state can no longer be trusted:
//!   fail fast, report best-effort, never recover
//! - Exactly one report per request, no retries, nothing buffered across requests
//! - Once the worker is shutting down, faults are logged instead of escalated

pub mod boundary;
pub mod reporter;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::observability::SharedMetrics;
pub use boundary::{Escalation, FaultBoundary, FaultPolicy};
pub use reporter::{ErrorReporter, HttpReporter, SharedReporter};

/// Boxed error raised by request handling code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An uncaught failure during the handling of one request.
#[derive(Debug, Error)]
pub enum Fault {
    /// The handler returned an error.
    #[error("request handler failed: {0}")]
    Handler(BoxError),

    /// The handler, or a task spawned through its scope, panicked.
    #[error("request handler panicked: {0}")]
    Panic(String),

    /// A task spawned through the request scope returned an error.
    #[error("request task failed: {0}")]
    Task(BoxError),
}

impl Fault {
    /// Wrap an error returned by a handler.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Fault::Handler(err.into())
    }

    /// Convert a caught panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Fault::Panic(message)
    }

    /// Short classification used in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Fault::Handler(_) => "HandlerError",
            Fault::Panic(_) => "Panic",
            Fault::Task(_) => "TaskError",
        }
    }
}

/// The error-handling scope of a single request.
///
/// Passed by value into the request handler. Work the handler starts in the
/// background must go through [`FaultScope::spawn`] so its failures land in
/// the same boundary as the request itself.
#[derive(Clone)]
pub struct FaultScope {
    metrics: SharedMetrics,
    reporter: Option<SharedReporter>,
    faults: mpsc::UnboundedSender<Fault>,
}

impl FaultScope {
    pub(crate) fn new(
        metrics: SharedMetrics,
        reporter: Option<SharedReporter>,
        faults: mpsc::UnboundedSender<Fault>,
    ) -> Self {
        Self {
            metrics,
            reporter,
            faults,
        }
    }

    /// Metrics sink of the worker.
    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Error reporter, when one is configured.
    pub fn reporter(&self) -> Option<&SharedReporter> {
        self.reporter.as_ref()
    }

    /// Raise a fault from outside the handler's own future.
    ///
    /// Only the first fault raised in a scope is acted on.
    pub fn raise(&self, fault: Fault) {
        let _ = self.faults.send(fault);
    }

    /// Spawn a task whose failure counts as a fault of this request.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let faults = self.faults.clone();
        tokio::spawn(async move {
            let fault = match AssertUnwindSafe(task).catch_unwind().await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => Fault::Task(e),
                Err(payload) => Fault::from_panic(payload),
            };
            let _ = faults.send(fault);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let fault = Fault::from_panic(Box::new("boom"));
        assert_eq!(fault.to_string(), "request handler panicked: boom");

        let fault = Fault::from_panic(Box::new(String::from("owned boom")));
        assert!(matches!(fault, Fault::Panic(ref m) if m == "owned boom"));

        let fault = Fault::from_panic(Box::new(42u8));
        assert!(matches!(fault, Fault::Panic(ref m) if m == "non-string panic payload"));
    }

    #[test]
    fn kinds() {
        assert_eq!(Fault::handler("x").kind(), "HandlerError");
        assert_eq!(Fault::Task("x".into()).kind(), "TaskError");
    }
}
