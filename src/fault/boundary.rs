//! The failure boundary wrapped around every request.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::fault::{Fault, FaultScope, SharedReporter};
use crate::lifecycle::shutdown::ShutdownState;
use crate::observability::SharedMetrics;

/// What happened to an escalated fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Reported (when a reporter is configured) and handed to the
    /// lifecycle controller, which terminates the worker.
    Terminate,
    /// The worker was already shutting down; the fault was only logged.
    Suppressed,
}

/// Process-wide policy for faults that escape a request.
#[derive(Clone)]
pub struct FaultPolicy {
    reporter: Option<SharedReporter>,
    metrics: SharedMetrics,
    shutdown: ShutdownState,
    fatal: mpsc::UnboundedSender<Fault>,
}

impl FaultPolicy {
    pub fn new(
        reporter: Option<SharedReporter>,
        metrics: SharedMetrics,
        shutdown: ShutdownState,
        fatal: mpsc::UnboundedSender<Fault>,
    ) -> Self {
        Self {
            reporter,
            metrics,
            shutdown,
            fatal,
        }
    }

    pub fn reporter(&self) -> Option<&SharedReporter> {
        self.reporter.as_ref()
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Report a fault and hand it to the lifecycle controller.
    pub fn escalate(&self, fault: Fault) -> Escalation {
        if self.shutdown.is_shutting_down() {
            tracing::error!(error = %fault, kind = fault.kind(), "Fault during shutdown");
            return Escalation::Suppressed;
        }

        if let Some(reporter) = &self.reporter {
            reporter.send(&fault);
        }
        tracing::error!(error = %fault, kind = fault.kind(), "Uncaught request fault, terminating worker");
        if self.fatal.send(fault).is_err() {
            tracing::warn!("Lifecycle controller gone, fault not delivered");
        }
        Escalation::Terminate
    }
}

/// One request's failure boundary.
///
/// Created fresh per request together with the [`FaultScope`] handed to the
/// handler. Catches returned errors, panics, and failures of tasks spawned
/// through the scope, keeping only the first.
pub struct FaultBoundary {
    policy: FaultPolicy,
    faults: mpsc::UnboundedReceiver<Fault>,
}

impl FaultBoundary {
    pub fn new(policy: &FaultPolicy) -> (Self, FaultScope) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scope = FaultScope::new(policy.metrics.clone(), policy.reporter.clone(), tx);
        (
            Self {
                policy: policy.clone(),
                faults: rx,
            },
            scope,
        )
    }

    /// Drive the handler inside the boundary.
    ///
    /// On `Err` the caller owns the fault and must escalate it. On `Ok`, tasks
    /// the handler left running are still watched; their first fault is
    /// escalated in the background.
    pub async fn run<F, T>(mut self, handler: F) -> Result<T, Fault>
    where
        F: Future<Output = Result<T, Fault>>,
    {
        let outcome = tokio::select! {
            biased;
            Some(fault) = self.faults.recv() => Err(fault),
            result = AssertUnwindSafe(handler).catch_unwind() => match result {
                Ok(result) => result,
                Err(payload) => Err(Fault::from_panic(payload)),
            },
        };

        if outcome.is_ok() {
            self.watch_trailing();
        }
        outcome
    }

    fn watch_trailing(self) {
        let FaultBoundary { policy, mut faults } = self;
        match faults.try_recv() {
            Ok(fault) => {
                policy.escalate(fault);
            }
            Err(TryRecvError::Disconnected) => {}
            Err(TryRecvError::Empty) => {
                tokio::spawn(async move {
                    if let Some(fault) = faults.recv().await {
                        policy.escalate(fault);
                    }
                });
            }
        }
    }
}
