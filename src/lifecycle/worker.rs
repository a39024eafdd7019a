//! The lifecycle controller.
//!
//! # Data Flow
//! ```text
//! Worker::start
//!     → ListenerPair::start (pool bind, then private bind)
//!     → ShutdownCoordinator (owns both close handles)
//! RunningWorker::wait (dormant until one of)
//!     close event       → coordinator.on_close → drain listeners → Ok(report)
//!     supervisor "disconnect" / SIGTERM → close pool listener → close event
//!     request fault     → Err(WorkerError::Fault), worker exits abnormally
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::backends::BackingResource;
use crate::config::WorkerConfig;
use crate::fault::{Fault, FaultPolicy, SharedReporter};
use crate::http::dispatch::{Dispatcher, SharedHandler};
use crate::lifecycle::shutdown::{ShutdownCoordinator, ShutdownReport, ShutdownSettings, ShutdownState};
use crate::lifecycle::signals::close_on_signal;
use crate::lifecycle::startup::{ListenerEvents, ListenerPair};
use crate::lifecycle::supervisor::{SupervisorEvent, SupervisorEvents, SupervisorLink};
use crate::net::{InFlight, ListenerError, ListenerHandle};
use crate::observability::{NullSink, SharedMetrics};

/// Ways a worker ends other than a clean shutdown.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("worker terminated by request fault: {0}")]
    Fault(Fault),
}

/// A configured worker, not yet listening.
pub struct Worker {
    config: Arc<WorkerConfig>,
    worker_id: u32,
    handler: SharedHandler,
    reporter: Option<SharedReporter>,
    metrics: SharedMetrics,
    resources: Vec<Arc<dyn BackingResource>>,
    supervisor: (SupervisorLink, SupervisorEvents),
    signals: bool,
}

impl Worker {
    pub fn new(config: Arc<WorkerConfig>, worker_id: u32, handler: SharedHandler) -> Self {
        Self {
            config,
            worker_id,
            handler,
            reporter: None,
            metrics: Arc::new(NullSink),
            resources: Vec::new(),
            supervisor: SupervisorLink::detached(),
            signals: false,
        }
    }

    /// Report request faults here before terminating.
    pub fn with_reporter(mut self, reporter: SharedReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Release `resource` during shutdown, in registration order.
    pub fn with_resource(mut self, resource: Arc<dyn BackingResource>) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_supervisor(mut self, link: SupervisorLink, events: SupervisorEvents) -> Self {
        self.supervisor = (link, events);
        self
    }

    /// Close the pool listener on SIGTERM / SIGINT.
    pub fn with_signals(mut self) -> Self {
        self.signals = true;
        self
    }

    /// Bind both listeners and attach the shutdown hooks.
    pub async fn start(self) -> Result<RunningWorker, WorkerError> {
        let state = ShutdownState::new();
        let in_flight = InFlight::new();
        let (fatal_tx, fatal) = mpsc::unbounded_channel();

        let policy = FaultPolicy::new(
            self.reporter.clone(),
            self.metrics.clone(),
            state.clone(),
            fatal_tx,
        );
        let dispatcher = Dispatcher::new(self.handler, policy, in_flight.clone());

        let (pair, events) =
            ListenerPair::start(&self.config, self.worker_id, dispatcher, &self.metrics).await?;

        let (link, supervisor_events) = self.supervisor;
        let coordinator = ShutdownCoordinator::new(
            state,
            pair.pool.clone(),
            pair.private.clone(),
            self.resources,
            link,
            in_flight,
            ShutdownSettings::from(&self.config.shutdown),
        );
        let signal_task = self.signals.then(|| close_on_signal(pair.pool.clone()));
        let report_flush = Duration::from_millis(self.config.shutdown.teardown_timeout_ms);

        tracing::info!(
            pool = %pair.pool.local_addr(),
            private = %pair.private.local_addr(),
            "Worker listening"
        );

        Ok(RunningWorker {
            pair,
            events,
            coordinator,
            supervisor_events,
            fatal,
            signal_task,
            reporter: self.reporter,
            report_flush,
            drain: Duration::from_secs(self.config.shutdown.drain_timeout_secs),
        })
    }

    /// Start, then wait for the worker to finish.
    pub async fn run(self) -> Result<ShutdownReport, WorkerError> {
        self.start().await?.wait().await
    }
}

/// A worker whose listeners are up.
pub struct RunningWorker {
    pair: ListenerPair,
    events: ListenerEvents,
    coordinator: ShutdownCoordinator,
    supervisor_events: SupervisorEvents,
    fatal: mpsc::UnboundedReceiver<Fault>,
    signal_task: Option<JoinHandle<()>>,
    reporter: Option<SharedReporter>,
    report_flush: Duration,
    drain: Duration,
}

impl RunningWorker {
    pub fn pool_addr(&self) -> SocketAddr {
        self.pair.pool.local_addr()
    }

    pub fn private_addr(&self) -> SocketAddr {
        self.pair.private.local_addr()
    }

    /// Close handle of the pool listener.
    pub fn pool(&self) -> ListenerHandle {
        self.pair.pool.clone()
    }

    /// Close handle of the private listener.
    pub fn private(&self) -> ListenerHandle {
        self.pair.private.clone()
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.coordinator.state().clone()
    }

    /// Stay dormant until the worker shuts down or a request faults.
    ///
    /// Returns once both listeners have drained and the supervisor link is
    /// settled. A request fault returns with the fault as soon as its report
    /// has been delivered, or the teardown timeout has passed.
    pub async fn wait(mut self) -> Result<ShutdownReport, WorkerError> {
        let report = loop {
            tokio::select! {
                biased;
                Some(fault) = self.fatal.recv() => {
                    if let Some(task) = self.signal_task.take() {
                        task.abort();
                    }
                    flush_reports(self.reporter.as_ref(), self.report_flush).await;
                    return Err(WorkerError::Fault(fault));
                }
                Some(SupervisorEvent::DisconnectRequested) = self.supervisor_events.recv() => {
                    self.pair.pool.close();
                }
                Some(role) = self.events.recv() => {
                    if let Some(report) = self.coordinator.on_close(role).await {
                        break report;
                    }
                }
            }
        };

        if let Some(task) = self.signal_task.take() {
            task.abort();
        }
        self.pair.join(self.drain).await;
        tracing::info!(trigger = %report.trigger, "Worker shut down");
        Ok(report)
    }
}

/// Give queued fault reports up to `limit` to reach the collector.
async fn flush_reports(reporter: Option<&SharedReporter>, limit: Duration) {
    let Some(reporter) = reporter else {
        return;
    };
    if tokio::time::timeout(limit, reporter.flush()).await.is_err() {
        tracing::warn!(timeout = ?limit, "Fault report not delivered before exit");
    }
}
