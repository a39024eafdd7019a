//! Shutdown coordination for the worker.
//!
//! # State Machine
//! ```text
//! Running ──first close event──▶ ShuttingDown ──supervisor settled──▶ Disconnected
//! ```
//!
//! # Sequence (first close event only)
//! 1. Flip to ShuttingDown; faults are logged from now on, not escalated
//! 2. Detach the sibling listener's close hook, then close it
//! 3. Release backing resources, each bounded by the teardown timeout
//! 4. Settle the supervisor link (disconnect race, see [`settle_supervisor`])

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::backends::BackingResource;
use crate::config::ShutdownConfig;
use crate::lifecycle::supervisor::SupervisorLink;
use crate::net::{InFlight, ListenerHandle, ListenerRole};

/// Lifecycle phase of the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    ShuttingDown,
    Disconnected,
}

/// Process-wide shutdown flag, set at most once.
#[derive(Debug, Clone)]
pub struct ShutdownState {
    tx: Arc<watch::Sender<Phase>>,
}

impl ShutdownState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn phase(&self) -> Phase {
        *self.tx.borrow()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.phase() != Phase::Running
    }

    /// Move from Running to ShuttingDown. Only the first caller gets `true`.
    pub fn begin(&self) -> bool {
        self.tx.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::ShuttingDown;
                true
            } else {
                false
            }
        })
    }

    fn finish(&self) {
        self.tx.send_replace(Phase::Disconnected);
    }

    /// Watch phase transitions.
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.tx.subscribe()
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

/// Timing knobs for shutdown.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSettings {
    pub disconnect_grace: Duration,
    pub teardown_timeout: Duration,
}

impl From<&ShutdownConfig> for ShutdownSettings {
    fn from(config: &ShutdownConfig) -> Self {
        Self {
            disconnect_grace: Duration::from_millis(config.disconnect_grace_ms),
            teardown_timeout: Duration::from_millis(config.teardown_timeout_ms),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self::from(&ShutdownConfig::default())
    }
}

/// How the supervisor link ended up closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// No supervisor channel was open when shutdown reached this step.
    NotConnected,
    /// The supervisor closed the channel before the grace timer fired.
    SupervisorInitiated,
    /// The grace timer fired with the channel still open; we disconnected.
    SelfInitiated,
}

/// Result of releasing one backing resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    Closed,
    Failed(String),
    TimedOut,
}

/// What the shutdown sequence did.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    pub trigger: ListenerRole,
    pub released: Vec<(String, Release)>,
    pub disconnect: DisconnectOutcome,
}

/// Owns the shutdown sequence and everything it tears down.
pub struct ShutdownCoordinator {
    state: ShutdownState,
    pool: ListenerHandle,
    private: ListenerHandle,
    resources: Vec<Arc<dyn BackingResource>>,
    supervisor: SupervisorLink,
    in_flight: InFlight,
    settings: ShutdownSettings,
}

impl ShutdownCoordinator {
    pub fn new(
        state: ShutdownState,
        pool: ListenerHandle,
        private: ListenerHandle,
        resources: Vec<Arc<dyn BackingResource>>,
        supervisor: SupervisorLink,
        in_flight: InFlight,
        settings: ShutdownSettings,
    ) -> Self {
        Self {
            state,
            pool,
            private,
            resources,
            supervisor,
            in_flight,
            settings,
        }
    }

    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    fn listener(&self, role: ListenerRole) -> &ListenerHandle {
        match role {
            ListenerRole::Pool => &self.pool,
            ListenerRole::Private => &self.private,
        }
    }

    /// Entry point for a listener's close event.
    pub async fn on_close(&self, role: ListenerRole) -> Option<ShutdownReport> {
        self.close_all(role).await
    }

    /// Run the shutdown sequence, triggered by `trigger` closing.
    ///
    /// Returns `None` without doing anything if shutdown already began.
    pub async fn close_all(&self, trigger: ListenerRole) -> Option<ShutdownReport> {
        if !self.state.begin() {
            tracing::debug!(listener = %trigger, "Shutdown already in progress");
            return None;
        }

        tracing::warn!(
            trigger = %trigger,
            in_flight = self.in_flight.total(),
            "Worker closing"
        );

        let sibling = self.listener(trigger.sibling());
        sibling.detach_close_hook();
        sibling.close();

        let released = self.release_resources().await;
        let disconnect = settle_supervisor(&self.supervisor, self.settings.disconnect_grace).await;
        self.state.finish();

        tracing::info!(?disconnect, "Worker detached");
        Some(ShutdownReport {
            trigger,
            released,
            disconnect,
        })
    }

    async fn release_resources(&self) -> Vec<(String, Release)> {
        let mut released = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            let name = resource.name().to_string();
            let outcome = match tokio::time::timeout(self.settings.teardown_timeout, resource.release()).await {
                Ok(Ok(())) => {
                    tracing::info!(resource = %name, "Released backing resource");
                    Release::Closed
                }
                Ok(Err(e)) => {
                    tracing::error!(resource = %name, error = %e, "Error releasing backing resource");
                    Release::Failed(e.to_string())
                }
                Err(_) => {
                    tracing::error!(
                        resource = %name,
                        timeout = ?self.settings.teardown_timeout,
                        "Backing resource release timed out"
                    );
                    Release::TimedOut
                }
            };
            released.push((name, outcome));
        }
        released
    }
}

/// Resolve the race between our disconnect and the supervisor's.
///
/// The supervisor may already be tearing the channel down. Give it `grace`
/// to finish; if the channel is still open afterwards, disconnect it
/// ourselves. Either ordering ends with the channel closed.
pub async fn settle_supervisor(link: &SupervisorLink, grace: Duration) -> DisconnectOutcome {
    if !link.is_connected() {
        return DisconnectOutcome::NotConnected;
    }

    tokio::select! {
        _ = link.disconnected() => DisconnectOutcome::SupervisorInitiated,
        _ = tokio::time::sleep(grace) => {
            if link.disconnect() {
                link.disconnected().await;
                DisconnectOutcome::SelfInitiated
            } else {
                DisconnectOutcome::SupervisorInitiated
            }
        }
    }
}
