//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Bind pool listener (shared) → bind private listener (exclusive) → serve both
//!
//! Shutdown (shutdown.rs):
//!     First close event → close sibling → release backing resources
//!     → settle supervisor link → Disconnected
//!
//! Supervisor (supervisor.rs):
//!     "disconnect" request → close pool listener
//!     channel EOF → cancels the disconnect grace timer
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → close pool listener
//!
//! Controller (worker.rs):
//!     Composes the above; `Worker::run` / `RunningWorker::wait` is the completion signal
//! ```
//!
//! # Design Decisions
//! - Every way of stopping funnels into a listener close event
//! - Shutdown runs at most once per process; a worker is never revived
//! - Request faults skip shutdown entirely: the worker exits abnormally

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod supervisor;
pub mod worker;

pub use shutdown::{
    DisconnectOutcome, Phase, Release, ShutdownCoordinator, ShutdownReport, ShutdownState,
};
pub use startup::{build_stamp, git_head, ListenerPair};
pub use supervisor::{SupervisorEvent, SupervisorLink};
pub use worker::{RunningWorker, Worker, WorkerError};
