//! Site Worker Library
//!
//! One member of a multi-process server pool: a pool listener shared with
//! sibling workers, a private listener on `10000 + id % 100`, a fault
//! boundary around every request, and a once-only shutdown sequence.

pub mod backends;
pub mod config;
pub mod fault;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::WorkerConfig;
pub use fault::{Fault, FaultScope};
pub use http::RequestHandler;
pub use lifecycle::{RunningWorker, Worker, WorkerError};
