//! Process-wide backing resources.
//!
//! # Responsibilities
//! - Hold the long-lived clients that keep a worker busy (session store, cache)
//! - Expose one release hook per resource to the shutdown coordinator
//!
//! # Design Decisions
//! - Clients are created once at startup and shared via Arc by all requests
//! - Only the shutdown coordinator releases them, never request code
//! - Release is best-effort; the worker is exiting regardless

pub mod store;

use futures_util::future::BoxFuture;

use crate::fault::BoxError;

pub use store::{StoreClient, StoreError};

/// A resource released exactly once during shutdown.
pub trait BackingResource: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Close the resource. Failures are logged by the caller, never retried.
    fn release(&self) -> BoxFuture<'_, Result<(), BoxError>>;
}
