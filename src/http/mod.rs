//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection (pool or private listener)
//!     → server.rs (Axum setup, graceful close)
//!     → request.rs (x-request-id)
//!     → canonical.rs (301 to canonical host, private host exempt)
//!     → dispatch.rs (inject metrics/reporter, fault boundary)
//!     → external RequestHandler
//! ```

pub mod canonical;
pub mod dispatch;
pub mod request;
pub mod server;
pub mod status;

pub use canonical::CanonicalHost;
pub use dispatch::{Dispatcher, RequestHandler, SharedHandler};
pub use request::X_REQUEST_ID;
pub use status::status_handler;
