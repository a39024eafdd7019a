//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Pool port (shared)      Private port (10000 + id % 100)
//!     → listener.rs (bind mode, close handles)
//!     → tls.rs (optional rustls, same material for both)
//!     → connection.rs (in-flight accounting)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - The pool listener always binds before the private one
//! - TLS is optional and applies to both listeners or neither

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::InFlight;
pub use listener::{bind, bind_role, BindMode, ListenerError, ListenerHandle, ListenerRole};
