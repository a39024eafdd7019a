//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WorkerConfig (validated, immutable)
//!     → shared via Arc with the lifecycle controller
//! ```
//!
//! # Design Decisions
//! - Config is immutable for the lifetime of the worker process
//! - All fields have defaults to allow minimal configs (only `host` is required)
//! - Validation needs the worker identity, since the private port derives from it

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ErrorReportingConfig, LogConfig, MetricsConfig, ShutdownConfig, StoreConfig, TlsConfig,
    WorkerConfig,
};
