//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a worker.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a pool worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Public host name of the site (e.g., "www.example.com"). Required.
    pub host: String,

    /// Port of the pool listener, shared by every worker in the pool.
    pub port: u16,

    /// Base of the per-worker private port range.
    pub private_port_base: u16,

    /// Interface both listeners bind on.
    pub bind_ip: String,

    /// Redirect requests for foreign hosts to the canonical host.
    pub canonical_redirect: bool,

    /// Optional TLS material; enables https on both listeners.
    pub tls: Option<TlsConfig>,

    /// Session store connection.
    pub session_store: StoreConfig,

    /// General purpose cache connection.
    pub cache: StoreConfig,

    /// Error reporting service. Faults are not reported when absent.
    pub error_reporting: Option<ErrorReportingConfig>,

    /// Prometheus exporter. Metrics are discarded when absent.
    pub metrics: Option<MetricsConfig>,

    /// Shutdown timing.
    pub shutdown: ShutdownConfig,

    /// Logging settings.
    pub log: LogConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            private_port_base: 10_000,
            bind_ip: "0.0.0.0".to_string(),
            canonical_redirect: true,
            tls: None,
            session_store: StoreConfig::default(),
            cache: StoreConfig::default(),
            error_reporting: None,
            metrics: None,
            shutdown: ShutdownConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Port of the private listener for the given worker identity.
    pub fn private_port(&self, worker_id: u32) -> u16 {
        // worker_id % 100 < 100, so the cast is lossless
        self.private_port_base
            .saturating_add((worker_id % 100) as u16)
    }

    /// URL scheme both listeners speak.
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() {
            "https"
        } else {
            "http"
        }
    }

    /// Canonical site URL, e.g. `https://www.example.com`.
    pub fn canonical_url(&self) -> String {
        format!("{}://{}", self.scheme(), self.host)
    }
}

/// TLS configuration shared by both listeners.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Connection settings for a Redis-compatible store (session store, cache).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store address (e.g., "127.0.0.1:6379").
    pub address: String,

    /// Password sent with AUTH after connecting.
    pub auth: Option<String>,

    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:6379".to_string(),
            auth: None,
            connect_timeout_ms: 2000,
        }
    }
}

/// Error reporting service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorReportingConfig {
    /// Endpoint fault reports are POSTed to.
    pub endpoint: String,

    /// API key sent in the `X-ApiKey` header.
    pub api_key: String,
}

/// Metrics exporter settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus scrape endpoint bind address.
    pub address: String,

    /// Prefix prepended to every metric name.
    pub prefix: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:9090".to_string(),
            prefix: "site".to_string(),
        }
    }
}

/// Shutdown timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long to wait for the supervisor to drop the control channel
    /// before disconnecting it ourselves.
    pub disconnect_grace_ms: u64,

    /// Upper bound for releasing each backing resource.
    pub teardown_timeout_ms: u64,

    /// Upper bound for in-flight connections to drain after a listener closes.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            disconnect_grace_ms: 100,
            teardown_timeout_ms: 5000,
            drain_timeout_secs: 30,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
