//! Metrics collection and exposition.
//!
//! # Metrics
//! - `<prefix>_worker_listen` (counter): pool listener bound
//! - `<prefix>_status_ping` (counter): built-in status handler pings
//!
//! # Design Decisions
//! - Handlers and the lifecycle talk to a [`MetricsSink`], never to the exporter
//! - Without a `[metrics]` table every call is a no-op
//! - The Prometheus exporter is process-global; install it once

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Destination for counters and histograms.
pub trait MetricsSink: Send + Sync + 'static {
    /// Increment a counter by one.
    fn counter(&self, name: &str);

    /// Record one observation in a histogram.
    fn histogram(&self, name: &str, value: f64);
}

/// Shared handle to the worker's metrics sink.
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Sink used when metrics are not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn counter(&self, _name: &str) {}

    fn histogram(&self, _name: &str, _value: f64) {}
}

/// Sink that forwards to the `metrics` facade with a name prefix.
#[derive(Debug, Clone)]
pub struct PrefixedSink {
    prefix: String,
}

impl PrefixedSink {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn name(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.prefix, name)
        }
    }
}

impl MetricsSink for PrefixedSink {
    fn counter(&self, name: &str) {
        metrics::counter!(self.name(name)).increment(1);
    }

    fn histogram(&self, name: &str, value: f64) {
        metrics::histogram!(self.name(name)).record(value);
    }
}

/// Install the Prometheus exporter and return a sink feeding it.
///
/// Must run inside a Tokio runtime; the scrape endpoint is served on it.
pub fn init_metrics(addr: SocketAddr, prefix: &str) -> SharedMetrics {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            tracing::info!(address = %addr, "Metrics exporter listening");
            Arc::new(PrefixedSink::new(prefix))
        }
        Err(e) => {
            tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter");
            Arc::new(NullSink)
        }
    }
}
