//! Site worker process.
//!
//! Started by the pool supervisor, once per worker slot.
//!
//! ```text
//!   supervisor ──control socket──┐
//!                                ▼
//!   :port  (shared) ──▶ ┌──────────────────────┐
//!                       │      site-worker     │──▶ session store
//!   :10000+id%100   ──▶ │  dispatch + faults   │──▶ cache
//!                       └──────────────────────┘──▶ error reporting
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::Instrument;

use site_worker::backends::StoreClient;
use site_worker::config::load_config;
use site_worker::fault::HttpReporter;
use site_worker::http::status_handler;
use site_worker::lifecycle::{build_stamp, git_head, SupervisorLink, Worker};
use site_worker::observability::logging::{init_logging, worker_span};
use site_worker::observability::metrics::init_metrics;
use site_worker::observability::{NullSink, SharedMetrics};
use site_worker::WorkerConfig;

#[derive(Parser)]
#[command(name = "site-worker")]
#[command(about = "One worker of a site server pool", long_about = None)]
struct Cli {
    /// Worker configuration file (TOML).
    #[arg(short, long, env = "WORKER_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Identity assigned by the supervisor; picks the private port.
    #[arg(short, long, env = "WORKER_ID", default_value_t = 1)]
    worker_id: u32,

    /// Supervisor control socket. Runs unsupervised when absent.
    #[arg(long, env = "WORKER_CONTROL_SOCKET")]
    control_socket: Option<PathBuf>,

    /// Checkout whose git HEAD goes into the build stamp.
    #[arg(long, default_value = ".")]
    repo: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config, cli.worker_id)?;
    init_logging(&config.log.level);

    let span = worker_span(cli.worker_id);
    run(cli, config).instrument(span).await
}

async fn run(cli: Cli, config: WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let stamp = build_stamp(cli.worker_id, &git_head(&cli.repo), &config.canonical_url());
    tracing::info!(stamp = %stamp, "site-worker v0.1.0 starting");

    let metrics: SharedMetrics = match &config.metrics {
        Some(metrics) => match metrics.address.parse() {
            Ok(addr) => init_metrics(addr, &metrics.prefix),
            Err(e) => {
                tracing::error!(address = %metrics.address, error = %e, "Failed to parse metrics address");
                Arc::new(NullSink)
            }
        },
        None => Arc::new(NullSink),
    };

    let session_store = StoreClient::connect("session-store", &config.session_store).await?;
    let cache = StoreClient::connect("cache", &config.cache).await?;

    let (link, events) = match &cli.control_socket {
        Some(path) => SupervisorLink::connect_unix(path).await?,
        None => {
            tracing::info!("No control socket, running unsupervised");
            SupervisorLink::detached()
        }
    };

    let reporter = config
        .error_reporting
        .as_ref()
        .map(|reporting| Arc::new(HttpReporter::new(reporting, stamp.clone())));

    let mut worker = Worker::new(Arc::new(config), cli.worker_id, status_handler(stamp))
        .with_metrics(metrics)
        .with_resource(Arc::new(session_store))
        .with_resource(Arc::new(cache))
        .with_supervisor(link, events)
        .with_signals();
    if let Some(reporter) = reporter {
        worker = worker.with_reporter(reporter);
    }

    let report = worker.run().await?;
    tracing::info!(
        trigger = %report.trigger,
        disconnect = ?report.disconnect,
        "Shutdown complete"
    );
    Ok(())
}
