//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve the build stamp identifying this worker
//! - Bind the pool listener, then the private listener
//! - Start serving both with the shared dispatcher
//!
//! # Design Decisions
//! - Fail fast: any bind error is fatal and propagates to the supervisor
//! - The private bind waits for the pool bind; reversing the order is a bug
//! - Serving starts only once both sockets are bound

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::http::dispatch::Dispatcher;
use crate::http::server::{build_router, serve};
use crate::http::CanonicalHost;
use crate::net::tls::load_tls_config;
use crate::net::{bind_role, ListenerError, ListenerHandle, ListenerRole};
use crate::observability::SharedMetrics;

/// Close events emitted by the listener pair.
pub type ListenerEvents = mpsc::UnboundedReceiver<ListenerRole>;

/// The worker's two bound and serving listeners.
pub struct ListenerPair {
    pub pool: ListenerHandle,
    pub private: ListenerHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl ListenerPair {
    /// Bind both listeners in order and start serving.
    pub async fn start(
        config: &WorkerConfig,
        worker_id: u32,
        dispatcher: Dispatcher,
        metrics: &SharedMetrics,
    ) -> Result<(Self, ListenerEvents), ListenerError> {
        let ip: IpAddr = config
            .bind_ip
            .parse()
            .map_err(|_| ListenerError::Address(config.bind_ip.clone()))?;
        let tls = match &config.tls {
            Some(tls) => Some(load_tls_config(tls).await?),
            None => None,
        };
        let (events_tx, events) = mpsc::unbounded_channel();

        let requested = SocketAddr::new(ip, config.port);
        let pool_listener = bind_role(ListenerRole::Pool, requested)?;
        let pool_addr = local_addr(ListenerRole::Pool, requested, &pool_listener)?;
        tracing::info!(listener = %ListenerRole::Pool, port = pool_addr.port(), "Listening");
        metrics.counter("worker_listen");

        let private_port = config.private_port(worker_id);
        let requested = SocketAddr::new(ip, private_port);
        let private_listener = bind_role(ListenerRole::Private, requested)?;
        let private_addr = local_addr(ListenerRole::Private, requested, &private_listener)?;
        tracing::info!(listener = %ListenerRole::Private, port = private_addr.port(), "Listening");

        let canonical = if config.canonical_redirect {
            let canonical = CanonicalHost::new(config, private_addr.port());
            if canonical.is_none() {
                tracing::warn!(host = %config.host, "Host is not a valid URL authority, canonical redirect disabled");
            }
            canonical
        } else {
            None
        };

        let drain = Duration::from_secs(config.shutdown.drain_timeout_secs);
        let pool = ListenerHandle::new(ListenerRole::Pool, pool_addr, events_tx.clone());
        let private = ListenerHandle::new(ListenerRole::Private, private_addr, events_tx);

        let mut tasks = Vec::with_capacity(2);
        for (listener, handle) in [(pool_listener, &pool), (private_listener, &private)] {
            let router = build_router(dispatcher.for_role(handle.role()), canonical.clone());
            let handle = handle.clone();
            let tls = tls.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = serve(listener, router, tls, handle.clone(), drain).await {
                    tracing::error!(listener = %handle.role(), error = %e, "HTTP server failed");
                }
                // a server that stops on its own still counts as a close
                handle.close();
            }));
        }

        Ok((Self { pool, private, tasks }, events))
    }

    /// Wait for both servers to drain, cutting them off after `limit`.
    pub async fn join(self, limit: Duration) {
        for task in self.tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(limit, task).await.is_err() {
                tracing::warn!(timeout = ?limit, "Listener did not drain in time, aborting");
                abort.abort();
            }
        }
    }
}

fn local_addr(
    role: ListenerRole,
    addr: SocketAddr,
    listener: &tokio::net::TcpListener,
) -> Result<SocketAddr, ListenerError> {
    listener
        .local_addr()
        .map_err(|source| ListenerError::Bind { role, addr, source })
}

/// Current git commit of the checkout at `repo`, for the build stamp.
pub fn git_head(repo: &Path) -> String {
    match read_git_head(repo) {
        Ok(head) => head,
        Err(e) => format!("(not a git repo) {}", e),
    }
}

fn read_git_head(repo: &Path) -> std::io::Result<String> {
    let git = repo.join(".git");
    let head = fs::read_to_string(git.join("HEAD"))?;
    let head = head.trim();
    match head.strip_prefix("ref:") {
        Some(reference) => Ok(fs::read_to_string(git.join(reference.trim()))?.trim().to_string()),
        None => Ok(head.to_string()),
    }
}

/// One-line identity of this worker, logged at startup and sent with fault reports.
pub fn build_stamp(worker_id: u32, git_head: &str, canonical_url: &str) -> String {
    format!(
        "pid={} worker={} {} {}",
        std::process::id(),
        worker_id,
        git_head,
        canonical_url
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn git_head_follows_refs() {
        let dir = tempfile::tempdir().unwrap();
        let git = dir.path().join(".git");
        fs::create_dir_all(git.join("refs/heads")).unwrap();
        fs::write(git.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(git.join("refs/heads/main"), "0123abcd\n").unwrap();

        assert_eq!(git_head(dir.path()), "0123abcd");
    }

    #[test]
    fn git_head_detached() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "feedface\n").unwrap();

        assert_eq!(git_head(dir.path()), "feedface");
    }

    #[test]
    fn git_head_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(git_head(dir.path()).starts_with("(not a git repo) "));
    }

    #[test]
    fn stamp_format() {
        let stamp = build_stamp(3, "0123abcd", "https://www.example.com");
        assert!(stamp.starts_with("pid="));
        assert!(stamp.ends_with(" worker=3 0123abcd https://www.example.com"));
    }
}
