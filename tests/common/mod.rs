//! Shared utilities for worker integration tests.

#![allow(dead_code)]

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use site_worker::config::StoreConfig;
use site_worker::fault::ErrorReporter;
use site_worker::observability::MetricsSink;
use site_worker::{Fault, WorkerConfig};

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    let probe = StdTcpListener::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

/// Base for the private port range such that `worker_id`'s private port was
/// free a moment ago.
pub fn private_port_base(worker_id: u32) -> u16 {
    free_port() - (worker_id % 100) as u16
}

/// Loopback config with an ephemeral pool port and fast shutdown timing.
pub fn test_config(worker_id: u32) -> WorkerConfig {
    let mut config = WorkerConfig {
        host: "localhost".into(),
        port: 0,
        bind_ip: "127.0.0.1".into(),
        private_port_base: private_port_base(worker_id),
        canonical_redirect: false,
        ..WorkerConfig::default()
    };
    config.shutdown.disconnect_grace_ms = 50;
    config.shutdown.teardown_timeout_ms = 500;
    config.shutdown.drain_timeout_secs = 5;
    config
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Start a Redis-protocol store that answers everything with +OK and counts QUITs
/// across all connections.
pub async fn start_mock_store() -> (StoreConfig, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let quits = Arc::new(AtomicUsize::new(0));
    let quits_task = quits.clone();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let quits = quits_task.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(socket);
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let count: usize = header.trim()[1..].parse().unwrap_or(0);
                    let mut verb = String::new();
                    for i in 0..count {
                        let mut len = String::new();
                        reader.read_line(&mut len).await.unwrap();
                        let len: usize = len.trim()[1..].parse().unwrap();
                        let mut buf = vec![0u8; len + 2];
                        reader.read_exact(&mut buf).await.unwrap();
                        if i == 0 {
                            verb = String::from_utf8_lossy(&buf[..len]).to_string();
                        }
                    }
                    if verb == "QUIT" {
                        quits.fetch_add(1, Ordering::SeqCst);
                    }
                    let _ = reader.get_mut().write_all(b"+OK\r\n").await;
                }
            });
        }
    });

    (
        StoreConfig {
            address,
            auth: None,
            connect_timeout_ms: 1000,
        },
        quits,
    )
}

/// Reporter that counts the faults it receives.
#[derive(Default)]
pub struct CountingReporter {
    pub sent: AtomicUsize,
    pub messages: Mutex<Vec<String>>,
}

impl ErrorReporter for CountingReporter {
    fn send(&self, fault: &Fault) {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.messages.lock().unwrap().push(fault.to_string());
    }
}

/// Metrics sink that records counter names.
#[derive(Default)]
pub struct RecordingSink {
    pub counters: Mutex<Vec<String>>,
}

impl MetricsSink for RecordingSink {
    fn counter(&self, name: &str) {
        self.counters.lock().unwrap().push(name.to_string());
    }

    fn histogram(&self, _name: &str, _value: f64) {}
}
