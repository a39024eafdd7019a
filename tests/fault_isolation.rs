//! Request fault tests: a failing request is reported once, its connection
//! is dropped and the worker terminates, unless shutdown is already underway.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};

use common::{http_client, test_config, CountingReporter};
use site_worker::config::ErrorReportingConfig;
use site_worker::fault::{BoxError, HttpReporter};
use site_worker::http::SharedHandler;
use site_worker::lifecycle::Phase;
use site_worker::{Fault, FaultScope, Worker, WorkerError};

fn faulty_site() -> SharedHandler {
    Arc::new(|request: Request<Body>, scope: FaultScope| async move {
        match request.uri().path() {
            "/ok" => Ok::<Response, Fault>("fine".into_response()),
            "/error" => Err(Fault::handler("template failed to render")),
            "/panic" => panic!("handler blew up"),
            "/task" => {
                let _ = scope.spawn(async { Err::<(), BoxError>("background write failed".into()) });
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("never".into_response())
            }
            "/slow-error" => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Err(Fault::handler("failed late"))
            }
            _ => Ok("other".into_response()),
        }
    })
}

async fn expect_fault(path: &str, reporter: Arc<CountingReporter>) -> Fault {
    let worker = Worker::new(Arc::new(test_config(20)), 20, faulty_site())
        .with_reporter(reporter.clone())
        .start()
        .await
        .unwrap();
    let addr = worker.pool_addr();
    let client = http_client();

    let res = client.get(format!("http://{}/ok", addr)).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "fine");

    let res = client.get(format!("http://{}{}", addr, path)).send().await;
    assert!(res.is_err(), "faulted request must not get a response");

    match tokio::time::timeout(Duration::from_secs(5), worker.wait())
        .await
        .expect("worker terminates")
    {
        Err(WorkerError::Fault(fault)) => fault,
        Err(other) => panic!("unexpected error: {}", other),
        Ok(report) => panic!("worker shut down cleanly: {:?}", report),
    }
}

#[tokio::test]
async fn test_handler_error_is_reported_once_and_terminates() {
    let reporter = Arc::new(CountingReporter::default());
    let fault = expect_fault("/error", reporter.clone()).await;

    assert_eq!(fault.kind(), "HandlerError");
    assert_eq!(reporter.sent.load(Ordering::SeqCst), 1);
    assert!(reporter.messages.lock().unwrap()[0].contains("template failed to render"));
}

#[tokio::test]
async fn test_handler_panic_is_contained() {
    let reporter = Arc::new(CountingReporter::default());
    let fault = expect_fault("/panic", reporter.clone()).await;

    assert_eq!(fault.kind(), "Panic");
    assert!(fault.to_string().contains("handler blew up"));
    assert_eq!(reporter.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_spawned_task_fault_belongs_to_its_request() {
    let reporter = Arc::new(CountingReporter::default());
    let fault = expect_fault("/task", reporter.clone()).await;

    assert_eq!(fault.kind(), "TaskError");
    assert_eq!(reporter.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fault_without_reporter_still_terminates() {
    let worker = Worker::new(Arc::new(test_config(21)), 21, faulty_site())
        .start()
        .await
        .unwrap();

    let res = http_client()
        .get(format!("http://{}/error", worker.private_addr()))
        .send()
        .await;
    assert!(res.is_err());

    let result = tokio::time::timeout(Duration::from_secs(5), worker.wait())
        .await
        .unwrap();
    assert!(matches!(result, Err(WorkerError::Fault(_))));
}

#[tokio::test]
async fn test_fault_during_shutdown_is_only_logged() {
    let reporter = Arc::new(CountingReporter::default());
    let worker = Worker::new(Arc::new(test_config(22)), 22, faulty_site())
        .with_reporter(reporter.clone())
        .start()
        .await
        .unwrap();
    let addr = worker.pool_addr();
    let state = worker.shutdown_state();

    let request = tokio::spawn(async move {
        http_client()
            .get(format!("http://{}/slow-error", addr))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    worker.pool().close();

    let report = tokio::time::timeout(Duration::from_secs(5), worker.wait())
        .await
        .expect("worker drains")
        .expect("late fault does not turn shutdown into a crash");

    assert_eq!(state.phase(), Phase::Disconnected);
    assert!(report.released.is_empty());
    assert_eq!(reporter.sent.load(Ordering::SeqCst), 0);
    assert!(request.await.unwrap().is_err());
}

/// Collector on a plain thread, so it outlives the worker's runtime.
fn start_collector() -> (String, std::sync::mpsc::Receiver<String>) {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/entries", listener.local_addr().unwrap());
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).unwrap_or(0);
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&received);
            if text.contains("\r\n\r\n") && text.trim_end().ends_with('}') {
                break;
            }
        }
        let _ = socket.write_all(b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        let _ = tx.send(String::from_utf8_lossy(&received).to_string());
    });

    (endpoint, rx)
}

#[test]
fn test_fault_report_is_delivered_before_worker_exits() {
    let (endpoint, received) = start_collector();
    let reporting = ErrorReportingConfig {
        endpoint,
        api_key: "k3y".into(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    let result = runtime.block_on(async {
        let worker = Worker::new(Arc::new(test_config(23)), 23, faulty_site())
            .with_reporter(Arc::new(HttpReporter::new(&reporting, "worker=23")))
            .start()
            .await
            .unwrap();

        let res = http_client()
            .get(format!("http://{}/error", worker.pool_addr()))
            .send()
            .await;
        assert!(res.is_err());

        tokio::time::timeout(Duration::from_secs(5), worker.wait())
            .await
            .unwrap()
    });
    // same as main returning: nothing spawned on the runtime survives this
    drop(runtime);

    assert!(matches!(result, Err(WorkerError::Fault(_))));
    let request = received
        .recv_timeout(Duration::from_secs(1))
        .expect("collector received the report");
    assert!(request.starts_with("POST /entries"));
    assert!(request.to_lowercase().contains("x-apikey: k3y"));
    assert!(request.contains("template failed to render"));
}
