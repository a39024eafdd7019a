//! Built-in status handler for a stand-alone worker.
//!
//! Embedders replace it with their site's handler; it exists so a worker
//! started from the binary answers health checks on its private port.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};

use crate::fault::{Fault, FaultScope};
use crate::http::dispatch::SharedHandler;

/// Handler answering `/-/ping` and `/-/stamp`; everything else is a 404.
pub fn status_handler(stamp: impl Into<Arc<str>>) -> SharedHandler {
    let stamp: Arc<str> = stamp.into();
    Arc::new(move |request: Request<Body>, scope: FaultScope| {
        let stamp = Arc::clone(&stamp);
        async move {
            let response = match request.uri().path() {
                "/-/ping" => {
                    scope.metrics().counter("status_ping");
                    "pong\n".into_response()
                }
                "/-/stamp" => format!("{}\n", stamp).into_response(),
                _ => (StatusCode::NOT_FOUND, "not found\n").into_response(),
            };
            Ok::<Response, Fault>(response)
        }
    })
}
