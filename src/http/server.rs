//! HTTP server setup for one listener.
//!
//! # Responsibilities
//! - Build the Axum router around the dispatcher
//! - Wire up middleware (request id, tracing, canonical host)
//! - Serve a bound listener, plain or TLS, until its handle closes

use std::io;
use std::time::Duration;

use axum::{middleware, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::http::canonical::{enforce_canonical_host, CanonicalHost};
use crate::http::dispatch::{dispatch, Dispatcher};
use crate::http::request::MakeRequestUuidV4;
use crate::net::ListenerHandle;

/// Build the router served by one listener.
pub fn build_router(dispatcher: Dispatcher, canonical: Option<CanonicalHost>) -> Router {
    let mut router = Router::new().fallback(dispatch).with_state(dispatcher);

    if let Some(canonical) = canonical {
        router = router.layer(middleware::from_fn_with_state(
            canonical,
            enforce_canonical_host,
        ));
    }

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

/// Serve `listener` until `handle` is closed and in-flight requests drain.
///
/// Plain HTTP drains without a bound; the caller bounds the whole task.
/// TLS connections are given `drain` before being cut.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    tls: Option<RustlsConfig>,
    handle: ListenerHandle,
    drain: Duration,
) -> io::Result<()> {
    let role = handle.role();
    let addr = listener.local_addr()?;
    tracing::info!(listener = %role, address = %addr, tls = tls.is_some(), "HTTP server starting");

    match tls {
        None => {
            axum::serve(listener, router)
                .with_graceful_shutdown(handle.closed())
                .await?;
        }
        Some(config) => {
            let server_handle = axum_server::Handle::new();
            let shutdown = server_handle.clone();
            let closed = handle.closed();
            tokio::spawn(async move {
                closed.await;
                shutdown.graceful_shutdown(Some(drain));
            });

            axum_server::from_tcp_rustls(listener.into_std()?, config)
                .handle(server_handle)
                .serve(router.into_make_service())
                .await?;
        }
    }

    tracing::info!(listener = %role, address = %addr, "HTTP server stopped");
    Ok(())
}
