//! Canonical host redirection.
//!
//! Requests for any host other than the canonical one are sent there with a
//! 301. The worker's private address (`host:<private port>`) is accepted as
//! well, which is what lets the private listener bypass the redirect.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use url::Url;

use crate::config::WorkerConfig;

/// Accepted hosts and the redirect target.
#[derive(Debug, Clone)]
pub struct CanonicalHost {
    base: String,
    canonical: String,
    private: String,
}

impl CanonicalHost {
    /// `None` when the configured host does not form a valid URL.
    pub fn new(config: &WorkerConfig, private_port: u16) -> Option<Self> {
        let url = Url::parse(&config.canonical_url()).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();
        let canonical = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        Some(Self {
            base: url.as_str().trim_end_matches('/').to_string(),
            canonical,
            private: format!("{}:{}", host, private_port),
        })
    }

    /// Where to send a request for `host`, or `None` to serve it here.
    pub fn redirect_for(&self, host: Option<&str>, path_and_query: &str) -> Option<String> {
        // no Host header: nothing to compare against
        let host = host?.to_ascii_lowercase();
        if host == self.canonical || host == self.private {
            return None;
        }
        Some(format!("{}{}", self.base, path_and_query))
    }

    /// Canonical site URL without trailing slash.
    pub fn base(&self) -> &str {
        &self.base
    }
}

/// Middleware enforcing the canonical host.
pub async fn enforce_canonical_host(
    State(canonical): State<CanonicalHost>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok());
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    match canonical.redirect_for(host, path) {
        Some(location) => {
            tracing::debug!(host = ?host, location = %location, "Redirecting to canonical host");
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        None => next.run(request).await,
    }
}
