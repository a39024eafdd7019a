//! Request dispatch shared by both listeners.
//!
//! # Responsibilities
//! - Inject the metrics sink and error reporter into each request
//! - Run the external request handler inside a fresh fault boundary
//! - On fault: escalate, then abort the connection without a response

use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
};
use futures_util::future::BoxFuture;

use crate::fault::{Fault, FaultBoundary, FaultPolicy, FaultScope};
use crate::http::request::request_id;
use crate::net::{InFlight, ListenerRole};

/// The site's request handler.
///
/// Implemented for any `Fn(Request<Body>, FaultScope) -> impl Future<Output =
/// Result<Response, Fault>>`.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: Request<Body>, scope: FaultScope) -> BoxFuture<'static, Result<Response, Fault>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Request<Body>, FaultScope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Fault>> + Send + 'static,
{
    fn handle(&self, request: Request<Body>, scope: FaultScope) -> BoxFuture<'static, Result<Response, Fault>> {
        Box::pin(self(request, scope))
    }
}

/// Shared handle to the site's request handler.
pub type SharedHandler = Arc<dyn RequestHandler>;

/// Unwind payload used to drop a connection whose request faulted.
#[derive(Debug)]
pub struct ConnectionAborted;

/// State of the dispatch handler, one clone per listener.
#[derive(Clone)]
pub struct Dispatcher {
    role: ListenerRole,
    handler: SharedHandler,
    policy: FaultPolicy,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(handler: SharedHandler, policy: FaultPolicy, in_flight: InFlight) -> Self {
        Self {
            role: ListenerRole::Pool,
            handler,
            policy,
            in_flight,
        }
    }

    /// The same dispatcher, labelled for another listener.
    pub fn for_role(&self, role: ListenerRole) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }
}

/// Fallback handler: every request on either listener lands here.
pub async fn dispatch(State(dispatcher): State<Dispatcher>, mut request: Request<Body>) -> Response {
    let extensions = request.extensions_mut();
    extensions.insert(dispatcher.policy.metrics().clone());
    if let Some(reporter) = dispatcher.policy.reporter() {
        extensions.insert(reporter.clone());
    }

    let request_id = request_id(&request).map(str::to_owned);
    let _guard = dispatcher.in_flight.track(dispatcher.role);
    let (boundary, scope) = FaultBoundary::new(&dispatcher.policy);
    let handler = Arc::clone(&dispatcher.handler);

    match boundary.run(async move { handler.handle(request, scope).await }).await {
        Ok(response) => response,
        Err(fault) => {
            let escalation = dispatcher.policy.escalate(fault);
            tracing::warn!(
                listener = %dispatcher.role,
                request_id = request_id.as_deref().unwrap_or("-"),
                ?escalation,
                "Aborting connection of faulted request"
            );
            std::panic::resume_unwind(Box::new(ConnectionAborted))
        }
    }
}
