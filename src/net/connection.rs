//! In-flight request tracking.
//!
//! Requests are never cancelled on shutdown; they drain. The tracker lets
//! the lifecycle report how many are still running on each listener.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::net::listener::ListenerRole;

/// Global counter for request sequence numbers.
/// Relaxed ordering is enough, only uniqueness matters.
static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// Counts requests currently being handled, per listener.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    pool: Arc<AtomicU64>,
    private: Arc<AtomicU64>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(&self, role: ListenerRole) -> &Arc<AtomicU64> {
        match role {
            ListenerRole::Pool => &self.pool,
            ListenerRole::Private => &self.private,
        }
    }

    /// Record a request on `role`. The returned guard decrements on drop,
    /// including when the request's task unwinds.
    pub fn track(&self, role: ListenerRole) -> RequestGuard {
        let counter = Arc::clone(self.counter(role));
        counter.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            counter,
            seq: REQUEST_SEQ.fetch_add(1, Ordering::Relaxed),
            role,
        }
    }

    pub fn count(&self, role: ListenerRole) -> u64 {
        self.counter(role).load(Ordering::SeqCst)
    }

    pub fn total(&self) -> u64 {
        self.count(ListenerRole::Pool) + self.count(ListenerRole::Private)
    }
}

/// Keeps one request counted while alive.
#[derive(Debug)]
pub struct RequestGuard {
    counter: Arc<AtomicU64>,
    seq: u64,
    role: ListenerRole,
}

impl RequestGuard {
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(seq = self.seq, listener = %self.role, "Request finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_listener() {
        let in_flight = InFlight::new();
        let a = in_flight.track(ListenerRole::Pool);
        let b = in_flight.track(ListenerRole::Private);
        let c = in_flight.track(ListenerRole::Pool);
        assert_ne!(a.seq(), c.seq());
        assert_eq!(in_flight.count(ListenerRole::Pool), 2);
        assert_eq!(in_flight.total(), 3);

        drop(a);
        drop(b);
        assert_eq!(in_flight.count(ListenerRole::Private), 0);
        assert_eq!(in_flight.total(), 1);
        drop(c);
        assert_eq!(in_flight.total(), 0);
    }
}
