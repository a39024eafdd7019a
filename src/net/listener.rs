//! TCP listener binding and close handles.
//!
//! # Responsibilities
//! - Bind sockets either shared with the rest of the worker pool or exclusively
//! - Hand out close handles that stop accepting and emit one close event
//!
//! # Design Decisions
//! - Pool membership is an explicit [`BindMode`] argument, never process state,
//!   so a failed bind has nothing to restore
//! - A close handle's hook can be detached before closing, which is how the
//!   shutdown coordinator closes a sibling without hearing its own echo

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{mpsc, watch};

/// Listen backlog for both listeners.
const BACKLOG: u32 = 1024;

/// Which of the worker's two listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerRole {
    /// Bound to the advertised port, load-balanced across the pool.
    Pool,
    /// Bound to the per-worker port, reachable only by direct address.
    Private,
}

impl ListenerRole {
    /// The other listener.
    pub fn sibling(self) -> Self {
        match self {
            ListenerRole::Pool => ListenerRole::Private,
            ListenerRole::Private => ListenerRole::Pool,
        }
    }

    pub fn is_pool_shared(self) -> bool {
        self == ListenerRole::Pool
    }

    /// How a listener in this role binds its socket.
    pub fn bind_mode(self) -> BindMode {
        if self.is_pool_shared() {
            BindMode::Shared
        } else {
            BindMode::Exclusive
        }
    }
}

impl fmt::Display for ListenerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerRole::Pool => write!(f, "pool"),
            ListenerRole::Private => write!(f, "private"),
        }
    }
}

/// Whether a socket joins the pool's shared port or owns its port alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindMode {
    /// `SO_REUSEPORT`: sibling worker processes bind the same port and the
    /// kernel balances connections between them.
    Shared,
    /// Sole owner of the port.
    Exclusive,
}

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {0:?}")]
    Address(String),

    #[error("failed to bind {role} listener on {addr}: {source}")]
    Bind {
        role: ListenerRole,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to load TLS material: {0}")]
    Tls(#[source] io::Error),
}

/// Bind a listening socket in the given mode.
///
/// Must be called from within a Tokio runtime.
pub fn bind(addr: SocketAddr, mode: BindMode) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    if mode == BindMode::Shared {
        set_shared(&socket)?;
    }
    socket.bind(addr)?;
    socket.listen(BACKLOG)
}

#[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
fn set_shared(socket: &TcpSocket) -> io::Result<()> {
    socket.set_reuseport(true)
}

#[cfg(not(all(unix, not(target_os = "solaris"), not(target_os = "illumos"))))]
fn set_shared(_socket: &TcpSocket) -> io::Result<()> {
    tracing::warn!("SO_REUSEPORT unavailable, pool listener bound exclusively");
    Ok(())
}

/// Bind the listener for `role`, mapping failures to [`ListenerError`].
pub fn bind_role(role: ListenerRole, addr: SocketAddr) -> Result<TcpListener, ListenerError> {
    bind(addr, role.bind_mode()).map_err(|source| ListenerError::Bind { role, addr, source })
}

/// Close handle of one bound listener.
///
/// Cloning is cheap; all clones share the same state.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    role: ListenerRole,
    local_addr: SocketAddr,
    closing: Arc<watch::Sender<bool>>,
    hook: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<ListenerRole>,
}

impl ListenerHandle {
    /// Create a handle whose close event goes to `events`.
    pub fn new(
        role: ListenerRole,
        local_addr: SocketAddr,
        events: mpsc::UnboundedSender<ListenerRole>,
    ) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            role,
            local_addr,
            closing: Arc::new(closing),
            hook: Arc::new(AtomicBool::new(true)),
            events,
        }
    }

    pub fn role(&self) -> ListenerRole {
        self.role
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        *self.closing.borrow()
    }

    /// Whether closing will emit a close event.
    pub fn has_close_hook(&self) -> bool {
        self.hook.load(Ordering::SeqCst)
    }

    /// Stop close events from this listener. Returns whether a hook was attached.
    pub fn detach_close_hook(&self) -> bool {
        self.hook.swap(false, Ordering::SeqCst)
    }

    /// Stop accepting connections.
    ///
    /// The first call emits this listener's close event if its hook is still
    /// attached. Later calls do nothing.
    pub fn close(&self) {
        let was_closed = self.closing.send_replace(true);
        if was_closed {
            return;
        }
        tracing::info!(listener = %self.role, address = %self.local_addr, "Listener closing");
        if self.has_close_hook() {
            let _ = self.events.send(self.role);
        }
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub fn closed(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.closing.subscribe();
        async move {
            let _ = rx.wait_for(|closed| *closed).await;
        }
    }
}
