//! Control channel to the supervising process.
//!
//! # Protocol
//! ```text
//! line-oriented, one command per line
//!
//! supervisor → worker:  "disconnect"   supervisor wants this worker to stop
//!                       "ping"         answered with "pong"
//! worker → supervisor:  "disconnect"   worker detaches; its end is shut down
//! EOF (either side)                    channel disconnected
//! ```
//!
//! # Design Decisions
//! - A driver task owns the stream; the link only sees a `connected` flag
//! - Disconnecting an already closing channel is a no-op, never an error

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};

/// Something the supervisor asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The supervisor wants the worker to stop serving and detach.
    DisconnectRequested,
}

/// Receiving side of supervisor events.
pub type SupervisorEvents = mpsc::UnboundedReceiver<SupervisorEvent>;

/// The worker's end of the control channel.
#[derive(Debug, Clone)]
pub struct SupervisorLink {
    connected: watch::Receiver<bool>,
    commands: Option<mpsc::UnboundedSender<()>>,
    disconnect_sent: Arc<AtomicBool>,
}

impl SupervisorLink {
    /// A link for a worker running without a supervisor. Never connected.
    pub fn detached() -> (Self, SupervisorEvents) {
        let (_, connected) = watch::channel(false);
        let (_, events) = mpsc::unbounded_channel();
        (
            Self {
                connected,
                commands: None,
                disconnect_sent: Arc::new(AtomicBool::new(false)),
            },
            events,
        )
    }

    /// Connect to the supervisor's Unix socket.
    #[cfg(unix)]
    pub async fn connect_unix(path: &Path) -> io::Result<(Self, SupervisorEvents)> {
        let stream = tokio::net::UnixStream::connect(path).await?;
        tracing::info!(path = ?path, "Supervisor control channel connected");
        Ok(Self::attach(stream))
    }

    #[cfg(not(unix))]
    pub async fn connect_unix(_path: &Path) -> io::Result<(Self, SupervisorEvents)> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "unix control sockets are not supported on this platform",
        ))
    }

    /// Drive the control protocol over an already open stream.
    pub fn attach<S>(stream: S) -> (Self, SupervisorEvents)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (connected_tx, connected) = watch::channel(true);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        tokio::spawn(drive(stream, connected_tx, commands_rx, events_tx));

        (
            Self {
                connected,
                commands: Some(commands_tx),
                disconnect_sent: Arc::new(AtomicBool::new(false)),
            },
            events,
        )
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Resolves once the channel is closed, by either side.
    pub async fn disconnected(&self) {
        let mut connected = self.connected.clone();
        let _ = connected.wait_for(|c| !*c).await;
    }

    /// Detach from the supervisor.
    ///
    /// Returns whether a disconnect was actually sent. Calling this while the
    /// channel is already closed, or a second time, does nothing.
    pub fn disconnect(&self) -> bool {
        if !self.is_connected() || self.disconnect_sent.swap(true, Ordering::SeqCst) {
            return false;
        }
        match &self.commands {
            Some(commands) => commands.send(()).is_ok(),
            None => false,
        }
    }
}

async fn drive<S>(
    stream: S,
    connected: watch::Sender<bool>,
    mut commands: mpsc::UnboundedReceiver<()>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match line.trim() {
                    "disconnect" => {
                        tracing::info!("Supervisor requested disconnect");
                        let _ = events.send(SupervisorEvent::DisconnectRequested);
                    }
                    "ping" => {
                        if write.write_all(b"pong\n").await.is_err() {
                            break;
                        }
                    }
                    other => tracing::debug!(message = other, "Ignoring supervisor message"),
                },
                Ok(None) => {
                    tracing::info!("Supervisor closed control channel");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Control channel read failed");
                    break;
                }
            },
            Some(()) = commands.recv() => {
                tracing::info!("Disconnecting from supervisor");
                let _ = write.write_all(b"disconnect\n").await;
                let _ = write.shutdown().await;
                break;
            }
        }
    }

    connected.send_replace(false);
}
