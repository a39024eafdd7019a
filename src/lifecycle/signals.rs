//! OS signal handling.
//!
//! SIGTERM and SIGINT close the pool listener. The resulting close event
//! runs the normal shutdown sequence; there is no separate signal path.

use crate::net::ListenerHandle;

/// Wait for SIGTERM or SIGINT.
pub async fn termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = term.recv() => tracing::info!("SIGTERM received"),
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C received");
    }
}

/// Close `pool` on the first termination signal.
pub fn close_on_signal(pool: ListenerHandle) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        termination().await;
        pool.close();
    })
}
