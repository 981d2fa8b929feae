//! Cooperative shutdown.
//!
//! A termination signal cancels a shared token. The archive loop observes it
//! at two checkpoints only:
//!
//! - the idle wait between polls, which returns as soon as the token is
//!   cancelled, so the process exits immediately;
//! - the boundary between two posts, where the loop stops before touching
//!   the next post. A post that is already being ingested always finishes.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How a cancellable wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wakeup {
    Elapsed,
    Cancelled,
}

/// Shared shutdown state. Clones observe the same signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next safe boundary.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Per-post checkpoint: whether the loop may start another post.
    #[must_use]
    pub fn may_proceed(&self) -> bool {
        !self.is_triggered()
    }

    /// Sleep for `duration`, returning early if shutdown is requested.
    pub async fn sleep(&self, duration: Duration) -> Wakeup {
        tokio::select! {
            () = self.token.cancelled() => Wakeup::Cancelled,
            () = tokio::time::sleep(duration) => Wakeup::Elapsed,
        }
    }
}

/// Install SIGINT/SIGTERM handlers that trigger `shutdown`.
///
/// # Errors
///
/// Returns an error if the handlers cannot be installed.
#[cfg(unix)]
pub fn spawn_signal_listener(shutdown: Shutdown) -> Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
            };
            notify(&shutdown, name);
        }
    }))
}

/// Install a Ctrl+C handler that triggers `shutdown`.
///
/// # Errors
///
/// Returns an error if the handler cannot be installed.
#[cfg(not(unix))]
pub fn spawn_signal_listener(shutdown: Shutdown) -> Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {e}");
                return;
            }
            notify(&shutdown, "Ctrl+C");
        }
    }))
}

fn notify(shutdown: &Shutdown, name: &str) {
    if shutdown.is_triggered() {
        warn!(signal = name, "Received signal, already shutting down");
    } else {
        info!(signal = name, "Received signal, shutting down");
    }
    shutdown.trigger();
}
