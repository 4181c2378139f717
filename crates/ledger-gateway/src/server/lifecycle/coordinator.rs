//! Graceful shutdown coordination.
//!
//! [`ShutdownCoordinator::shutdown`] runs the shutdown sequence at most once:
//!
//! 1. Flip the lifecycle to `Draining` so the admission gate refuses new work.
//! 2. Wait, bounded by the drain timeout, for in-flight requests to finish.
//! 3. Release the ledger: refuse new sessions and wait for an open one to
//!    close, for whatever is left of the drain budget but at least the
//!    release timeout.
//! 4. Mark the lifecycle `Stopped`, which lets the HTTP server exit.
//!
//! Every step proceeds even if the previous one timed out, so shutdown always
//! completes within `drain_timeout + release_timeout` plus scheduling noise.

use super::Lifecycle;
use crate::server::session::SessionGuard;
use core::time::Duration;
use std::sync::Arc;
use tokio::{signal, time::Instant};

/// Result of a call to [`ShutdownCoordinator::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// This call ran the shutdown sequence.
    Completed {
        /// All in-flight requests finished before the drain timeout.
        drained: bool,
        /// No ledger session was left open.
        released: bool,
    },
    /// Shutdown had already been started by an earlier call.
    AlreadyInProgress,
}

pub struct ShutdownCoordinator {
    lifecycle: Arc<Lifecycle>,
    sessions: SessionGuard,
    drain_timeout: Duration,
    release_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(
        lifecycle: Arc<Lifecycle>,
        sessions: SessionGuard,
        drain_timeout: Duration,
        release_timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            sessions,
            drain_timeout,
            release_timeout,
        }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub async fn shutdown(&self) -> ShutdownOutcome {
        if !self.lifecycle.begin_draining() {
            tracing::debug!(
                state = %self.lifecycle.state(),
                "Shutdown already in progress; ignoring"
            );
            return ShutdownOutcome::AlreadyInProgress;
        }

        let tracker = self.lifecycle.tracker();
        tracing::info!(
            in_flight = tracker.len(),
            timeout = ?self.drain_timeout,
            "Refusing new requests; draining in-flight requests"
        );

        let deadline = Instant::now() + self.drain_timeout;
        let drained = match tracker.drain(self.drain_timeout).await {
            Ok(()) => {
                tracing::info!("All in-flight requests drained");
                true
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    oldest = ?tracker.oldest(),
                    "Drain incomplete; forcing shutdown"
                );
                false
            }
        };

        // A request whose client went away is no longer tracked, but its
        // session may still be running. Unused drain time goes to waiting
        // for it.
        let release_timeout = deadline
            .saturating_duration_since(Instant::now())
            .max(self.release_timeout);
        let released = self.sessions.release(release_timeout).await;
        if !released {
            tracing::warn!(
                timeout = ?release_timeout,
                "A ledger session was still open at shutdown"
            );
        }

        self.lifecycle.mark_stopped();
        tracing::info!(drained, released, "Shutdown sequence complete");

        ShutdownOutcome::Completed { drained, released }
    }
}

/// Termination signals that trigger shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Terminate,
    Interrupt,
}

/// Installed signal listeners.
///
/// Listeners are registered up front so a failure to install them aborts
/// startup instead of surfacing mid-flight.
pub struct ShutdownSignals {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
    #[cfg(unix)]
    interrupt: signal::unix::Signal,
}

impl ShutdownSignals {
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use signal::unix::{SignalKind as UnixSignal, signal as listen};
            Ok(Self {
                terminate: listen(UnixSignal::terminate())?,
                interrupt: listen(UnixSignal::interrupt())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Waits for the next termination signal.
    pub async fn recv(&mut self) -> SignalKind {
        #[cfg(unix)]
        {
            tokio::select! {
                _ = self.terminate.recv() => SignalKind::Terminate,
                _ = self.interrupt.recv() => SignalKind::Interrupt,
            }
        }
        #[cfg(not(unix))]
        {
            match signal::ctrl_c().await {
                Ok(()) => SignalKind::Interrupt,
                Err(e) => {
                    tracing::error!("Failed to listen for Ctrl+C: {e}");
                    core::future::pending().await
                }
            }
        }
    }

    /// Triggers `coordinator` on every signal received. Repeated signals are
    /// harmless because the shutdown sequence runs at most once.
    pub async fn run(mut self, coordinator: Arc<ShutdownCoordinator>) {
        loop {
            let kind = self.recv().await;
            tracing::info!(signal = ?kind, "Received termination signal");
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                coordinator.shutdown().await;
            });
        }
    }
}
