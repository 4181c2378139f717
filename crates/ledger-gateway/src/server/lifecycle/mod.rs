//! Server lifecycle: state, in-flight tracking, admission and shutdown.
//!
//! A single [`Lifecycle`] is constructed at startup and shared (behind an
//! `Arc`) with the HTTP layer and the [`ShutdownCoordinator`]. Nothing in this
//! module is process-global, so tests build isolated instances freely.
//!
//! ## Structure
//!
//! - [`state`] - Atomic `Running -> Draining -> Stopped` state.
//! - [`tracker`] - Set of admitted requests with a bounded drain wait.
//! - [`gate`] - Admission middleware that rejects work while draining.
//! - [`coordinator`] - Signal-driven, idempotent shutdown sequence.

pub mod coordinator;
pub mod gate;
pub mod state;
pub mod tracker;

pub use coordinator::{ShutdownCoordinator, ShutdownOutcome, ShutdownSignals};
pub use state::{LifecycleState, ServerState};
pub use tracker::{InFlightGuard, InFlightHandle, InFlightTracker};

use std::sync::Arc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
    tracker: Arc<InFlightTracker>,
    stopped: CancellationToken,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::new(),
            tracker: Arc::new(InFlightTracker::new()),
            stopped: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> ServerState {
        self.state.current()
    }

    pub fn tracker(&self) -> &Arc<InFlightTracker> {
        &self.tracker
    }

    /// Whether a new request may start. Evaluated fresh on every call.
    pub fn admit(&self) -> bool {
        self.state.is_running()
    }

    /// Admits and registers a request in one step.
    ///
    /// The state check and the registration happen under the tracker lock,
    /// which [`begin_draining`](Self::begin_draining) also takes, so a request
    /// is either counted before draining starts or rejected.
    pub fn try_admit(&self) -> Option<InFlightGuard> {
        self.tracker
            .register_if(|| self.admit())
            .map(|handle| InFlightGuard::new(Arc::clone(&self.tracker), handle))
    }

    /// `Running -> Draining`. Returns `false` if draining had already begun.
    pub fn begin_draining(&self) -> bool {
        self.tracker.exclusive(|| self.state.begin_draining())
    }

    /// `Draining -> Stopped`, then wakes everything waiting on
    /// [`stopped`](Self::stopped).
    pub fn mark_stopped(&self) -> bool {
        let stopped = self.state.mark_stopped();
        if stopped {
            self.stopped.cancel();
        }
        stopped
    }

    /// Resolves once the server has reached [`ServerState::Stopped`].
    pub fn stopped(&self) -> WaitForCancellationFutureOwned {
        self.stopped.clone().cancelled_owned()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
