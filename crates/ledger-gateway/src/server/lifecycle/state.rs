use core::fmt;
use portable_atomic::{AtomicU8, Ordering};

/// Process-wide server phase.
///
/// Transitions only move forward: `Running -> Draining -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl ServerState {
    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic cell holding the current [`ServerState`].
///
/// Read on every request by the admission gate, written only by the shutdown
/// coordinator.
#[derive(Debug)]
pub struct LifecycleState(AtomicU8);

impl LifecycleState {
    pub const fn new() -> Self {
        Self(AtomicU8::new(ServerState::Running as u8))
    }

    pub fn current(&self) -> ServerState {
        ServerState::from_raw(self.0.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.current() == ServerState::Running
    }

    /// Moves `Running -> Draining`. Returns `false` if the server had already
    /// left `Running`.
    pub fn begin_draining(&self) -> bool {
        self.transition(ServerState::Running, ServerState::Draining)
    }

    /// Moves `Draining -> Stopped`. Returns `false` for any other origin.
    pub fn mark_stopped(&self) -> bool {
        self.transition(ServerState::Draining, ServerState::Stopped)
    }

    fn transition(&self, from: ServerState, to: ServerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        let state = LifecycleState::new();
        assert_eq!(state.current(), ServerState::Running);
        assert!(state.is_running());
    }

    #[test]
    fn transitions_are_forward_only_and_idempotent() {
        let state = LifecycleState::new();
        assert!(!state.mark_stopped(), "cannot stop before draining");

        assert!(state.begin_draining());
        assert!(!state.begin_draining(), "second signal is a no-op");
        assert_eq!(state.current(), ServerState::Draining);

        assert!(state.mark_stopped());
        assert!(!state.mark_stopped());
        assert!(!state.begin_draining());
        assert_eq!(state.current(), ServerState::Stopped);
    }
}
