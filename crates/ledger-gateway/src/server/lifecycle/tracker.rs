//! In-flight request tracking.
//!
//! The tracker owns the set of requests that have been admitted but whose
//! responses have not finished writing. All mutations happen under one lock
//! and publish the new count on a [`watch`] channel, so
//! [`InFlightTracker::drain`] can never observe an empty set while a
//! registration is still in progress.

use crate::server::telemetry::{decrement_requests_inflight, increment_requests_inflight};
use core::time::Duration;
use ledger_gateway_core::{Error, Result};
use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use std::{collections::HashMap, sync::Arc, time::Instant};
use tokio::sync::watch;

/// One admitted request's pending completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InFlightHandle {
    id: u64,
    created_at: Instant,
}

impl InFlightHandle {
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn created_at(&self) -> Instant {
        self.created_at
    }
}

#[derive(Debug)]
pub struct InFlightTracker {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, Instant>>,
    count: watch::Sender<usize>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            next_id: AtomicU64::new(0),
            handles: Mutex::new(HashMap::new()),
            count,
        }
    }

    /// Adds a new handle to the tracked set.
    pub fn register(&self) -> InFlightHandle {
        let mut handles = self.handles.lock();
        self.insert(&mut handles)
    }

    /// Registers a handle only if `admit` holds, evaluated under the tracker
    /// lock.
    pub fn register_if(&self, admit: impl FnOnce() -> bool) -> Option<InFlightHandle> {
        let mut handles = self.handles.lock();
        admit().then(|| self.insert(&mut handles))
    }

    /// Removes a handle. Returns `false` if it was already removed.
    pub fn deregister(&self, handle: InFlightHandle) -> bool {
        let mut handles = self.handles.lock();
        let removed = handles.remove(&handle.id).is_some();
        if removed {
            self.count.send_replace(handles.len());
            decrement_requests_inflight();
        }
        removed
    }

    /// Runs `f` while no registration or deregistration can happen.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _handles = self.handles.lock();
        f()
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Age of the longest-running tracked request.
    pub fn oldest(&self) -> Option<Duration> {
        self.handles
            .lock()
            .values()
            .min()
            .map(|created_at| created_at.elapsed())
    }

    /// Waits until the tracked set is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DrainTimeout`] if requests are still tracked after
    /// `timeout`. Callers are expected to continue shutting down regardless.
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        let mut count = self.count.subscribe();
        match tokio::time::timeout(timeout, count.wait_for(|n| *n == 0)).await {
            // The sender lives in `self`, so the channel cannot close while
            // we wait on it.
            Ok(_) => Ok(()),
            Err(_) => Err(Error::DrainTimeout {
                timeout,
                remaining: self.len(),
            }),
        }
    }

    fn insert(&self, handles: &mut HashMap<u64, Instant>) -> InFlightHandle {
        let handle = InFlightHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            created_at: Instant::now(),
        };
        handles.insert(handle.id, handle.created_at);
        self.count.send_replace(handles.len());
        increment_requests_inflight();
        handle
    }
}

impl Default for InFlightTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Deregisters its handle when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    tracker: Arc<InFlightTracker>,
    handle: InFlightHandle,
}

impl InFlightGuard {
    pub fn new(tracker: Arc<InFlightTracker>, handle: InFlightHandle) -> Self {
        Self { tracker, handle }
    }

    pub const fn handle(&self) -> InFlightHandle {
        self.handle
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.tracker.deregister(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deregister_is_idempotent() {
        let tracker = InFlightTracker::new();
        let handle = tracker.register();
        assert_eq!(tracker.len(), 1);
        assert!(tracker.deregister(handle));
        assert!(!tracker.deregister(handle));
        assert!(tracker.is_empty());
    }

    #[test]
    fn register_if_respects_predicate() {
        let tracker = InFlightTracker::new();
        assert!(tracker.register_if(|| false).is_none());
        assert!(tracker.is_empty());
        assert!(tracker.register_if(|| true).is_some());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn guard_deregisters_on_drop() {
        let tracker = Arc::new(InFlightTracker::new());
        let guard = InFlightGuard::new(Arc::clone(&tracker), tracker.register());
        assert_eq!(tracker.len(), 1);
        let handle = guard.handle();
        drop(guard);
        assert!(tracker.is_empty());
        assert!(!tracker.deregister(handle));
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_empty() {
        let tracker = InFlightTracker::new();
        tracker.drain(Duration::from_millis(10)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn drain_waits_for_every_request() {
        let tracker = Arc::new(InFlightTracker::new());
        let handles: Vec<_> = (0..8).map(|_| tracker.register()).collect();

        for (i, handle) in handles.into_iter().enumerate() {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5 * i as u64)).await;
                tracker.deregister(handle);
            });
        }

        tracker.drain(Duration::from_secs(5)).await.unwrap();
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn drain_times_out_with_remaining_count() {
        let tracker = InFlightTracker::new();
        let _stuck = tracker.register();
        let _also_stuck = tracker.register();

        let err = tracker.drain(Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(
            err,
            Error::DrainTimeout {
                timeout: Duration::from_millis(20),
                remaining: 2,
            }
        );
    }
}
