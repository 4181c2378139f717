//! The Session Guard.
//!
//! Every ledger operation runs inside a session: connect, synchronize the
//! ledger file, execute, close. [`SessionGuard::with_session`] owns that
//! sequence and guarantees:
//!
//! - **Mutual exclusion.** One async mutex, which also owns the local ledger
//!   cache directory, is held for the whole open..close span. Two sessions
//!   never sync or mutate the same cached file concurrently.
//! - **Close exactly once.** A session that opened is closed on every exit
//!   path: success, sync failure, operation error, or a panic in either.
//! - **Errors are never masked.** A failing close is logged and counted but
//!   the caller always sees the result of connect, sync or the operation.
//! - **No mid-span cancellation.** The span runs on its own task, so a client
//!   that disconnects does not abort a session halfway.

use crate::server::telemetry::{
    increment_close_failures, increment_session_failures, increment_sessions_opened,
    record_session_duration,
};
use core::time::Duration;
use futures::{FutureExt, future::BoxFuture};
use ledger_gateway_core::{Error, LedgerConnection, LedgerConnector, Result, types::Secret};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};
use tokio::sync::Mutex;
use tracing::Instrument;

/// The ledger every session synchronizes.
#[derive(Debug, Clone)]
pub struct LedgerTarget {
    pub ledger_id: String,
    pub file_password: Option<Secret>,
}

/// Exclusive handle on the local cache directory.
#[derive(Debug)]
struct LedgerCache {
    dir: PathBuf,
}

impl LedgerCache {
    async fn prepare(&self) -> Result<&Path> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::connect(format!("cannot prepare ledger cache directory: {e}")))?;
        Ok(&self.dir)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Open,
    Synced,
}

/// One open connection plus its synchronized ledger.
///
/// Only constructed by a successful connect; consumed by [`Session::close`].
struct Session {
    connection: Box<dyn LedgerConnection>,
    state: SessionState,
    opened_at: Instant,
}

impl Session {
    async fn open(connector: &dyn LedgerConnector, cache: &LedgerCache) -> Result<Self> {
        let data_dir = cache.prepare().await?;
        let connection = connector.connect(data_dir).await?;
        increment_sessions_opened();
        Ok(Self {
            connection,
            state: SessionState::Open,
            opened_at: Instant::now(),
        })
    }

    async fn sync(&mut self, target: &LedgerTarget) -> Result<()> {
        let password = target.file_password.as_ref().map(Secret::expose);
        self.connection
            .sync_ledger(&target.ledger_id, password)
            .await?;
        self.state = SessionState::Synced;
        Ok(())
    }

    async fn execute<T, F>(&mut self, op: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut dyn LedgerConnection) -> BoxFuture<'c, Result<T>>,
    {
        debug_assert_eq!(self.state, SessionState::Synced);
        op(self.connection.as_mut()).await
    }

    /// Syncs, then executes `op`. A panic in either step is returned as an
    /// error so the caller can still close the session.
    async fn sync_and_execute<T, F>(&mut self, target: &LedgerTarget, op: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut dyn LedgerConnection) -> BoxFuture<'c, Result<T>>,
    {
        let steps = async {
            self.sync(target).await?;
            self.execute(op).await
        };
        match AssertUnwindSafe(steps).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(Error::operation(format!(
                "Ledger operation panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Closes the connection. Failures are logged, never returned.
    async fn close(mut self) {
        if let Err(e) = self.connection.close().await {
            increment_close_failures();
            tracing::warn!(error = %e, "Ignoring error while closing ledger session");
        }
        let elapsed = self.opened_at.elapsed();
        record_session_duration(elapsed.as_secs_f64() * 1_000.0);
        tracing::debug!(?elapsed, "Ledger session closed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

struct Inner {
    connector: Arc<dyn LedgerConnector>,
    target: LedgerTarget,
    cache: Mutex<LedgerCache>,
    released: AtomicBool,
    open: AtomicBool,
    completed: AtomicUsize,
}

impl Inner {
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut dyn LedgerConnection) -> BoxFuture<'c, Result<T>>,
    {
        let cache = self.cache.lock().await;
        if self.released.load(Ordering::Acquire) {
            return Err(Error::ServiceShutdown);
        }

        let mut session = Session::open(self.connector.as_ref(), &cache).await?;
        self.open.store(true, Ordering::Release);

        let outcome = session.sync_and_execute(&self.target, op).await;

        session.close().await;
        self.open.store(false, Ordering::Release);
        self.completed.fetch_add(1, Ordering::Relaxed);
        drop(cache);

        outcome
    }
}

/// Serializes access to the remote ledger. Cheap to clone.
#[derive(Clone)]
pub struct SessionGuard {
    inner: Arc<Inner>,
}

impl SessionGuard {
    pub fn new(
        connector: Arc<dyn LedgerConnector>,
        target: LedgerTarget,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                target,
                cache: Mutex::new(LedgerCache {
                    dir: cache_dir.into(),
                }),
                released: AtomicBool::new(false),
                open: AtomicBool::new(false),
                completed: AtomicUsize::new(0),
            }),
        }
    }

    /// Runs `op` inside a freshly opened and synchronized session.
    ///
    /// Waits for any other session to finish first. `op` receives the open
    /// connection; its result is returned unchanged once the session has been
    /// closed.
    ///
    /// # Errors
    ///
    /// - [`Error::Connect`] if the store is unreachable or rejects the
    ///   credentials. Nothing is closed because nothing was opened.
    /// - [`Error::Sync`] if the ledger cannot be downloaded or opened.
    /// - Whatever `op` returns; a panic in `op` becomes [`Error::Operation`].
    /// - [`Error::ServiceShutdown`] once [`release`](Self::release) has run.
    pub async fn with_session<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut dyn LedgerConnection) -> BoxFuture<'c, Result<T>>
            + Send
            + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let span = tracing::info_span!("ledger_session");
        let task = tokio::spawn(async move { inner.run(op).await }.instrument(span));

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::operation(format!("Ledger session task failed: {e}"))),
        };
        if let Err(e) = &result {
            increment_session_failures(e.kind());
            tracing::warn!(phase = e.kind(), error = %e, "Ledger session failed");
        }
        result
    }

    /// Final release at shutdown.
    ///
    /// Refuses all future sessions, then waits up to `timeout` for an open
    /// session to close. Returns `false` if a session was still open when the
    /// timeout expired.
    pub async fn release(&self, timeout: Duration) -> bool {
        self.inner.released.store(true, Ordering::Release);
        match tokio::time::timeout(timeout, self.inner.cache.lock()).await {
            Ok(_cache) => {
                tracing::debug!("Ledger released; no further sessions will open");
                true
            }
            Err(_) => !self.is_session_open(),
        }
    }

    /// Whether a session currently holds the ledger.
    pub fn is_session_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// Number of sessions that ran to completion (successfully or not) after
    /// opening.
    pub fn completed_sessions(&self) -> usize {
        self.inner.completed.load(Ordering::Relaxed)
    }
}
