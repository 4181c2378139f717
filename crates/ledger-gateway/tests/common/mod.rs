#![allow(dead_code)]

use async_trait::async_trait;
use core::time::Duration;
use ledger_gateway::server::{
    http::{AppState, router},
    lifecycle::Lifecycle,
    session::{LedgerTarget, SessionGuard},
};
use ledger_gateway_core::{
    Error, LedgerConnection, LedgerConnector, Result,
    types::{Account, Secret},
};
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

pub const LEDGER_ID: &str = "household";

/// Counts every call the guard makes against the double.
#[derive(Debug, Default)]
pub struct Probe {
    pub connects: AtomicUsize,
    pub syncs: AtomicUsize,
    pub closes: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl Probe {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn syncs(&self) -> usize {
        self.syncs.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Failure injection for [`ScriptedLedger`].
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub fail_connect: bool,
    pub fail_sync: bool,
    pub panic_sync: bool,
    pub fail_close: bool,
    /// How long `accounts` takes.
    pub hold: Duration,
}

/// A collaborator double that follows a [`Script`] and reports to a
/// [`Probe`]. Only `accounts` is implemented among the domain operations.
pub struct ScriptedLedger {
    pub probe: Arc<Probe>,
    script: Script,
}

impl ScriptedLedger {
    pub fn new(script: Script) -> (Arc<Self>, Arc<Probe>) {
        let probe = Arc::new(Probe::default());
        let ledger = Arc::new(Self {
            probe: Arc::clone(&probe),
            script,
        });
        (ledger, probe)
    }
}

#[async_trait]
impl LedgerConnector for ScriptedLedger {
    async fn connect(&self, _data_dir: &Path) -> Result<Box<dyn LedgerConnection>> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_connect {
            return Err(Error::connect("connection refused"));
        }
        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(active, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            probe: Arc::clone(&self.probe),
            script: self.script.clone(),
        }))
    }
}

struct ScriptedConnection {
    probe: Arc<Probe>,
    script: Script,
}

#[async_trait]
impl LedgerConnection for ScriptedConnection {
    async fn sync_ledger(&mut self, _ledger_id: &str, _file_password: Option<&str>) -> Result<()> {
        self.probe.syncs.fetch_add(1, Ordering::SeqCst);
        if self.script.panic_sync {
            panic!("corrupt ledger file");
        }
        if self.script.fail_sync {
            return Err(Error::sync("could not decrypt ledger file"));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        self.probe.active.fetch_sub(1, Ordering::SeqCst);
        if self.script.fail_close {
            return Err(Error::close("socket already gone"));
        }
        Ok(())
    }

    async fn accounts(&mut self) -> Result<Vec<Account>> {
        tokio::time::sleep(self.script.hold).await;
        Ok(vec![Account {
            id: "checking".to_string(),
            name: "Checking".to_string(),
            kind: "checking".to_string(),
            offbudget: false,
            closed: false,
        }])
    }
}

pub fn target() -> LedgerTarget {
    LedgerTarget {
        ledger_id: LEDGER_ID.to_string(),
        file_password: Some(Secret::new("file-pw")),
    }
}

pub fn guard(connector: Arc<dyn LedgerConnector>, cache_dir: &Path) -> SessionGuard {
    SessionGuard::new(connector, target(), cache_dir.join("cache"))
}

/// The full router over `sessions` with a fresh lifecycle.
pub fn app(sessions: SessionGuard) -> (axum::Router, Arc<Lifecycle>) {
    let lifecycle = Arc::new(Lifecycle::new());
    let app = router(AppState {
        sessions,
        lifecycle: Arc::clone(&lifecycle),
    });
    (app, lifecycle)
}
