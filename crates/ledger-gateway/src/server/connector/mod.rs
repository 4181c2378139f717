//! Ledger backends.
//!
//! - [`rpc`] - Forwards each session to a remote ledger bridge over JSON-RPC.
//! - [`memory`] - Keeps ledgers in-process. Used for local runs and tests.

pub mod memory;
pub mod rpc;

pub use memory::{MemoryLedger, SessionStats};
pub use rpc::RpcLedger;

use crate::server::config::{Backend, LedgerSettings};
use anyhow::Context;
use ledger_gateway_core::LedgerConnector;
use std::sync::Arc;

/// Builds the connector selected by `settings.backend`.
pub fn from_settings(settings: &LedgerSettings) -> anyhow::Result<Arc<dyn LedgerConnector>> {
    match settings.backend {
        Backend::Rpc => {
            let url = settings
                .server_url
                .as_deref()
                .context("LEDGER_SERVER_URL is required for the rpc backend")?;
            let ledger = RpcLedger::new(url, settings.password.clone(), settings.request_timeout)
                .context("failed to build ledger RPC client")?;
            Ok(Arc::new(ledger))
        }
        Backend::Memory => {
            let ledger = MemoryLedger::new(settings.password.clone());
            ledger.seed(
                &settings.ledger_id,
                settings.file_password.clone(),
                memory::sample_book(),
            );
            Ok(Arc::new(ledger))
        }
    }
}
