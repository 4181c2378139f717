//! Shared types and error definitions used across the `ledger-gateway`
//! server.
//!
//! ## Submodules
//!
//! - [`error`] - Centralized error type and its HTTP envelope.
//! - [`ledger`] - The remote ledger collaborator traits.
//! - [`types`] - Ledger records, [`Month`](types::Month) and
//!   [`Secret`](types::Secret).

pub mod error;
pub mod ledger;
pub mod types;

pub use error::{Error, ErrorBody, Result};
pub use ledger::{LedgerConnection, LedgerConnector};
