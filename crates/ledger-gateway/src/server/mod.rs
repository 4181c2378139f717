//! Server-side components of `ledger-gateway`.
//!
//! ## Submodules
//!
//! - [`config`] - CLI/environment configuration.
//! - [`connector`] - Ledger backends (`rpc` bridge and in-process `memory`).
//! - [`http`] - Router, extractors and the pass-through endpoints.
//! - [`lifecycle`] - Server state, in-flight tracking, admission and
//!   shutdown coordination.
//! - [`session`] - The Session Guard serializing access to the ledger.
//! - [`telemetry`] - Logging, tracing and metrics initialization.
//!
//! These components are wired together in the binary's `main.rs`.

pub mod config;
pub mod connector;
pub mod http;
pub mod lifecycle;
pub mod session;
pub mod telemetry;
