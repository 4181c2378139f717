//! Error types for the ledger gateway.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the gateway can report. It implements [`IntoResponse`] so handlers can
//! return it directly; each variant maps onto an HTTP status and the uniform
//! `{"error": true, "message": ...}` envelope.
//!
//! ## Error Cases
//! - `Connect`: The ledger store was unreachable or rejected the credentials.
//! - `Sync`: The ledger file could not be downloaded or decrypted.
//! - `Operation`: A domain call against an open ledger failed.
//! - `Close`: Releasing a session failed. Logged, never surfaced.
//! - `DrainTimeout`: In-flight requests outlived the drain budget.
//! - `Validation`: The request was missing or malformed parameters.
//! - `ServiceShutdown`: A request arrived while the server was draining.

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use core::time::Duration;
use serde::{Deserialize, Serialize};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the ledger gateway.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// The ledger store could not be reached or refused the credentials.
    #[error("Failed to connect to ledger store: {reason}")]
    Connect { reason: String },

    /// The ledger file is missing, corrupt, or the file password is wrong.
    #[error("Failed to sync ledger: {reason}")]
    Sync { reason: String },

    /// A domain operation failed. The message is passed through unchanged.
    #[error("{message}")]
    Operation { message: String },

    /// Closing the session failed.
    #[error("Failed to close ledger session: {reason}")]
    Close { reason: String },

    /// In-flight requests did not finish within the drain budget.
    #[error("Drain timed out after {timeout:?} with {remaining} requests in flight")]
    DrainTimeout { timeout: Duration, remaining: usize },

    /// The client request was missing or had malformed parameters.
    #[error("{reason}")]
    Validation { reason: String },

    /// The server is draining and no longer admits work.
    #[error("Server is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub fn connect(reason: impl Into<String>) -> Self {
        Self::Connect {
            reason: reason.into(),
        }
    }

    pub fn sync(reason: impl Into<String>) -> Self {
        Self::Sync {
            reason: reason.into(),
        }
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    pub fn close(reason: impl Into<String>) -> Self {
        Self::Close {
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Error returned by backends for operations they do not implement.
    pub fn unsupported(operation: &str) -> Self {
        Self::operation(format!(
            "Operation `{operation}` is not supported by this ledger backend"
        ))
    }

    /// Short label of the failing phase, used for logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Sync { .. } => "sync",
            Self::Operation { .. } => "operation",
            Self::Close { .. } => "close",
            Self::DrainTimeout { .. } => "drain_timeout",
            Self::Validation { .. } => "validation",
            Self::ServiceShutdown => "shutdown",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Connect { .. }
            | Self::Sync { .. }
            | Self::Operation { .. }
            | Self::Close { .. }
            | Self::DrainTimeout { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body returned for every failed request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: bool,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        Self {
            error: true,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let mut response = (self.status_code(), Json(ErrorBody::from(&self))).into_response();
        if matches!(self, Self::ServiceShutdown) {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }
        response
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}
