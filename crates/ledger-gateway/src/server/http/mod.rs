//! HTTP surface of the gateway.
//!
//! Every `/api` route is a thin pass-through: validate the request, run one
//! ledger operation inside a session, return the result as JSON. Validation
//! happens before a session is requested, so malformed requests never touch
//! the ledger.
//!
//! The [admission gate](crate::server::lifecycle::gate) wraps all routes
//! except `/health`, which must keep answering while the server drains.

pub mod accounts;
pub mod budget;
pub mod categories;
pub mod extract;
pub mod health;
pub mod transactions;

use crate::server::{
    lifecycle::{Lifecycle, gate::admission},
    session::SessionGuard,
};
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    routing::{get, post, put},
};
use futures::future::BoxFuture;
use ledger_gateway_core::{Error, ErrorBody, LedgerConnection, Result, types::FieldUpdates};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionGuard,
    pub lifecycle: Arc<Lifecycle>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/budget-summary", get(budget::summary))
        .route(
            "/api/transactions",
            get(transactions::list).post(transactions::add),
        )
        .route("/api/import-transactions", post(transactions::import))
        .route(
            "/api/transactions/{id}",
            put(transactions::update).delete(transactions::remove),
        )
        .route("/api/accounts", get(accounts::list).post(accounts::create))
        .route(
            "/api/accounts/{id}",
            put(accounts::update).delete(accounts::remove),
        )
        .route("/api/accounts/{id}/close", post(accounts::close))
        .route("/api/accounts/{id}/reopen", post(accounts::reopen))
        .route("/api/accounts/{id}/balance", get(accounts::balance))
        .route("/api/bank-sync/{id}", post(accounts::bank_sync))
        .route(
            "/api/categories",
            get(categories::list).post(categories::create),
        )
        .route("/api/categories/{id}", put(categories::update))
        .route("/api/category-groups", get(categories::groups))
        .route("/api/payees", get(categories::payees))
        .route("/api/budget-months", get(budget::months))
        .route("/api/budget-month/{month}", get(budget::month))
        .route("/api/set-budget-amount", post(budget::set_amount))
        .route("/api/set-budget-carryover", post(budget::set_carryover))
        .route("/api/batch-updates", post(budget::batch_updates))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.lifecycle),
            admission,
        ))
        .route("/health", get(health::health))
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

async fn not_found() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: true,
            message: "Not found".to_string(),
        }),
    )
}

/// Runs `op` with `input` inside a ledger session and wraps the result as
/// JSON.
pub(crate) async fn run<T, I, F>(state: &AppState, input: I, op: F) -> Result<Json<T>>
where
    T: Send + 'static,
    I: Send + 'static,
    F: for<'c> FnOnce(&'c mut dyn LedgerConnection, I) -> BoxFuture<'c, Result<T>>
        + Send
        + 'static,
{
    state
        .sessions
        .with_session(move |ledger| op(ledger, input))
        .await
        .map(Json)
}

/// Returns `value` trimmed, treating blank strings as missing.
pub(crate) fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Rejects an empty field map with `message`.
pub(crate) fn require_fields(fields: &FieldUpdates, message: &str) -> Result<()> {
    if fields.is_empty() {
        return Err(Error::validation(message));
    }
    Ok(())
}

/// `{"success": true}`
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub success: bool,
}

impl Ack {
    pub const OK: Self = Self { success: true };
}

/// `{"success": true, "id": ...}`
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub success: bool,
    pub id: String,
}

impl From<String> for Created {
    fn from(id: String) -> Self {
        Self { success: true, id }
    }
}
