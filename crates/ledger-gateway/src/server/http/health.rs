use super::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub in_flight: usize,
}

/// Liveness probe. Not gated, so it keeps answering (with `503`) while the
/// server drains.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Health>) {
    let lifecycle = &state.lifecycle;
    let status = if lifecycle.admit() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Health {
            status: lifecycle.state().as_str(),
            in_flight: lifecycle.tracker().len(),
        }),
    )
}
