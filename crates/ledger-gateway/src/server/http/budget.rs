use super::{Ack, AppState, extract::ApiJson, present, run};
use axum::{
    Json,
    extract::{Path, State},
};
use ledger_gateway_core::{
    Error, Result,
    types::{BudgetMonth, BudgetUpdate, Month},
};
use serde::Deserialize;

/// Budget of the current month in the server's local time zone.
pub async fn summary(State(state): State<AppState>) -> Result<Json<BudgetMonth>> {
    let month = Month::current();
    run(&state, month, |ledger, month| {
        Box::pin(async move { ledger.budget_month(month).await })
    })
    .await
}

pub async fn months(State(state): State<AppState>) -> Result<Json<Vec<Month>>> {
    run(&state, (), |ledger, ()| {
        Box::pin(async move { ledger.budget_months().await })
    })
    .await
}

pub async fn month(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> Result<Json<BudgetMonth>> {
    let month: Month = month.parse()?;
    run(&state, month, |ledger, month| {
        Box::pin(async move { ledger.budget_month(month).await })
    })
    .await
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SetAmount {
    month: Option<String>,
    category_id: Option<String>,
    amount: Option<i64>,
}

pub async fn set_amount(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SetAmount>,
) -> Result<Json<Ack>> {
    let (Some(month), Some(category_id), Some(amount)) =
        (present(body.month), present(body.category_id), body.amount)
    else {
        return Err(Error::validation(
            "Missing required parameters: month, categoryId and amount",
        ));
    };
    let month: Month = month.parse()?;

    run(&state, category_id, move |ledger, category_id| {
        Box::pin(async move {
            ledger
                .set_budget_amount(month, &category_id, amount)
                .await
                .map(|()| Ack::OK)
        })
    })
    .await
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SetCarryover {
    month: Option<String>,
    category_id: Option<String>,
    flag: Option<bool>,
}

pub async fn set_carryover(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SetCarryover>,
) -> Result<Json<Ack>> {
    let (Some(month), Some(category_id), Some(flag)) =
        (present(body.month), present(body.category_id), body.flag)
    else {
        return Err(Error::validation(
            "Missing required parameters: month, categoryId and flag",
        ));
    };
    let month: Month = month.parse()?;

    run(&state, category_id, move |ledger, category_id| {
        Box::pin(async move {
            ledger
                .set_budget_carryover(month, &category_id, flag)
                .await
                .map(|()| Ack::OK)
        })
    })
    .await
}

#[derive(Deserialize, Debug)]
pub struct BatchUpdates {
    updates: Option<Vec<BudgetUpdate>>,
}

/// Applies every change in one session.
pub async fn batch_updates(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<BatchUpdates>,
) -> Result<Json<Ack>> {
    let updates = body
        .updates
        .filter(|updates| !updates.is_empty())
        .ok_or_else(|| Error::validation("Missing required parameter: updates array"))?;

    run(&state, updates, |ledger, updates| {
        Box::pin(async move { ledger.batch_budget_updates(updates).await.map(|()| Ack::OK) })
    })
    .await
}
