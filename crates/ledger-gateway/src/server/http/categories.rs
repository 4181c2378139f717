use super::{Ack, AppState, Created, extract::ApiJson, present, require_fields, run};
use axum::{
    Json,
    extract::{Path, State},
};
use ledger_gateway_core::{
    Error, Result,
    types::{Category, CategoryGroup, FieldUpdates, NewCategory, Payee},
};
use serde::Deserialize;

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Category>>> {
    run(&state, (), |ledger, ()| {
        Box::pin(async move { ledger.categories().await })
    })
    .await
}

pub async fn groups(State(state): State<AppState>) -> Result<Json<Vec<CategoryGroup>>> {
    run(&state, (), |ledger, ()| {
        Box::pin(async move { ledger.category_groups().await })
    })
    .await
}

pub async fn payees(State(state): State<AppState>) -> Result<Json<Vec<Payee>>> {
    run(&state, (), |ledger, ()| {
        Box::pin(async move { ledger.payees().await })
    })
    .await
}

#[derive(Deserialize, Debug)]
pub struct CreateCategory {
    name: Option<String>,
    group_id: Option<String>,
    #[serde(default)]
    is_income: bool,
    #[serde(default)]
    hidden: bool,
}

pub async fn create(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateCategory>,
) -> Result<Json<Created>> {
    let (Some(name), Some(group_id)) = (present(body.name), present(body.group_id)) else {
        return Err(Error::validation(
            "Missing required parameters: name and group_id",
        ));
    };
    let category = NewCategory {
        name,
        group_id,
        is_income: body.is_income,
        hidden: body.hidden,
    };

    run(&state, category, |ledger, category| {
        Box::pin(async move { ledger.create_category(category).await.map(Created::from) })
    })
    .await
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(fields): ApiJson<FieldUpdates>,
) -> Result<Json<Ack>> {
    require_fields(
        &fields,
        "Missing required parameters: category id and fields to update",
    )?;
    run(&state, (id, fields), |ledger, (id, fields)| {
        Box::pin(async move { ledger.update_category(&id, fields).await.map(|()| Ack::OK) })
    })
    .await
}
