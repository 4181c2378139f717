use super::{
    Ack, AppState,
    accounts::parse_date,
    extract::{ApiJson, ApiQuery},
    present, require_fields, run,
};
use axum::{
    Json,
    extract::{Path, State},
};
use ledger_gateway_core::{
    Error, Result,
    types::{FieldUpdates, ImportResult, NewTransaction, Transaction},
};
use serde::{Deserialize, Serialize};

const MISSING_ACCOUNT_AND_TRANSACTIONS: &str =
    "Missing required parameters: accountId and transactions array";

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsQuery {
    account_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
}

pub async fn list(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<TransactionsQuery>,
) -> Result<Json<Vec<Transaction>>> {
    let (Some(account_id), Some(start), Some(end)) = (
        present(query.account_id),
        present(query.start_date),
        present(query.end_date),
    ) else {
        return Err(Error::validation(
            "Missing required query parameters: accountId, startDate, and endDate",
        ));
    };
    let start = parse_date("startDate", &start)?;
    let end = parse_date("endDate", &end)?;

    run(&state, account_id, move |ledger, account_id| {
        Box::pin(async move { ledger.transactions(&account_id, start, end).await })
    })
    .await
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AddTransactions {
    account_id: Option<String>,
    transactions: Option<Vec<NewTransaction>>,
    #[serde(default)]
    run_transfers: bool,
    #[serde(default)]
    learn_categories: bool,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Added {
    pub success: bool,
    pub transaction_ids: Vec<String>,
}

pub async fn add(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<AddTransactions>,
) -> Result<Json<Added>> {
    let (Some(account_id), Some(transactions)) = (present(body.account_id), body.transactions)
    else {
        return Err(Error::validation(MISSING_ACCOUNT_AND_TRANSACTIONS));
    };
    let flags = (body.run_transfers, body.learn_categories);

    run(
        &state,
        (account_id, transactions),
        move |ledger, (account_id, transactions)| {
            Box::pin(async move {
                let transaction_ids = ledger
                    .add_transactions(&account_id, transactions, flags.0, flags.1)
                    .await?;
                Ok(Added {
                    success: true,
                    transaction_ids,
                })
            })
        },
    )
    .await
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImportTransactions {
    account_id: Option<String>,
    transactions: Option<Vec<NewTransaction>>,
}

pub async fn import(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ImportTransactions>,
) -> Result<Json<ImportResult>> {
    let (Some(account_id), Some(transactions)) = (present(body.account_id), body.transactions)
    else {
        return Err(Error::validation(MISSING_ACCOUNT_AND_TRANSACTIONS));
    };

    run(
        &state,
        (account_id, transactions),
        |ledger, (account_id, transactions)| {
            Box::pin(async move { ledger.import_transactions(&account_id, transactions).await })
        },
    )
    .await
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(fields): ApiJson<FieldUpdates>,
) -> Result<Json<Ack>> {
    require_fields(
        &fields,
        "Missing required parameters: transaction id and fields to update",
    )?;
    run(&state, (id, fields), |ledger, (id, fields)| {
        Box::pin(async move { ledger.update_transaction(&id, fields).await.map(|()| Ack::OK) })
    })
    .await
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Ack>> {
    let id = present(Some(id))
        .ok_or_else(|| Error::validation("Missing required parameter: transaction id"))?;
    run(&state, id, |ledger, id| {
        Box::pin(async move { ledger.delete_transaction(&id).await.map(|()| Ack::OK) })
    })
    .await
}
