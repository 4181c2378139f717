use super::{
    Ack, AppState, Created,
    extract::{ApiJson, ApiQuery},
    present, require_fields, run,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use chrono::NaiveDate;
use ledger_gateway_core::{
    Error, Result,
    types::{Account, FieldUpdates, NewAccount},
};
use serde::{Deserialize, Serialize};

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Account>>> {
    run(&state, (), |ledger, ()| {
        Box::pin(async move { ledger.accounts().await })
    })
    .await
}

#[derive(Deserialize, Debug)]
pub struct AccountInput {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    offbudget: bool,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccount {
    account: Option<AccountInput>,
    #[serde(default)]
    initial_balance: i64,
}

pub async fn create(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<CreateAccount>,
) -> Result<Json<Created>> {
    let (name, kind, offbudget) = body
        .account
        .and_then(|account| {
            Some((
                present(account.name)?,
                present(account.kind)?,
                account.offbudget,
            ))
        })
        .ok_or_else(|| Error::validation("Missing required parameters: account name and type"))?;
    let account = NewAccount {
        name,
        kind,
        offbudget,
    };

    run(&state, (account, body.initial_balance), |ledger, (account, balance)| {
        Box::pin(async move { ledger.create_account(account, balance).await.map(Created::from) })
    })
    .await
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(fields): ApiJson<FieldUpdates>,
) -> Result<Json<Ack>> {
    require_fields(&fields, "Missing required parameters: account id and fields to update")?;
    run(&state, (id, fields), |ledger, (id, fields)| {
        Box::pin(async move { ledger.update_account(&id, fields).await.map(|()| Ack::OK) })
    })
    .await
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloseAccount {
    transfer_account_id: Option<String>,
    transfer_category_id: Option<String>,
}

/// The body is optional; when present it must be a JSON object.
pub async fn close(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Ack>> {
    let transfer: CloseAccount = if body.iter().all(u8::is_ascii_whitespace) {
        CloseAccount::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| Error::validation(format!("Invalid request body: {e}")))?
    };

    run(&state, (id, transfer), |ledger, (id, transfer)| {
        Box::pin(async move {
            ledger
                .close_account(
                    &id,
                    transfer.transfer_account_id.as_deref(),
                    transfer.transfer_category_id.as_deref(),
                )
                .await
                .map(|()| Ack::OK)
        })
    })
    .await
}

pub async fn reopen(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Ack>> {
    run(&state, id, |ledger, id| {
        Box::pin(async move { ledger.reopen_account(&id).await.map(|()| Ack::OK) })
    })
    .await
}

pub async fn remove(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Ack>> {
    run(&state, id, |ledger, id| {
        Box::pin(async move { ledger.delete_account(&id).await.map(|()| Ack::OK) })
    })
    .await
}

#[derive(Deserialize, Debug)]
pub struct BalanceQuery {
    cutoff: Option<String>,
}

#[derive(Serialize, Debug, PartialEq, Eq)]
pub struct Balance {
    pub raw_balance: i64,
    pub formatted_balance: String,
}

impl From<i64> for Balance {
    fn from(cents: i64) -> Self {
        Self {
            raw_balance: cents,
            formatted_balance: format_cents(cents),
        }
    }
}

pub async fn balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiQuery(query): ApiQuery<BalanceQuery>,
) -> Result<Json<Balance>> {
    let cutoff = present(query.cutoff)
        .map(|raw| parse_date("cutoff", &raw))
        .transpose()?;

    let balance = run(&state, id, move |ledger, id| {
        Box::pin(async move { ledger.account_balance(&id, cutoff).await.map(Balance::from) })
    })
    .await?;
    tracing::debug!(raw = balance.raw_balance, "Account balance computed");
    Ok(balance)
}

pub async fn bank_sync(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Ack>> {
    let id = present(Some(id))
        .ok_or_else(|| Error::validation("Missing required parameter: account id"))?;
    run(&state, id, |ledger, id| {
        Box::pin(async move { ledger.run_bank_sync(&id).await.map(|()| Ack::OK) })
    })
    .await
}

/// Parses a `YYYY-MM-DD` request parameter.
pub(crate) fn parse_date(name: &str, raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| Error::validation(format!("Invalid {name}, expected YYYY-MM-DD")))
}

/// Renders cents with two decimals and thousands separators: `-1,234.56`.
pub fn format_cents(cents: i64) -> String {
    let abs = cents.unsigned_abs();
    let digits = (abs / 100).to_string();
    let mut whole = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            whole.push(',');
        }
        whole.push(digit);
    }
    let sign = if cents < 0 { "-" } else { "" };
    format!("{sign}{whole}.{:02}", abs % 100)
}
