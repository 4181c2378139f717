//! JSON-RPC 2.0 client for a remote ledger bridge.
//!
//! Every call is a `POST {server_url}/rpc`. A session starts with `init`,
//! which returns a token passed with every later call, continues with
//! `downloadBudget`, and ends with `shutdown`. Domain operations use one
//! method each, named after the ledger API (`getAccounts`,
//! `setBudgetAmount`, ...).
//!
//! Failures are mapped onto the phase that was running: transport and
//! decoding problems during `init` are [`Error::Connect`], during
//! `downloadBudget` [`Error::Sync`], and so on. A remote error object keeps
//! its message.

use async_trait::async_trait;
use chrono::NaiveDate;
use core::time::Duration;
use ledger_gateway_core::{
    Error, LedgerConnection, LedgerConnector, Result,
    types::{
        Account, BudgetMonth, BudgetUpdate, Category, CategoryGroup, FieldUpdates, ImportResult,
        Month, NewAccount, NewCategory, NewTransaction, Payee, Secret, Transaction,
    },
};
use portable_atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
enum RpcFailure {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{message}")]
    Remote { code: i64, message: String },

    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl RpcFailure {
    /// Converts into the gateway error of the phase that made the call.
    fn into_error(self, method: &str, phase: fn(String) -> Error) -> Error {
        if let Self::Remote { code, .. } = &self {
            tracing::debug!(method, code, "Ledger bridge returned an error");
        }
        phase(self.to_string())
    }
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Shared HTTP plumbing for the connector and its connections.
#[derive(Clone)]
struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
}

impl RpcClient {
    async fn call<T: DeserializeOwned>(
        &self,
        id: u64,
        method: &str,
        params: Value,
    ) -> core::result::Result<T, RpcFailure> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        let response: RpcResponse = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcFailure::Remote {
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(response.result).map_err(|e| RpcFailure::Malformed(e.to_string()))
    }
}

/// Connector for a remote ledger bridge.
pub struct RpcLedger {
    client: RpcClient,
    password: Option<Secret>,
}

impl RpcLedger {
    pub fn new(
        server_url: &str,
        password: Option<Secret>,
        timeout: Duration,
    ) -> core::result::Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client: RpcClient {
                http,
                endpoint: format!("{}/rpc", server_url.trim_end_matches('/')),
            },
            password,
        })
    }
}

#[derive(Deserialize)]
struct InitResult {
    token: String,
}

#[async_trait]
impl LedgerConnector for RpcLedger {
    async fn connect(&self, data_dir: &Path) -> Result<Box<dyn LedgerConnection>> {
        let params = json!({
            "password": self.password.as_ref().map(Secret::expose),
            "dataDir": data_dir.to_string_lossy(),
        });
        let init: InitResult = self
            .client
            .call(0, "init", params)
            .await
            .map_err(|e| e.into_error("init", Error::connect))?;

        tracing::debug!(endpoint = %self.client.endpoint, "Connected to ledger bridge");
        Ok(Box::new(RpcConnection {
            client: self.client.clone(),
            token: init.token,
            next_id: AtomicU64::new(1),
            closed: false,
        }))
    }
}

struct RpcConnection {
    client: RpcClient,
    token: String,
    next_id: AtomicU64,
    closed: bool,
}

impl RpcConnection {
    /// Calls `method` with `params` merged next to the session token.
    async fn invoke<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> core::result::Result<T, RpcFailure> {
        let mut body = json!({ "token": self.token });
        if let (Value::Object(body), Value::Object(params)) = (&mut body, params) {
            body.extend(params);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.client.call(id, method, body).await
    }

    async fn op<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        if self.closed {
            return Err(Error::operation("Ledger session is closed"));
        }
        self.invoke(method, params)
            .await
            .map_err(|e| e.into_error(method, Error::operation))
    }
}

#[async_trait]
impl LedgerConnection for RpcConnection {
    async fn sync_ledger(&mut self, ledger_id: &str, file_password: Option<&str>) -> Result<()> {
        self.invoke::<Value>(
            "downloadBudget",
            json!({ "syncId": ledger_id, "password": file_password }),
        )
        .await
        .map(drop)
        .map_err(|e| e.into_error("downloadBudget", Error::sync))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::close("session already closed"));
        }
        self.closed = true;
        self.invoke::<Value>("shutdown", json!({}))
            .await
            .map(drop)
            .map_err(|e| e.into_error("shutdown", Error::close))
    }

    async fn accounts(&mut self) -> Result<Vec<Account>> {
        self.op("getAccounts", json!({})).await
    }

    async fn create_account(
        &mut self,
        account: NewAccount,
        initial_balance: i64,
    ) -> Result<String> {
        self.op(
            "createAccount",
            json!({ "account": account, "initialBalance": initial_balance }),
        )
        .await
    }

    async fn update_account(&mut self, id: &str, fields: FieldUpdates) -> Result<()> {
        self.op::<Value>("updateAccount", json!({ "id": id, "fields": fields }))
            .await
            .map(drop)
    }

    async fn close_account(
        &mut self,
        id: &str,
        transfer_account_id: Option<&str>,
        transfer_category_id: Option<&str>,
    ) -> Result<()> {
        self.op::<Value>(
            "closeAccount",
            json!({
                "id": id,
                "transferAccountId": transfer_account_id,
                "transferCategoryId": transfer_category_id,
            }),
        )
        .await
        .map(drop)
    }

    async fn reopen_account(&mut self, id: &str) -> Result<()> {
        self.op::<Value>("reopenAccount", json!({ "id": id }))
            .await
            .map(drop)
    }

    async fn delete_account(&mut self, id: &str) -> Result<()> {
        self.op::<Value>("deleteAccount", json!({ "id": id }))
            .await
            .map(drop)
    }

    async fn account_balance(&mut self, id: &str, cutoff: Option<NaiveDate>) -> Result<i64> {
        self.op("getAccountBalance", json!({ "id": id, "cutoff": cutoff }))
            .await
    }

    async fn transactions(
        &mut self,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        self.op(
            "getTransactions",
            json!({ "accountId": account_id, "startDate": start, "endDate": end }),
        )
        .await
    }

    async fn add_transactions(
        &mut self,
        account_id: &str,
        transactions: Vec<NewTransaction>,
        run_transfers: bool,
        learn_categories: bool,
    ) -> Result<Vec<String>> {
        self.op(
            "addTransactions",
            json!({
                "accountId": account_id,
                "transactions": transactions,
                "runTransfers": run_transfers,
                "learnCategories": learn_categories,
            }),
        )
        .await
    }

    async fn import_transactions(
        &mut self,
        account_id: &str,
        transactions: Vec<NewTransaction>,
    ) -> Result<ImportResult> {
        self.op(
            "importTransactions",
            json!({ "accountId": account_id, "transactions": transactions }),
        )
        .await
    }

    async fn update_transaction(&mut self, id: &str, fields: FieldUpdates) -> Result<()> {
        self.op::<Value>("updateTransaction", json!({ "id": id, "fields": fields }))
            .await
            .map(drop)
    }

    async fn delete_transaction(&mut self, id: &str) -> Result<()> {
        self.op::<Value>("deleteTransaction", json!({ "id": id }))
            .await
            .map(drop)
    }

    async fn categories(&mut self) -> Result<Vec<Category>> {
        self.op("getCategories", json!({})).await
    }

    async fn category_groups(&mut self) -> Result<Vec<CategoryGroup>> {
        self.op("getCategoryGroups", json!({})).await
    }

    async fn create_category(&mut self, category: NewCategory) -> Result<String> {
        self.op("createCategory", json!({ "category": category }))
            .await
    }

    async fn update_category(&mut self, id: &str, fields: FieldUpdates) -> Result<()> {
        self.op::<Value>("updateCategory", json!({ "id": id, "fields": fields }))
            .await
            .map(drop)
    }

    async fn payees(&mut self) -> Result<Vec<Payee>> {
        self.op("getPayees", json!({})).await
    }

    async fn budget_months(&mut self) -> Result<Vec<Month>> {
        self.op("getBudgetMonths", json!({})).await
    }

    async fn budget_month(&mut self, month: Month) -> Result<BudgetMonth> {
        self.op("getBudgetMonth", json!({ "month": month })).await
    }

    async fn set_budget_amount(
        &mut self,
        month: Month,
        category_id: &str,
        amount: i64,
    ) -> Result<()> {
        self.op::<Value>(
            "setBudgetAmount",
            json!({ "month": month, "categoryId": category_id, "amount": amount }),
        )
        .await
        .map(drop)
    }

    async fn set_budget_carryover(
        &mut self,
        month: Month,
        category_id: &str,
        flag: bool,
    ) -> Result<()> {
        self.op::<Value>(
            "setBudgetCarryover",
            json!({ "month": month, "categoryId": category_id, "flag": flag }),
        )
        .await
        .map(drop)
    }

    /// Sent as one call so the bridge can apply the batch atomically.
    async fn batch_budget_updates(&mut self, updates: Vec<BudgetUpdate>) -> Result<()> {
        self.op::<Value>("batchBudgetUpdates", json!({ "updates": updates }))
            .await
            .map(drop)
    }

    async fn run_bank_sync(&mut self, account_id: &str) -> Result<()> {
        self.op::<Value>("runBankSync", json!({ "accountId": account_id }))
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use tempfile::TempDir;

    /// A bridge that knows one token, one ledger and one account.
    async fn bridge(Json(request): Json<Value>) -> Json<Value> {
        let id = request["id"].clone();
        let params = &request["params"];
        let ok = |result: Value| Json(json!({ "jsonrpc": "2.0", "id": id, "result": result }));
        let fail = |message: &str| {
            Json(json!({
                "jsonrpc": "2.0",
                "id": request["id"],
                "error": { "code": -32000, "message": message },
            }))
        };

        let method = request["method"].as_str().unwrap_or_default();
        if method != "init" && params["token"] != "tok-1" {
            return fail("invalid session token");
        }
        match method {
            "init" if params["password"] == "pw" => ok(json!({ "token": "tok-1" })),
            "init" => fail("invalid password"),
            "downloadBudget" if params["syncId"] == "ledger-1" => ok(Value::Null),
            "downloadBudget" => fail("budget not found"),
            "getAccounts" => ok(json!([
                { "id": "a1", "name": "Checking", "type": "checking", "offbudget": false, "closed": false }
            ])),
            "getAccountBalance" => fail(&format!(
                "Account not found: {}",
                params["id"].as_str().unwrap_or_default()
            )),
            "shutdown" => ok(Value::Null),
            other => fail(&format!("unknown method {other}")),
        }
    }

    async fn spawn_bridge() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().route("/rpc", post(bridge)))
                .await
                .unwrap();
        });
        format!("http://{addr}")
    }

    fn connector(url: &str, password: &str) -> RpcLedger {
        RpcLedger::new(url, Some(Secret::new(password)), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn full_session_round_trip() {
        let url = spawn_bridge().await;
        let dir = TempDir::new().unwrap();

        let mut conn = connector(&url, "pw").connect(dir.path()).await.unwrap();
        conn.sync_ledger("ledger-1", None).await.unwrap();
        let accounts = conn.accounts().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].kind, "checking");
        conn.close().await.unwrap();
        assert!(matches!(conn.close().await, Err(Error::Close { .. })));
    }

    #[tokio::test]
    async fn failures_map_to_their_phase() {
        let url = spawn_bridge().await;
        let dir = TempDir::new().unwrap();

        let err = connector(&url, "nope").connect(dir.path()).await.err().unwrap();
        assert_eq!(err, Error::connect("invalid password"));

        let mut conn = connector(&url, "pw").connect(dir.path()).await.unwrap();
        let err = conn.sync_ledger("other", None).await.unwrap_err();
        assert_eq!(err, Error::sync("budget not found"));

        let err = conn.account_balance("zz", None).await.unwrap_err();
        assert_eq!(err, Error::operation("Account not found: zz"));
    }

    #[tokio::test]
    async fn unreachable_bridge_is_a_connect_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let dir = TempDir::new().unwrap();
        let err = connector(&url, "pw").connect(dir.path()).await.err().unwrap();
        assert!(matches!(err, Error::Connect { .. }));
    }
}
