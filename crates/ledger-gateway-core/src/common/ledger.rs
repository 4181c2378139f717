//! The remote ledger collaborator.
//!
//! A [`LedgerConnector`] opens connections to the ledger store. Each
//! [`LedgerConnection`] is owned by exactly one session: it is synchronized
//! against one ledger file, used for one unit of work, then closed.
//!
//! Only [`sync_ledger`](LedgerConnection::sync_ledger) and
//! [`close`](LedgerConnection::close) are required. Domain operations default
//! to an "unsupported" [`Error::Operation`], which lets narrow backends and
//! test doubles implement just what they need.

use crate::{
    Error, Result,
    types::{
        Account, BudgetMonth, BudgetUpdate, Category, CategoryGroup, FieldUpdates, ImportResult,
        Month, NewAccount, NewCategory, NewTransaction, Payee, Transaction,
    },
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;

/// Opens connections to the remote ledger store.
#[async_trait]
pub trait LedgerConnector: Send + Sync + 'static {
    /// Connects with the configured endpoint and credentials.
    ///
    /// `data_dir` is the local cache directory the connection may use for
    /// synchronized ledger files. Fails with [`Error::Connect`].
    async fn connect(&self, data_dir: &Path) -> Result<Box<dyn LedgerConnection>>;
}

/// One open connection to the ledger store.
#[async_trait]
pub trait LedgerConnection: Send {
    /// Downloads and opens the ledger file. Fails with [`Error::Sync`].
    async fn sync_ledger(&mut self, ledger_id: &str, file_password: Option<&str>) -> Result<()>;

    /// Releases the connection. Fails with [`Error::Close`].
    async fn close(&mut self) -> Result<()>;

    async fn accounts(&mut self) -> Result<Vec<Account>> {
        Err(Error::unsupported("accounts"))
    }

    async fn create_account(
        &mut self,
        _account: NewAccount,
        _initial_balance: i64,
    ) -> Result<String> {
        Err(Error::unsupported("create_account"))
    }

    async fn update_account(&mut self, _id: &str, _fields: FieldUpdates) -> Result<()> {
        Err(Error::unsupported("update_account"))
    }

    async fn close_account(
        &mut self,
        _id: &str,
        _transfer_account_id: Option<&str>,
        _transfer_category_id: Option<&str>,
    ) -> Result<()> {
        Err(Error::unsupported("close_account"))
    }

    async fn reopen_account(&mut self, _id: &str) -> Result<()> {
        Err(Error::unsupported("reopen_account"))
    }

    async fn delete_account(&mut self, _id: &str) -> Result<()> {
        Err(Error::unsupported("delete_account"))
    }

    /// Balance in cents, optionally only counting transactions up to `cutoff`.
    async fn account_balance(&mut self, _id: &str, _cutoff: Option<NaiveDate>) -> Result<i64> {
        Err(Error::unsupported("account_balance"))
    }

    async fn transactions(
        &mut self,
        _account_id: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        Err(Error::unsupported("transactions"))
    }

    /// Adds transactions verbatim and returns their ids.
    async fn add_transactions(
        &mut self,
        _account_id: &str,
        _transactions: Vec<NewTransaction>,
        _run_transfers: bool,
        _learn_categories: bool,
    ) -> Result<Vec<String>> {
        Err(Error::unsupported("add_transactions"))
    }

    /// Adds transactions, reconciling against existing ones by `imported_id`.
    async fn import_transactions(
        &mut self,
        _account_id: &str,
        _transactions: Vec<NewTransaction>,
    ) -> Result<ImportResult> {
        Err(Error::unsupported("import_transactions"))
    }

    async fn update_transaction(&mut self, _id: &str, _fields: FieldUpdates) -> Result<()> {
        Err(Error::unsupported("update_transaction"))
    }

    async fn delete_transaction(&mut self, _id: &str) -> Result<()> {
        Err(Error::unsupported("delete_transaction"))
    }

    async fn categories(&mut self) -> Result<Vec<Category>> {
        Err(Error::unsupported("categories"))
    }

    async fn category_groups(&mut self) -> Result<Vec<CategoryGroup>> {
        Err(Error::unsupported("category_groups"))
    }

    async fn create_category(&mut self, _category: NewCategory) -> Result<String> {
        Err(Error::unsupported("create_category"))
    }

    async fn update_category(&mut self, _id: &str, _fields: FieldUpdates) -> Result<()> {
        Err(Error::unsupported("update_category"))
    }

    async fn payees(&mut self) -> Result<Vec<Payee>> {
        Err(Error::unsupported("payees"))
    }

    async fn budget_months(&mut self) -> Result<Vec<Month>> {
        Err(Error::unsupported("budget_months"))
    }

    async fn budget_month(&mut self, _month: Month) -> Result<BudgetMonth> {
        Err(Error::unsupported("budget_month"))
    }

    async fn set_budget_amount(
        &mut self,
        _month: Month,
        _category_id: &str,
        _amount: i64,
    ) -> Result<()> {
        Err(Error::unsupported("set_budget_amount"))
    }

    async fn set_budget_carryover(
        &mut self,
        _month: Month,
        _category_id: &str,
        _flag: bool,
    ) -> Result<()> {
        Err(Error::unsupported("set_budget_carryover"))
    }

    /// Applies a batch of budget changes in order, stopping at the first
    /// failure.
    async fn batch_budget_updates(&mut self, updates: Vec<BudgetUpdate>) -> Result<()> {
        for update in updates {
            match update {
                BudgetUpdate::Amount {
                    month,
                    category_id,
                    amount,
                } => self.set_budget_amount(month, &category_id, amount).await?,
                BudgetUpdate::Carryover {
                    month,
                    category_id,
                    flag,
                } => self.set_budget_carryover(month, &category_id, flag).await?,
            }
        }
        Ok(())
    }

    async fn run_bank_sync(&mut self, _account_id: &str) -> Result<()> {
        Err(Error::unsupported("run_bank_sync"))
    }
}
