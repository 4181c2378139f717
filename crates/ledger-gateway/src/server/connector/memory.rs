//! In-process ledger store.
//!
//! [`MemoryLedger`] behaves like a small ledger server living inside the
//! process: it checks the server password on connect and the ledger id and
//! file password on sync, writes a JSON snapshot of the synchronized ledger
//! into the session's cache directory, and keeps every domain operation in
//! memory. It also counts sessions so callers can observe how connections
//! were opened and closed.

use async_trait::async_trait;
use chrono::NaiveDate;
use ledger_gateway_core::{
    Error, LedgerConnection, LedgerConnector, Result,
    types::{
        Account, BudgetMonth, Category, CategoryBudget, CategoryGroup, FieldUpdates,
        ImportResult, Month, NewAccount, NewCategory, NewTransaction, Payee, Secret, Transaction,
    },
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
};
use uuid::Uuid;

/// Everything stored in one ledger file.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Book {
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    /// Groups are stored without their categories; those live in
    /// `categories` and are joined on read.
    pub groups: Vec<CategoryGroup>,
    pub categories: Vec<Category>,
    pub payees: Vec<Payee>,
    pub budgets: Vec<BudgetEntry>,
}

/// Budgeted amount and carryover flag of one category in one month.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BudgetEntry {
    pub month: Month,
    pub category_id: String,
    pub amount: i64,
    pub carryover: bool,
}

/// Session counters, as seen by the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub opened: usize,
    pub closed: usize,
    pub active: usize,
    pub peak_active: usize,
}

struct StoredLedger {
    file_password: Option<Secret>,
    book: Book,
}

struct Shared {
    server_password: Option<Secret>,
    ledgers: Mutex<HashMap<String, StoredLedger>>,
    stats: Mutex<SessionStats>,
}

/// Connector for the in-process store. Clones share the same store.
#[derive(Clone)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
    password: Option<Secret>,
}

impl MemoryLedger {
    /// A store protected by `password`; the returned connector presents the
    /// same password.
    pub fn new(password: Option<Secret>) -> Self {
        Self {
            shared: Arc::new(Shared {
                server_password: password.clone(),
                ledgers: Mutex::new(HashMap::new()),
                stats: Mutex::new(SessionStats::default()),
            }),
            password,
        }
    }

    /// A connector to the same store presenting different credentials.
    pub fn with_password(&self, password: Option<Secret>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            password,
        }
    }

    /// Stores `book` as ledger `ledger_id`, replacing any previous contents.
    pub fn seed(&self, ledger_id: &str, file_password: Option<Secret>, book: Book) {
        self.shared.ledgers.lock().insert(
            ledger_id.to_string(),
            StoredLedger {
                file_password,
                book,
            },
        );
    }

    /// A copy of the current contents of `ledger_id`.
    pub fn book(&self, ledger_id: &str) -> Option<Book> {
        self.shared
            .ledgers
            .lock()
            .get(ledger_id)
            .map(|stored| stored.book.clone())
    }

    pub fn stats(&self) -> SessionStats {
        *self.shared.stats.lock()
    }
}

#[async_trait]
impl LedgerConnector for MemoryLedger {
    async fn connect(&self, data_dir: &Path) -> Result<Box<dyn LedgerConnection>> {
        if let Some(expected) = &self.shared.server_password {
            if self.password.as_ref() != Some(expected) {
                return Err(Error::connect("invalid server password"));
            }
        }

        {
            let mut stats = self.shared.stats.lock();
            stats.opened += 1;
            stats.active += 1;
            stats.peak_active = stats.peak_active.max(stats.active);
        }

        Ok(Box::new(MemoryConnection {
            shared: Arc::clone(&self.shared),
            data_dir: data_dir.to_path_buf(),
            ledger_id: None,
            closed: false,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    data_dir: PathBuf,
    ledger_id: Option<String>,
    closed: bool,
}

impl MemoryConnection {
    fn with_book<R>(&self, f: impl FnOnce(&mut Book) -> Result<R>) -> Result<R> {
        if self.closed {
            return Err(Error::operation("Ledger session is closed"));
        }
        let ledger_id = self
            .ledger_id
            .as_deref()
            .ok_or_else(|| Error::operation("No ledger is open"))?;
        let mut ledgers = self.shared.ledgers.lock();
        let stored = ledgers
            .get_mut(ledger_id)
            .ok_or_else(|| Error::operation("Ledger no longer exists"))?;
        f(&mut stored.book)
    }
}

#[async_trait]
impl LedgerConnection for MemoryConnection {
    async fn sync_ledger(&mut self, ledger_id: &str, file_password: Option<&str>) -> Result<()> {
        let snapshot = {
            let ledgers = self.shared.ledgers.lock();
            let stored = ledgers
                .get(ledger_id)
                .ok_or_else(|| Error::sync("ledger not found on server"))?;
            if stored.file_password.as_ref().map(Secret::expose) != file_password {
                return Err(Error::sync("could not decrypt ledger file"));
            }
            serde_json::to_vec_pretty(&stored.book)
                .map_err(|e| Error::sync(format!("could not encode ledger snapshot: {e}")))?
        };

        let dir = self.data_dir.join(ledger_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::sync(format!("could not create ledger cache: {e}")))?;
        tokio::fs::write(dir.join("snapshot.json"), snapshot)
            .await
            .map_err(|e| Error::sync(format!("could not write ledger cache: {e}")))?;

        self.ledger_id = Some(ledger_id.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::close("session already closed"));
        }
        self.closed = true;
        let mut stats = self.shared.stats.lock();
        stats.closed += 1;
        stats.active -= 1;
        Ok(())
    }

    async fn accounts(&mut self) -> Result<Vec<Account>> {
        self.with_book(|book| Ok(book.accounts.clone()))
    }

    async fn create_account(
        &mut self,
        account: NewAccount,
        initial_balance: i64,
    ) -> Result<String> {
        self.with_book(|book| {
            let id = new_id();
            book.accounts.push(Account {
                id: id.clone(),
                name: account.name,
                kind: account.kind,
                offbudget: account.offbudget,
                closed: false,
            });
            if initial_balance != 0 {
                book.transactions.push(Transaction {
                    id: new_id(),
                    account: id.clone(),
                    date: chrono::Local::now().date_naive(),
                    amount: initial_balance,
                    payee: None,
                    payee_name: Some("Starting Balance".to_string()),
                    category: None,
                    notes: None,
                    imported_id: None,
                    cleared: true,
                });
            }
            Ok(id)
        })
    }

    async fn update_account(&mut self, id: &str, fields: FieldUpdates) -> Result<()> {
        self.with_book(|book| patch(find_account(book, id)?, fields))
    }

    async fn close_account(
        &mut self,
        id: &str,
        transfer_account_id: Option<&str>,
        transfer_category_id: Option<&str>,
    ) -> Result<()> {
        self.with_book(|book| {
            find_account(book, id)?;
            let balance = balance_of(book, id, None);
            if balance != 0 {
                let target = transfer_account_id.ok_or_else(|| {
                    Error::operation(
                        "Account has a non-zero balance; a transfer account is required to close it",
                    )
                })?;
                find_account(book, target)?;
                let today = chrono::Local::now().date_naive();
                for (account, amount, category) in [
                    (id, -balance, None),
                    (target, balance, transfer_category_id),
                ] {
                    book.transactions.push(Transaction {
                        id: new_id(),
                        account: account.to_string(),
                        date: today,
                        amount,
                        payee: None,
                        payee_name: Some("Transfer".to_string()),
                        category: category.map(str::to_string),
                        notes: Some("Account closed".to_string()),
                        imported_id: None,
                        cleared: true,
                    });
                }
            }
            find_account(book, id)?.closed = true;
            Ok(())
        })
    }

    async fn reopen_account(&mut self, id: &str) -> Result<()> {
        self.with_book(|book| {
            find_account(book, id)?.closed = false;
            Ok(())
        })
    }

    async fn delete_account(&mut self, id: &str) -> Result<()> {
        self.with_book(|book| {
            find_account(book, id)?;
            book.accounts.retain(|account| account.id != id);
            book.transactions.retain(|tx| tx.account != id);
            Ok(())
        })
    }

    async fn account_balance(&mut self, id: &str, cutoff: Option<NaiveDate>) -> Result<i64> {
        self.with_book(|book| {
            find_account(book, id)?;
            Ok(balance_of(book, id, cutoff))
        })
    }

    async fn transactions(
        &mut self,
        account_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Transaction>> {
        self.with_book(|book| {
            find_account(book, account_id)?;
            let mut found: Vec<_> = book
                .transactions
                .iter()
                .filter(|tx| tx.account == account_id && tx.date >= start && tx.date <= end)
                .cloned()
                .collect();
            found.sort_by(|a, b| b.date.cmp(&a.date));
            Ok(found)
        })
    }

    async fn add_transactions(
        &mut self,
        account_id: &str,
        transactions: Vec<NewTransaction>,
        _run_transfers: bool,
        learn_categories: bool,
    ) -> Result<Vec<String>> {
        self.with_book(|book| {
            find_account(book, account_id)?;
            Ok(transactions
                .into_iter()
                .map(|tx| insert_transaction(book, account_id, tx, learn_categories))
                .collect())
        })
    }

    async fn import_transactions(
        &mut self,
        account_id: &str,
        transactions: Vec<NewTransaction>,
    ) -> Result<ImportResult> {
        self.with_book(|book| {
            find_account(book, account_id)?;
            let mut result = ImportResult::default();
            for tx in transactions {
                let existing = tx.imported_id.as_deref().and_then(|imported| {
                    book.transactions.iter_mut().find(|existing| {
                        existing.account == account_id
                            && existing.imported_id.as_deref() == Some(imported)
                    })
                });
                match existing {
                    Some(existing) => {
                        existing.date = tx.date;
                        existing.amount = tx.amount;
                        existing.cleared = tx.cleared;
                        if tx.notes.is_some() {
                            existing.notes = tx.notes;
                        }
                        if tx.category.is_some() {
                            existing.category = tx.category;
                        }
                        result.updated.push(existing.id.clone());
                    }
                    None => {
                        let id = insert_transaction(book, account_id, tx, true);
                        result.added.push(id);
                    }
                }
            }
            Ok(result)
        })
    }

    async fn update_transaction(&mut self, id: &str, fields: FieldUpdates) -> Result<()> {
        self.with_book(|book| {
            let tx = book
                .transactions
                .iter_mut()
                .find(|tx| tx.id == id)
                .ok_or_else(|| Error::operation(format!("Transaction not found: {id}")))?;
            patch(tx, fields)
        })
    }

    async fn delete_transaction(&mut self, id: &str) -> Result<()> {
        self.with_book(|book| {
            let before = book.transactions.len();
            book.transactions.retain(|tx| tx.id != id);
            if book.transactions.len() == before {
                return Err(Error::operation(format!("Transaction not found: {id}")));
            }
            Ok(())
        })
    }

    async fn categories(&mut self) -> Result<Vec<Category>> {
        self.with_book(|book| Ok(book.categories.clone()))
    }

    async fn category_groups(&mut self) -> Result<Vec<CategoryGroup>> {
        self.with_book(|book| {
            Ok(book
                .groups
                .iter()
                .map(|group| CategoryGroup {
                    categories: book
                        .categories
                        .iter()
                        .filter(|category| category.group_id == group.id)
                        .cloned()
                        .collect(),
                    ..group.clone()
                })
                .collect())
        })
    }

    async fn create_category(&mut self, category: NewCategory) -> Result<String> {
        self.with_book(|book| {
            if !book.groups.iter().any(|group| group.id == category.group_id) {
                return Err(Error::operation(format!(
                    "Category group not found: {}",
                    category.group_id
                )));
            }
            let id = new_id();
            book.categories.push(Category {
                id: id.clone(),
                name: category.name,
                group_id: category.group_id,
                is_income: category.is_income,
                hidden: category.hidden,
            });
            Ok(id)
        })
    }

    async fn update_category(&mut self, id: &str, fields: FieldUpdates) -> Result<()> {
        self.with_book(|book| patch(find_category(book, id)?, fields))
    }

    async fn payees(&mut self) -> Result<Vec<Payee>> {
        self.with_book(|book| Ok(book.payees.clone()))
    }

    async fn budget_months(&mut self) -> Result<Vec<Month>> {
        self.with_book(|book| {
            let mut months: BTreeSet<Month> = book
                .transactions
                .iter()
                .map(|tx| Month::of(tx.date))
                .chain(book.budgets.iter().map(|entry| entry.month))
                .collect();
            months.insert(Month::current());
            Ok(months.into_iter().collect())
        })
    }

    async fn budget_month(&mut self, month: Month) -> Result<BudgetMonth> {
        self.with_book(|book| Ok(summarize(book, month)))
    }

    async fn set_budget_amount(
        &mut self,
        month: Month,
        category_id: &str,
        amount: i64,
    ) -> Result<()> {
        self.with_book(|book| {
            budget_entry(book, month, category_id)?.amount = amount;
            Ok(())
        })
    }

    async fn set_budget_carryover(
        &mut self,
        month: Month,
        category_id: &str,
        flag: bool,
    ) -> Result<()> {
        self.with_book(|book| {
            budget_entry(book, month, category_id)?.carryover = flag;
            Ok(())
        })
    }

    async fn run_bank_sync(&mut self, account_id: &str) -> Result<()> {
        self.with_book(|book| {
            let account = find_account(book, account_id)?;
            if account.closed {
                return Err(Error::operation(format!(
                    "Account is closed: {account_id}"
                )));
            }
            tracing::debug!("No linked bank for in-memory account; nothing to sync");
            Ok(())
        })
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn find_account<'b>(book: &'b mut Book, id: &str) -> Result<&'b mut Account> {
    book.accounts
        .iter_mut()
        .find(|account| account.id == id)
        .ok_or_else(|| Error::operation(format!("Account not found: {id}")))
}

fn find_category<'b>(book: &'b mut Book, id: &str) -> Result<&'b mut Category> {
    book.categories
        .iter_mut()
        .find(|category| category.id == id)
        .ok_or_else(|| Error::operation(format!("Category not found: {id}")))
}

fn balance_of(book: &Book, account_id: &str, cutoff: Option<NaiveDate>) -> i64 {
    book.transactions
        .iter()
        .filter(|tx| tx.account == account_id)
        .filter(|tx| cutoff.is_none_or(|cutoff| tx.date <= cutoff))
        .map(|tx| tx.amount)
        .sum()
}

/// Merges `fields` into `record` through its serialized form.
fn patch<T: Serialize + DeserializeOwned>(record: &mut T, fields: FieldUpdates) -> Result<()> {
    if fields.contains_key("id") {
        return Err(Error::operation("The id field cannot be updated"));
    }
    let mut value = serde_json::to_value(&*record).map_err(|e| Error::operation(e.to_string()))?;
    if let serde_json::Value::Object(map) = &mut value {
        map.extend(fields);
    }
    *record = serde_json::from_value(value)
        .map_err(|e| Error::operation(format!("Invalid field update: {e}")))?;
    Ok(())
}

fn insert_transaction(
    book: &mut Book,
    account_id: &str,
    tx: NewTransaction,
    learn_categories: bool,
) -> String {
    let payee = match (&tx.payee, &tx.payee_name) {
        (Some(id), _) => Some(id.clone()),
        (None, Some(name)) => Some(payee_named(book, name)),
        (None, None) => None,
    };
    let category = tx.category.or_else(|| {
        let payee = payee.as_deref()?;
        if !learn_categories {
            return None;
        }
        book.transactions
            .iter()
            .rev()
            .find(|existing| existing.payee.as_deref() == Some(payee))
            .and_then(|existing| existing.category.clone())
    });

    let id = new_id();
    book.transactions.push(Transaction {
        id: id.clone(),
        account: account_id.to_string(),
        date: tx.date,
        amount: tx.amount,
        payee,
        payee_name: tx.payee_name,
        category,
        notes: tx.notes,
        imported_id: tx.imported_id,
        cleared: tx.cleared,
    });
    id
}

fn payee_named(book: &mut Book, name: &str) -> String {
    if let Some(payee) = book.payees.iter().find(|payee| payee.name == name) {
        return payee.id.clone();
    }
    let id = new_id();
    book.payees.push(Payee {
        id: id.clone(),
        name: name.to_string(),
        transfer_acct: None,
    });
    id
}

fn budget_entry<'b>(
    book: &'b mut Book,
    month: Month,
    category_id: &str,
) -> Result<&'b mut BudgetEntry> {
    find_category(book, category_id)?;
    let index = match book
        .budgets
        .iter()
        .position(|entry| entry.month == month && entry.category_id == category_id)
    {
        Some(index) => index,
        None => {
            book.budgets.push(BudgetEntry {
                month,
                category_id: category_id.to_string(),
                amount: 0,
                carryover: false,
            });
            book.budgets.len() - 1
        }
    };
    Ok(&mut book.budgets[index])
}

fn next_month(month: Month) -> Option<Month> {
    if month.month() == 12 {
        Month::new(month.year() + 1, 1)
    } else {
        Month::new(month.year(), month.month() + 1)
    }
}

/// Envelope figures for `month`.
///
/// A category's balance is its budgeted amount plus its spending plus what
/// rolled over from the previous month. Positive balances always roll over;
/// negative ones only when the previous month had carryover enabled.
fn summarize(book: &Book, month: Month) -> BudgetMonth {
    let spent_in = |category_id: &str, month: Month| -> i64 {
        book.transactions
            .iter()
            .filter(|tx| tx.category.as_deref() == Some(category_id) && month.contains(tx.date))
            .map(|tx| tx.amount)
            .sum()
    };
    let entry_for = |category_id: &str, month: Month| {
        book.budgets
            .iter()
            .find(|entry| entry.month == month && entry.category_id == category_id)
    };
    let first_month = book
        .transactions
        .iter()
        .map(|tx| Month::of(tx.date))
        .chain(book.budgets.iter().map(|entry| entry.month))
        .min()
        .unwrap_or(month)
        .min(month);

    let mut categories = Vec::new();
    let mut total_income = 0;
    for category in &book.categories {
        if category.is_income {
            total_income += spent_in(&category.id, month);
            continue;
        }

        let mut rolled = 0;
        let mut current = first_month;
        while current < month {
            let carryover = entry_for(&category.id, current).is_some_and(|entry| entry.carryover);
            let budgeted = entry_for(&category.id, current).map_or(0, |entry| entry.amount);
            let balance = rolled + budgeted + spent_in(&category.id, current);
            rolled = if balance > 0 || carryover { balance } else { 0 };
            match next_month(current) {
                Some(next) => current = next,
                None => break,
            }
        }

        let entry = entry_for(&category.id, month);
        let budgeted = entry.map_or(0, |entry| entry.amount);
        let spent = spent_in(&category.id, month);
        categories.push(CategoryBudget {
            id: category.id.clone(),
            name: category.name.clone(),
            group_id: category.group_id.clone(),
            budgeted,
            spent,
            balance: rolled + budgeted + spent,
            carryover: entry.is_some_and(|entry| entry.carryover),
        });
    }

    let total_budgeted = categories.iter().map(|c| c.budgeted).sum::<i64>();
    BudgetMonth {
        month,
        total_income,
        total_budgeted,
        total_spent: categories.iter().map(|c| c.spent).sum(),
        total_balance: categories.iter().map(|c| c.balance).sum(),
        to_budget: total_income - total_budgeted,
        categories,
    }
}

/// A small household ledger for local runs.
pub fn sample_book() -> Book {
    let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default();
    let account = |id: &str, name: &str, kind: &str, offbudget| Account {
        id: id.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        offbudget,
        closed: false,
    };
    let group = |id: &str, name: &str, is_income| CategoryGroup {
        id: id.to_string(),
        name: name.to_string(),
        is_income,
        hidden: false,
        categories: Vec::new(),
    };
    let category = |id: &str, name: &str, group_id: &str, is_income| Category {
        id: id.to_string(),
        name: name.to_string(),
        group_id: group_id.to_string(),
        is_income,
        hidden: false,
    };
    let payee = |id: &str, name: &str| Payee {
        id: id.to_string(),
        name: name.to_string(),
        transfer_acct: None,
    };
    let tx = |id: &str, account: &str, date, amount, payee: &str, category: &str| Transaction {
        id: id.to_string(),
        account: account.to_string(),
        date,
        amount,
        payee: Some(payee.to_string()),
        payee_name: None,
        category: Some(category.to_string()),
        notes: None,
        imported_id: None,
        cleared: true,
    };

    Book {
        accounts: vec![
            account("checking", "Checking", "checking", false),
            account("savings", "Savings", "savings", false),
            account("brokerage", "Brokerage", "investment", true),
        ],
        groups: vec![
            group("income", "Income", true),
            group("bills", "Bills", false),
            group("everyday", "Everyday", false),
        ],
        categories: vec![
            category("salary", "Salary", "income", true),
            category("rent", "Rent", "bills", false),
            category("utilities", "Utilities", "bills", false),
            category("groceries", "Groceries", "everyday", false),
            category("dining", "Dining Out", "everyday", false),
        ],
        payees: vec![
            payee("employer", "Employer Inc."),
            payee("landlord", "Landlord"),
            payee("market", "Corner Market"),
            payee("power", "City Power"),
        ],
        transactions: vec![
            tx("t1", "checking", date(2024, 1, 1), 450_000, "employer", "salary"),
            tx("t2", "checking", date(2024, 1, 2), -150_000, "landlord", "rent"),
            tx("t3", "checking", date(2024, 1, 9), -8_734, "market", "groceries"),
            tx("t4", "checking", date(2024, 1, 15), -6_210, "power", "utilities"),
            tx("t5", "checking", date(2024, 1, 23), -5_120, "market", "groceries"),
        ],
        budgets: Month::new(2024, 1)
            .map(|month| {
                [("rent", 150_000), ("utilities", 8_000), ("groceries", 40_000), ("dining", 10_000)]
                    .into_iter()
                    .map(|(category_id, amount)| BudgetEntry {
                        month,
                        category_id: category_id.to_string(),
                        amount,
                        carryover: false,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LEDGER: &str = "household";

    fn ledger() -> MemoryLedger {
        let ledger = MemoryLedger::new(Some(Secret::new("server-pw")));
        ledger.seed(LEDGER, Some(Secret::new("file-pw")), sample_book());
        ledger
    }

    async fn open(ledger: &MemoryLedger, dir: &TempDir) -> Box<dyn LedgerConnection> {
        let mut conn = ledger.connect(dir.path()).await.unwrap();
        conn.sync_ledger(LEDGER, Some("file-pw")).await.unwrap();
        conn
    }

    fn month(y: i32, m: u32) -> Month {
        Month::new(y, m).unwrap()
    }

    #[tokio::test]
    async fn wrong_server_password_fails_to_connect() {
        let dir = TempDir::new().unwrap();
        let intruder = ledger().with_password(Some(Secret::new("guess")));
        let err = intruder.connect(dir.path()).await.err().unwrap();
        assert!(matches!(err, Error::Connect { .. }));
        assert_eq!(intruder.stats(), SessionStats::default());
    }

    #[tokio::test]
    async fn sync_checks_ledger_and_file_password() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger();
        let mut conn = ledger.connect(dir.path()).await.unwrap();

        let err = conn.sync_ledger("missing", Some("file-pw")).await.unwrap_err();
        assert!(matches!(err, Error::Sync { .. }));
        let err = conn.sync_ledger(LEDGER, None).await.unwrap_err();
        assert!(matches!(err, Error::Sync { .. }));
        assert!(conn.accounts().await.is_err(), "nothing open before a sync");

        conn.sync_ledger(LEDGER, Some("file-pw")).await.unwrap();
        assert!(dir.path().join(LEDGER).join("snapshot.json").is_file());
        assert_eq!(conn.accounts().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn stats_follow_open_and_close() {
        let dir = TempDir::new().unwrap();
        let ledger = ledger();
        let mut first = open(&ledger, &dir).await;
        let mut second = open(&ledger, &dir).await;
        assert_eq!(ledger.stats().active, 2);

        first.close().await.unwrap();
        assert!(matches!(first.close().await, Err(Error::Close { .. })));
        second.close().await.unwrap();

        assert_eq!(
            ledger.stats(),
            SessionStats {
                opened: 2,
                closed: 2,
                active: 0,
                peak_active: 2,
            }
        );
    }

    #[tokio::test]
    async fn balance_honours_cutoff() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&ledger(), &dir).await;
        assert_eq!(conn.account_balance("checking", None).await.unwrap(), 279_936);
        let cutoff = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(
            conn.account_balance("checking", Some(cutoff)).await.unwrap(),
            300_000
        );
        assert!(conn.account_balance("nope", None).await.is_err());
    }

    #[tokio::test]
    async fn import_reconciles_by_imported_id() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&ledger(), &dir).await;
        let new = |amount| NewTransaction {
            date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
            amount,
            payee: None,
            payee_name: Some("Corner Market".to_string()),
            category: None,
            notes: None,
            imported_id: Some("bank-1".to_string()),
            cleared: false,
        };

        let first = conn.import_transactions("savings", vec![new(-1_000)]).await.unwrap();
        assert_eq!(first.added.len(), 1);
        let second = conn.import_transactions("savings", vec![new(-1_250)]).await.unwrap();
        assert!(second.added.is_empty());
        assert_eq!(second.updated, first.added);
        assert_eq!(conn.account_balance("savings", None).await.unwrap(), -1_250);
    }

    #[tokio::test]
    async fn field_updates_cannot_touch_ids() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&ledger(), &dir).await;
        let mut fields = FieldUpdates::new();
        fields.insert("name".into(), "Everyday Checking".into());
        conn.update_account("checking", fields).await.unwrap();
        assert_eq!(conn.accounts().await.unwrap()[0].name, "Everyday Checking");

        let mut fields = FieldUpdates::new();
        fields.insert("id".into(), "other".into());
        assert!(conn.update_account("checking", fields).await.is_err());
    }

    #[tokio::test]
    async fn closing_funded_account_needs_transfer_target() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&ledger(), &dir).await;
        assert!(conn.close_account("checking", None, None).await.is_err());

        conn.close_account("checking", Some("savings"), None).await.unwrap();
        assert_eq!(conn.account_balance("checking", None).await.unwrap(), 0);
        assert_eq!(conn.account_balance("savings", None).await.unwrap(), 279_936);
        let accounts = conn.accounts().await.unwrap();
        assert!(accounts.iter().any(|a| a.id == "checking" && a.closed));

        conn.reopen_account("checking").await.unwrap();
        let accounts = conn.accounts().await.unwrap();
        assert!(accounts.iter().all(|a| !a.closed));
    }

    #[tokio::test]
    async fn budget_month_rolls_positive_balances_forward() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&ledger(), &dir).await;

        let january = conn.budget_month(month(2024, 1)).await.unwrap();
        assert_eq!(january.total_income, 450_000);
        assert_eq!(january.total_budgeted, 208_000);
        assert_eq!(january.to_budget, 242_000);
        let groceries = january.categories.iter().find(|c| c.id == "groceries").unwrap();
        assert_eq!(groceries.spent, -13_854);
        assert_eq!(groceries.balance, 26_146);

        conn.set_budget_amount(month(2024, 2), "groceries", 30_000).await.unwrap();
        let february = conn.budget_month(month(2024, 2)).await.unwrap();
        let groceries = february.categories.iter().find(|c| c.id == "groceries").unwrap();
        assert_eq!(groceries.budgeted, 30_000);
        assert_eq!(groceries.balance, 56_146);
    }

    #[tokio::test]
    async fn overspending_only_rolls_over_with_carryover() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&ledger(), &dir).await;
        let groceries = |budget: &BudgetMonth| {
            budget.categories.iter().find(|c| c.id == "groceries").unwrap().balance
        };

        conn.set_budget_amount(month(2024, 1), "groceries", 10_000).await.unwrap();
        let february = conn.budget_month(month(2024, 2)).await.unwrap();
        assert_eq!(groceries(&february), 0);

        conn.set_budget_carryover(month(2024, 1), "groceries", true).await.unwrap();
        let february = conn.budget_month(month(2024, 2)).await.unwrap();
        assert_eq!(groceries(&february), -3_854);
    }

    #[tokio::test]
    async fn category_groups_join_their_categories() {
        let dir = TempDir::new().unwrap();
        let mut conn = open(&ledger(), &dir).await;
        let id = conn
            .create_category(NewCategory {
                name: "Coffee".to_string(),
                group_id: "everyday".to_string(),
                is_income: false,
                hidden: false,
            })
            .await
            .unwrap();

        let groups = conn.category_groups().await.unwrap();
        let everyday = groups.iter().find(|g| g.id == "everyday").unwrap();
        assert!(everyday.categories.iter().any(|c| c.id == id));
        assert_eq!(everyday.categories.len(), 3);
    }
}
