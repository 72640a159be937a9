//! Database service for journal-service: pool lifecycle and the chart of accounts.

use crate::models::{
    Account, AccountActivity, AccountNode, AccountType, CashBank, CashBankTransaction,
    CreateAccount, CreateCashBank,
    TrialBalance, TrialBalanceRow,
};
use crate::services::metrics::{ACCOUNTS_CREATED, DB_QUERY_DURATION};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const ACCOUNT_COLUMNS: &str = "account_id, code, name, account_type, parent_id, is_header, \
    is_active, balance, version, created_utc";

const CASH_BANK_COLUMNS: &str =
    "cash_bank_id, code, name, account_id, balance, allow_negative, is_active, created_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "journal-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Account Operations
    // -------------------------------------------------------------------------

    /// Create a new account. Balances always start at zero and only move
    /// through posted journals.
    #[instrument(skip(self, input), fields(code = %input.code, account_type = %input.account_type))]
    pub async fn create_account(&self, input: &CreateAccount) -> Result<Account, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let parent_id = match &input.parent_code {
            Some(code) => {
                let parent = self.get_account_by_code(code).await?.ok_or_else(|| {
                    AppError::BadRequest(anyhow::anyhow!("Parent account '{}' not found", code))
                })?;
                if !parent.is_header {
                    return Err(AppError::BadRequest(anyhow::anyhow!(
                        "Parent account '{}' is not a header account",
                        code
                    )));
                }
                Some(parent.account_id)
            }
            None => None,
        };

        let sql = format!(
            r#"
            INSERT INTO accounts (account_id, code, name, account_type, parent_id, is_header)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(Uuid::new_v4())
            .bind(&input.code)
            .bind(&input.name)
            .bind(input.account_type.as_str())
            .bind(parent_id)
            .bind(input.is_header)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Account with code '{}' already exists",
                        input.code
                    ))
                }
                _ => AppError::DatabaseError(anyhow::anyhow!("Failed to create account: {}", e)),
            })?;

        timer.observe_duration();

        ACCOUNTS_CREATED
            .with_label_values(&[input.account_type.as_str()])
            .inc();

        info!(
            account_id = %account.account_id,
            account_type = %account.account_type,
            "Account created"
        );

        Ok(account)
    }

    /// Get an account by ID.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn get_account(&self, account_id: Uuid) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account"])
            .start_timer();

        let sql = format!("SELECT {} FROM accounts WHERE account_id = $1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        Ok(account)
    }

    /// Get an account by its chart-of-accounts code.
    #[instrument(skip(self))]
    pub async fn get_account_by_code(&self, code: &str) -> Result<Option<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account_by_code"])
            .start_timer();

        let sql = format!("SELECT {} FROM accounts WHERE code = $1", ACCOUNT_COLUMNS);
        let account = sqlx::query_as::<_, Account>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get account: {}", e)))?;

        timer.observe_duration();

        Ok(account)
    }

    /// List all accounts ordered by code.
    #[instrument(skip(self))]
    pub async fn list_accounts(&self) -> Result<Vec<Account>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_accounts"])
            .start_timer();

        let sql = format!("SELECT {} FROM accounts ORDER BY code", ACCOUNT_COLUMNS);
        let accounts = sqlx::query_as::<_, Account>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list accounts: {}", e))
            })?;

        timer.observe_duration();

        Ok(accounts)
    }

    /// Chart of accounts as a tree with derived header balances.
    pub async fn account_tree(&self) -> Result<Vec<AccountNode>, AppError> {
        let accounts = self.list_accounts().await?;
        Ok(build_account_tree(&accounts))
    }

    /// Codes from `codes` that no account in the chart carries, in input order.
    #[instrument(skip(self, codes))]
    pub async fn missing_account_codes(&self, codes: &[&str]) -> Result<Vec<String>, AppError> {
        let wanted: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        let present: Vec<String> =
            sqlx::query_scalar("SELECT code FROM accounts WHERE code = ANY($1)")
                .bind(&wanted)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to check account codes: {}", e))
                })?;
        Ok(wanted
            .into_iter()
            .filter(|code| !present.contains(code))
            .collect())
    }

    // -------------------------------------------------------------------------
    // Cash/Bank Operations
    // -------------------------------------------------------------------------

    /// Register a cash/bank sub-ledger against an existing postable asset account.
    #[instrument(skip(self, input), fields(code = %input.code, account_code = %input.account_code))]
    pub async fn create_cash_bank(&self, input: &CreateCashBank) -> Result<CashBank, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_cash_bank"])
            .start_timer();

        let account = self
            .get_account_by_code(&input.account_code)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "Account '{}' not found",
                    input.account_code
                ))
            })?;
        if account.is_header || account.parsed_type() != Some(AccountType::Asset) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Account '{}' must be a postable asset account",
                input.account_code
            )));
        }

        let db_failure = |e: sqlx::Error| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create cash/bank: {}", e))
        };
        let mut tx = self.pool.begin().await.map_err(db_failure)?;

        // Posts lock the same row, so no line can land between the check and the link.
        let (balance, has_history): (Decimal, bool) = sqlx::query_as(
            r#"
            SELECT a.balance,
                   EXISTS (
                       SELECT 1 FROM journal_lines l
                       JOIN journal_entries e ON e.journal_id = l.journal_id
                       WHERE l.account_id = a.account_id AND e.status <> 'DRAFT'
                   )
            FROM accounts a
            WHERE a.account_id = $1
            FOR UPDATE OF a
            "#,
        )
        .bind(account.account_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_failure)?;

        if !balance.is_zero() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Account '{}' already carries a balance",
                input.account_code
            )));
        }
        if has_history {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Account '{}' already has posted journal lines",
                input.account_code
            )));
        }

        let sql = format!(
            r#"
            INSERT INTO cash_banks (cash_bank_id, code, name, account_id, allow_negative)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            CASH_BANK_COLUMNS
        );
        let cash_bank = sqlx::query_as::<_, CashBank>(&sql)
            .bind(Uuid::new_v4())
            .bind(&input.code)
            .bind(&input.name)
            .bind(account.account_id)
            .bind(input.allow_negative)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    AppError::Conflict(anyhow::anyhow!(
                        "Cash/bank '{}' or its account is already registered",
                        input.code
                    ))
                }
                _ => db_failure(e),
            })?;
        tx.commit().await.map_err(db_failure)?;

        timer.observe_duration();

        info!(cash_bank_id = %cash_bank.cash_bank_id, "Cash/bank created");

        Ok(cash_bank)
    }

    /// Get a cash/bank sub-ledger by ID.
    #[instrument(skip(self), fields(cash_bank_id = %cash_bank_id))]
    pub async fn get_cash_bank(&self, cash_bank_id: Uuid) -> Result<Option<CashBank>, AppError> {
        let sql = format!(
            "SELECT {} FROM cash_banks WHERE cash_bank_id = $1",
            CASH_BANK_COLUMNS
        );
        let cash_bank = sqlx::query_as::<_, CashBank>(&sql)
            .bind(cash_bank_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to get cash/bank: {}", e))
            })?;
        Ok(cash_bank)
    }

    /// List all cash/bank sub-ledgers ordered by code.
    #[instrument(skip(self))]
    pub async fn list_cash_banks(&self) -> Result<Vec<CashBank>, AppError> {
        let sql = format!("SELECT {} FROM cash_banks ORDER BY code", CASH_BANK_COLUMNS);
        let cash_banks = sqlx::query_as::<_, CashBank>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to list cash/banks: {}", e))
            })?;
        Ok(cash_banks)
    }

    /// Sub-ledger movement log of one cash/bank, oldest first.
    #[instrument(skip(self), fields(cash_bank_id = %cash_bank_id))]
    pub async fn cash_bank_transactions(
        &self,
        cash_bank_id: Uuid,
    ) -> Result<Vec<CashBankTransaction>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cash_bank_transactions"])
            .start_timer();

        let transactions = sqlx::query_as::<_, CashBankTransaction>(
            r#"
            SELECT transaction_id, cash_bank_id, journal_id, journal_line_id, amount,
                   balance_after, transaction_date, created_utc
            FROM cash_bank_transactions
            WHERE cash_bank_id = $1
            ORDER BY transaction_date, created_utc, transaction_id
            "#,
        )
        .bind(cash_bank_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!(
                "Failed to list cash/bank transactions: {}",
                e
            ))
        })?;

        timer.observe_duration();
        Ok(transactions)
    }

    // -------------------------------------------------------------------------
    // Reports
    // -------------------------------------------------------------------------

    /// Trial balance from journal lines of non-draft entries dated up to `as_of`.
    #[instrument(skip(self))]
    pub async fn trial_balance(&self, as_of: NaiveDate) -> Result<TrialBalance, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["trial_balance"])
            .start_timer();

        let activity = sqlx::query_as::<_, AccountActivity>(
            r#"
            SELECT a.account_id, a.code, a.name, a.account_type,
                   EXISTS (SELECT 1 FROM cash_banks cb WHERE cb.account_id = a.account_id) AS is_cash,
                   COALESCE(SUM(l.debit_amount), 0) AS debit_total,
                   COALESCE(SUM(l.credit_amount), 0) AS credit_total
            FROM accounts a
            JOIN journal_lines l ON l.account_id = a.account_id
            JOIN journal_entries e ON e.journal_id = l.journal_id
            WHERE e.status <> 'DRAFT' AND e.entry_date <= $1 AND NOT a.is_header
            GROUP BY a.account_id, a.code, a.name, a.account_type
            ORDER BY a.code
            "#,
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to compute trial balance: {}", e))
        })?;

        timer.observe_duration();

        Ok(build_trial_balance(as_of, &activity))
    }
}

/// Arrange accounts into a forest by `parent_id`. Header balances are the sum
/// of their descendants' balances; the stored header column is ignored.
pub fn build_account_tree(accounts: &[Account]) -> Vec<AccountNode> {
    let mut children: HashMap<Option<Uuid>, Vec<&Account>> = HashMap::new();
    let known: std::collections::HashSet<Uuid> = accounts.iter().map(|a| a.account_id).collect();
    for account in accounts {
        // Orphans whose parent is missing are treated as roots.
        let parent = account.parent_id.filter(|p| known.contains(p));
        children.entry(parent).or_default().push(account);
    }

    fn build(account: &Account, children: &HashMap<Option<Uuid>, Vec<&Account>>) -> AccountNode {
        let kids: Vec<AccountNode> = children
            .get(&Some(account.account_id))
            .map(|list| list.iter().map(|child| build(child, children)).collect())
            .unwrap_or_default();
        let balance = if account.is_header {
            kids.iter().map(|k| k.balance).sum()
        } else {
            account.balance
        };
        AccountNode {
            account_id: account.account_id,
            code: account.code.clone(),
            name: account.name.clone(),
            account_type: account
                .parsed_type()
                .or_else(|| AccountType::from_code(&account.code))
                .unwrap_or(AccountType::Asset),
            is_header: account.is_header,
            balance,
            children: kids,
        }
    }

    let mut roots: Vec<AccountNode> = children
        .get(&None)
        .map(|list| list.iter().map(|a| build(a, &children)).collect())
        .unwrap_or_default();
    roots.sort_by(|a, b| a.code.cmp(&b.code));
    roots
}

/// Net each account's activity onto its debit or credit column.
pub fn build_trial_balance(as_of: NaiveDate, activity: &[AccountActivity]) -> TrialBalance {
    let mut rows = Vec::with_capacity(activity.len());
    let mut total_debit = Decimal::ZERO;
    let mut total_credit = Decimal::ZERO;

    for item in activity {
        let net = item.debit_total - item.credit_total;
        if net.is_zero() {
            continue;
        }
        let (debit_balance, credit_balance) = if net > Decimal::ZERO {
            (net, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -net)
        };
        total_debit += debit_balance;
        total_credit += credit_balance;
        rows.push(TrialBalanceRow {
            account_id: item.account_id,
            code: item.code.clone(),
            name: item.name.clone(),
            account_type: item
                .account_type
                .parse()
                .ok()
                .or_else(|| AccountType::from_code(&item.code))
                .unwrap_or(AccountType::Asset),
            debit_balance,
            credit_balance,
        });
    }

    TrialBalance {
        as_of,
        rows,
        total_debit,
        total_credit,
    }
}
