//! Common test utilities for journal-service integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use journal_service::config::{
    AccountMapping, DatabaseConfig, LedgerConfig, PostingPolicy,
};
use journal_service::models::{
    Account, AccountType, CreateAccount, CreateCashBank, JournalLineInput, PostingRequest,
    SourceType,
};
use journal_service::services::{CashFlowRules, Database};
use journal_service::startup::AppState;
use rust_decimal::Decimal;
use service_core::config::Config as CommonConfig;
use std::sync::Once;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,journal_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn test_config(database_url: String) -> LedgerConfig {
    LedgerConfig {
        common: CommonConfig {
            host: [127, 0, 0, 1].into(),
            port: 0,
        },
        service_name: "journal-service-test".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: database_url,
            max_connections: 8,
            min_connections: 1,
        },
        policy: PostingPolicy::default(),
        accounts: AccountMapping::default(),
        cash_flow: CashFlowRules::default(),
    }
}

/// Ids of the seeded chart of accounts.
pub struct Chart {
    pub assets_header: Uuid,
    pub cash: Uuid,
    pub bank: Uuid,
    pub receivable: Uuid,
    pub inventory: Uuid,
    pub payable: Uuid,
    pub tax_payable: Uuid,
    pub equity: Uuid,
    pub retained_earnings: Uuid,
    pub revenue: Uuid,
    pub cogs: Uuid,
    pub cash_bank_cash: Uuid,
    pub cash_bank_bank: Uuid,
}

pub struct TestLedger {
    pub state: AppState,
    pub chart: Chart,
}

impl TestLedger {
    pub fn pool(&self) -> &sqlx::PgPool {
        self.state.db.pool()
    }

    pub async fn account(&self, account_id: Uuid) -> Account {
        self.state
            .db
            .get_account(account_id)
            .await
            .expect("Failed to load account")
            .expect("Account missing")
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.account(account_id).await.balance
    }

    pub async fn cash_bank_balance(&self, cash_bank_id: Uuid) -> Decimal {
        self.state
            .db
            .get_cash_bank(cash_bank_id)
            .await
            .expect("Failed to load cash bank")
            .expect("Cash bank missing")
            .balance
    }

    pub async fn count(&self, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(self.pool())
            .await
            .expect("Failed to count rows")
    }

    /// Insert a sale with `(quantity, unit cost)` items.
    pub async fn insert_sale(
        &self,
        sale_id: i64,
        status: &str,
        sale_date: NaiveDate,
        items: &[(Decimal, Decimal)],
    ) {
        sqlx::query(
            "INSERT INTO sales (sale_id, invoice_number, status, sale_date) VALUES ($1, $2, $3, $4)",
        )
        .bind(sale_id)
        .bind(format!("INV-{:05}", sale_id))
        .bind(status)
        .bind(sale_date)
        .execute(self.pool())
        .await
        .expect("Failed to insert sale");

        for (i, (quantity, cost)) in items.iter().enumerate() {
            sqlx::query(
                "INSERT INTO sale_items (sale_id, product_id, quantity, cost_price_snapshot) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(sale_id)
            .bind(i as i64 + 1)
            .bind(quantity)
            .bind(cost)
            .execute(self.pool())
            .await
            .expect("Failed to insert sale item");
        }
    }
}

/// Connect, migrate, wipe and seed a fresh chart of accounts.
///
/// Tests using this share one database and must run under `#[serial]`.
pub async fn setup() -> TestLedger {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run journal-service integration tests");
    let config = test_config(database_url);

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    sqlx::query(
        "TRUNCATE closed_periods, cash_bank_transactions, posting_intents, journal_lines, \
         journal_entries, journal_sequences, cash_banks, accounts, sale_items, sales CASCADE",
    )
    .execute(db.pool())
    .await
    .expect("Failed to reset ledger tables");

    let chart = seed_chart(&db).await;
    TestLedger {
        state: AppState::new(config, db),
        chart,
    }
}

async fn account(
    db: &Database,
    code: &str,
    name: &str,
    account_type: AccountType,
    parent_code: Option<&str>,
    is_header: bool,
) -> Uuid {
    db.create_account(&CreateAccount {
        code: code.to_string(),
        name: name.to_string(),
        account_type,
        parent_code: parent_code.map(str::to_string),
        is_header,
    })
    .await
    .unwrap_or_else(|e| panic!("Failed to create account {}: {}", code, e))
    .account_id
}

async fn cash_bank(db: &Database, code: &str, account_code: &str) -> Uuid {
    db.create_cash_bank(&CreateCashBank {
        code: code.to_string(),
        name: code.to_string(),
        account_code: account_code.to_string(),
        allow_negative: false,
    })
    .await
    .unwrap_or_else(|e| panic!("Failed to create cash bank {}: {}", code, e))
    .cash_bank_id
}

async fn seed_chart(db: &Database) -> Chart {
    use AccountType::*;

    let assets_header = account(db, "1000", "Current Assets", Asset, None, true).await;
    let cash = account(db, "1101", "Cash", Asset, Some("1000"), false).await;
    let bank = account(db, "1102", "Bank", Asset, Some("1000"), false).await;
    let receivable = account(db, "1201", "Accounts Receivable", Asset, Some("1000"), false).await;
    let inventory = account(db, "1301", "Inventory", Asset, Some("1000"), false).await;
    let payable = account(db, "2101", "Accounts Payable", Liability, None, false).await;
    let tax_payable = account(db, "2103", "Tax Payable", Liability, None, false).await;
    let equity = account(db, "3101", "Owner Capital", Equity, None, false).await;
    let retained_earnings = account(db, "3201", "Retained Earnings", Equity, None, false).await;
    let revenue = account(db, "4101", "Sales Revenue", Revenue, None, false).await;
    let cogs = account(db, "5101", "Cost of Goods Sold", Expense, None, false).await;

    let cash_bank_cash = cash_bank(db, "CASH-01", "1101").await;
    let cash_bank_bank = cash_bank(db, "BANK-01", "1102").await;

    Chart {
        assets_header,
        cash,
        bank,
        receivable,
        inventory,
        payable,
        tax_payable,
        equity,
        retained_earnings,
        revenue,
        cogs,
        cash_bank_cash,
        cash_bank_bank,
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

pub fn request(
    source_type: SourceType,
    source_id: i64,
    purpose: &str,
    entry_date: NaiveDate,
    lines: Vec<JournalLineInput>,
) -> PostingRequest {
    PostingRequest {
        source_type,
        source_id,
        purpose: purpose.to_string(),
        entry_date,
        description: None,
        lines,
    }
}

/// `DEBIT debit / CREDIT credit` for `amount`.
pub fn simple(
    source_type: SourceType,
    source_id: i64,
    purpose: &str,
    entry_date: NaiveDate,
    debit: Uuid,
    credit: Uuid,
    amount: Decimal,
) -> PostingRequest {
    request(
        source_type,
        source_id,
        purpose,
        entry_date,
        vec![
            JournalLineInput::debit(debit, amount),
            JournalLineInput::credit(credit, amount),
        ],
    )
}
