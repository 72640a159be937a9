//! Cash/bank sub-ledger model.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Account;

/// A cash or bank instrument bound 1:1 to one COA account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CashBank {
    pub cash_bank_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_id: Uuid,
    pub balance: Decimal,
    pub allow_negative: bool,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

/// Input for registering a cash/bank sub-ledger against an existing account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCashBank {
    pub code: String,
    pub name: String,
    pub account_code: String,
    #[serde(default)]
    pub allow_negative: bool,
}

/// One movement in a sub-ledger's transaction log.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CashBankTransaction {
    pub transaction_id: Uuid,
    pub cash_bank_id: Uuid,
    pub journal_id: Uuid,
    pub journal_line_id: Uuid,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub transaction_date: NaiveDate,
    pub created_utc: DateTime<Utc>,
}

/// A postable account together with the sub-ledger that mirrors it, if any.
///
/// The two balances are one logical value with two projections: the propagator
/// only ever moves them together, by the same signed delta.
#[derive(Debug, Clone)]
pub struct LinkedBalance {
    pub account: Account,
    pub cash_bank: Option<CashBank>,
}

impl LinkedBalance {
    pub fn new(account: Account, cash_bank: Option<CashBank>) -> Self {
        Self { account, cash_bank }
    }

    pub fn account_id(&self) -> Uuid {
        self.account.account_id
    }
}
