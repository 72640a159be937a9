//! Chart of accounts model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Account types following standard accounting categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Equity => "equity",
            Self::Revenue => "revenue",
            Self::Expense => "expense",
        }
    }

    /// Asset and expense accounts grow on the debit side.
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, Self::Asset | Self::Expense)
    }

    /// Revenue and expense accounts close into net income.
    pub fn is_income_statement(&self) -> bool {
        matches!(self, Self::Revenue | Self::Expense)
    }

    /// Infer the type from the leading digit of an account code
    /// (1 asset, 2 liability, 3 equity, 4 revenue, 5 and above expense).
    pub fn from_code(code: &str) -> Option<Self> {
        match code.chars().next()? {
            '1' => Some(Self::Asset),
            '2' => Some(Self::Liability),
            '3' => Some(Self::Equity),
            '4' => Some(Self::Revenue),
            '5'..='9' => Some(Self::Expense),
            _ => None,
        }
    }
}

impl FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asset" => Ok(Self::Asset),
            "liability" => Ok(Self::Liability),
            "equity" => Ok(Self::Equity),
            "revenue" => Ok(Self::Revenue),
            "expense" => Ok(Self::Expense),
            other => Err(format!("unknown account type '{}'", other)),
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger account. `balance` is a cached projection of journal lines.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: String,
    pub parent_id: Option<Uuid>,
    pub is_header: bool,
    pub is_active: bool,
    pub balance: Decimal,
    pub version: i64,
    pub created_utc: DateTime<Utc>,
}

impl Account {
    /// Get parsed account type.
    pub fn parsed_type(&self) -> Option<AccountType> {
        self.account_type.parse().ok()
    }

    /// Whether journal lines may target this account.
    pub fn is_postable(&self) -> bool {
        self.is_active && !self.is_header
    }
}

/// Input for creating a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub parent_code: Option<String>,
    #[serde(default)]
    pub is_header: bool,
}

/// Account with its derived balance. Header balances are the rollup of their
/// descendants, never the stored column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountNode {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub is_header: bool,
    pub balance: Decimal,
    pub children: Vec<AccountNode>,
}

/// Trial balance row for one postable account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialBalanceRow {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub debit_balance: Decimal,
    pub credit_balance: Decimal,
}

/// Trial balance as of a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of: chrono::NaiveDate,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
}

impl TrialBalance {
    pub fn is_balanced(&self) -> bool {
        self.total_debit == self.total_credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_type_from_code_prefix() {
        assert_eq!(AccountType::from_code("1101"), Some(AccountType::Asset));
        assert_eq!(AccountType::from_code("2103"), Some(AccountType::Liability));
        assert_eq!(AccountType::from_code("3101"), Some(AccountType::Equity));
        assert_eq!(AccountType::from_code("4101"), Some(AccountType::Revenue));
        assert_eq!(AccountType::from_code("5101"), Some(AccountType::Expense));
        assert_eq!(AccountType::from_code("6201"), Some(AccountType::Expense));
        assert_eq!(AccountType::from_code("X1"), None);
        assert_eq!(AccountType::from_code(""), None);
    }

    #[test]
    fn account_type_parses_case_insensitively() {
        assert_eq!("ASSET".parse::<AccountType>(), Ok(AccountType::Asset));
        assert_eq!("revenue".parse::<AccountType>(), Ok(AccountType::Revenue));
        assert!("income".parse::<AccountType>().is_err());
    }

    #[test]
    fn normal_side() {
        assert!(AccountType::Asset.is_debit_normal());
        assert!(AccountType::Expense.is_debit_normal());
        assert!(!AccountType::Liability.is_debit_normal());
        assert!(!AccountType::Equity.is_debit_normal());
        assert!(!AccountType::Revenue.is_debit_normal());
    }
}
