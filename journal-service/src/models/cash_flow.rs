//! Cash flow statement model.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Where an account's period activity lands on the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CashFlowCategory {
    NetIncome,
    NonCashAdjustment,
    WorkingCapital,
    Investing,
    Financing,
}

/// Posted debit/credit activity of one account over a period.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AccountActivity {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: String,
    pub is_cash: bool,
    pub debit_total: Decimal,
    pub credit_total: Decimal,
}

impl AccountActivity {
    /// Cash effect under the indirect method: every non-cash movement is matched
    /// by an opposite cash movement, so the effect is `credit - debit`.
    pub fn cash_effect(&self) -> Decimal {
        self.credit_total - self.debit_total
    }
}

/// One account line inside a statement section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowItem {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub category: CashFlowCategory,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatingActivities {
    pub net_income: Decimal,
    pub non_cash_adjustments: Decimal,
    pub working_capital_changes: Decimal,
    pub total: Decimal,
    pub items: Vec<CashFlowItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivitySection {
    pub total: Decimal,
    pub items: Vec<CashFlowItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashFlowStatement {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub operating: OperatingActivities,
    pub investing: ActivitySection,
    pub financing: ActivitySection,
    pub net_cash_flow: Decimal,
    pub cash_at_beginning: Decimal,
    pub cash_at_end: Decimal,
    /// `cash_at_end - (cash_at_beginning + net_cash_flow)`; reported, never plugged.
    pub reconciliation_difference: Decimal,
}

impl CashFlowStatement {
    pub fn is_reconciled(&self, tolerance: Decimal) -> bool {
        self.reconciliation_difference.abs() <= tolerance
    }
}
