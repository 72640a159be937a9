//! Accounting period closing model.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::JournalEntryWithLines;

/// Purpose under which closing journals are keyed.
pub const CLOSING_PURPOSE: &str = "CLOSING";

/// A period whose dates no longer accept entries.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClosedPeriod {
    pub period_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: Option<String>,
    pub closing_journal_id: Option<Uuid>,
    pub total_revenue: Decimal,
    pub total_expense: Decimal,
    pub net_income: Decimal,
    pub closed_utc: DateTime<Utc>,
}

impl ClosedPeriod {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePeriodRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub description: Option<String>,
}

/// A freshly closed period and the journal that zeroed its income accounts.
/// `journal` is absent when the period carried no revenue or expense activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodClosing {
    pub period: ClosedPeriod,
    pub journal: Option<JournalEntryWithLines>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodStatus {
    pub date: NaiveDate,
    pub closed: bool,
    pub period: Option<ClosedPeriod>,
}

/// Source id of a period's closing journal: its end date as `YYYYMMDD`.
pub fn closing_source_id(end_date: NaiveDate) -> i64 {
    i64::from(end_date.year()) * 10_000 + i64::from(end_date.month()) * 100
        + i64::from(end_date.day())
}
