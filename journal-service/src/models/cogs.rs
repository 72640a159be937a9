//! Sale and cost-of-goods-sold models.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use super::JournalEntryWithLines;

/// Purpose under which COGS journals are keyed.
pub const COGS_PURPOSE: &str = "COGS";

/// Description tag carried by journals created through the COGS backfill.
pub const COGS_BACKFILL_TAG: &str = "COGS-BACKFILL";

/// Sale lifecycle as reported by the sales module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SaleStatus {
    Draft,
    Pending,
    Confirmed,
    Completed,
    Invoiced,
    Overdue,
    Paid,
    Cancelled,
}

impl SaleStatus {
    /// Only invoiced or paid sales recognize cost of goods sold.
    pub fn is_cogs_eligible(&self) -> bool {
        matches!(self, Self::Invoiced | Self::Paid)
    }
}

impl FromStr for SaleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Self::Draft),
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "COMPLETED" => Ok(Self::Completed),
            "INVOICED" => Ok(Self::Invoiced),
            "OVERDUE" => Ok(Self::Overdue),
            "PAID" => Ok(Self::Paid),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(format!("unknown sale status '{}'", other)),
        }
    }
}

/// Sale line with the product cost captured at the time of sale.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SaleItem {
    pub product_id: i64,
    pub quantity: Decimal,
    pub cost_price_snapshot: Decimal,
}

impl SaleItem {
    pub fn cost(&self) -> Decimal {
        self.quantity * self.cost_price_snapshot
    }
}

/// What the COGS calculator needs to know about a sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleForCogs {
    pub sale_id: i64,
    pub invoice_number: String,
    pub status: SaleStatus,
    pub sale_date: NaiveDate,
    pub items: Vec<SaleItem>,
}

/// Why a COGS request produced no journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CogsSkipReason {
    SaleNotFound,
    NotEligible(SaleStatus),
    ZeroCost,
}

/// Result of `compute_and_post`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CogsOutcome {
    Posted { journal: JournalEntryWithLines },
    AlreadyPosted { journal: JournalEntryWithLines },
    NoOp { reason: CogsSkipReason },
}

/// Per-sale failure collected during a backfill run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillFailure {
    pub sale_id: i64,
    pub error: String,
}

/// Summary of a COGS backfill run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillReport {
    pub candidates: usize,
    pub posted: usize,
    pub already_posted: usize,
    pub skipped: usize,
    pub failures: Vec<BackfillFailure>,
}

/// Posted COGS for a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CogsSummary {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub total_cogs: Decimal,
    pub journal_count: i64,
}
