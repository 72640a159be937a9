//! Journal entry model for double-entry accounting.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Journal entry lifecycle: DRAFT -> POSTED -> REVERSED (terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JournalStatus {
    Draft,
    Posted,
    Reversed,
}

impl JournalStatus {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Posted => "POSTED",
            Self::Reversed => "REVERSED",
        }
    }
}

impl FromStr for JournalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(Self::Draft),
            "POSTED" => Ok(Self::Posted),
            "REVERSED" => Ok(Self::Reversed),
            other => Err(format!("unknown journal status '{}'", other)),
        }
    }
}

impl std::fmt::Display for JournalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Business event that originated a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    Sale,
    Purchase,
    Payment,
    CashBank,
    Manual,
    Adjustment,
    PeriodClose,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sale => "SALE",
            Self::Purchase => "PURCHASE",
            Self::Payment => "PAYMENT",
            Self::CashBank => "CASH_BANK",
            Self::Manual => "MANUAL",
            Self::Adjustment => "ADJUSTMENT",
            Self::PeriodClose => "PERIOD_CLOSE",
        }
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SALE" => Ok(Self::Sale),
            "PURCHASE" => Ok(Self::Purchase),
            "PAYMENT" => Ok(Self::Payment),
            "CASH_BANK" => Ok(Self::CashBank),
            "MANUAL" => Ok(Self::Manual),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            "PERIOD_CLOSE" => Ok(Self::PeriodClose),
            other => Err(format!("unknown source type '{}'", other)),
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Purpose recorded on reversing entries.
pub const REVERSAL_PURPOSE: &str = "REVERSAL";

/// Idempotency key: at most one journal per (source type, source id, purpose).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostingKey {
    pub source_type: SourceType,
    pub source_id: i64,
    pub purpose: String,
}

impl PostingKey {
    pub fn new(source_type: SourceType, source_id: i64, purpose: impl Into<String>) -> Self {
        Self {
            source_type,
            source_id,
            purpose: purpose.into(),
        }
    }
}

impl std::fmt::Display for PostingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.source_type, self.source_id, self.purpose)
    }
}

/// One requested journal line. Exactly one of `debit` / `credit` is nonzero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLineInput {
    pub account_id: Uuid,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

impl JournalLineInput {
    pub fn debit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
            description: None,
        }
    }

    pub fn credit(account_id: Uuid, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Posting request emitted by sales, purchases, payments and manual adjustments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostingRequest {
    pub source_type: SourceType,
    pub source_id: i64,
    pub purpose: String,
    pub entry_date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    pub lines: Vec<JournalLineInput>,
}

impl PostingRequest {
    pub fn key(&self) -> PostingKey {
        PostingKey::new(self.source_type, self.source_id, self.purpose.clone())
    }
}

/// Journal entry header.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalEntry {
    pub journal_id: Uuid,
    pub entry_number: Option<String>,
    pub source_type: String,
    pub source_id: i64,
    pub purpose: String,
    pub entry_date: NaiveDate,
    pub description: Option<String>,
    pub status: String,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub reversal_of: Option<Uuid>,
    pub reversed_by: Option<Uuid>,
    pub reversal_reason: Option<String>,
    pub posted_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl JournalEntry {
    /// Get parsed status.
    pub fn parsed_status(&self) -> Option<JournalStatus> {
        self.status.parse().ok()
    }
}

/// Journal line as stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct JournalLine {
    pub line_id: Uuid,
    pub journal_id: Uuid,
    pub account_id: Uuid,
    pub line_number: i32,
    pub debit_amount: Decimal,
    pub credit_amount: Decimal,
    pub description: Option<String>,
}

/// Entry header together with its ordered lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntryWithLines {
    #[serde(flatten)]
    pub entry: JournalEntry,
    pub lines: Vec<JournalLine>,
}

/// Result of a post: either a new entry, or the entry that already holds the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "journal", rename_all = "snake_case")]
pub enum PostOutcome {
    Posted(JournalEntryWithLines),
    AlreadyPosted(JournalEntryWithLines),
}

impl PostOutcome {
    pub fn journal(&self) -> &JournalEntryWithLines {
        match self {
            Self::Posted(j) | Self::AlreadyPosted(j) => j,
        }
    }

    pub fn into_journal(self) -> JournalEntryWithLines {
        match self {
            Self::Posted(j) | Self::AlreadyPosted(j) => j,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Posted(_))
    }
}

/// Request to reverse a posted entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReversalRequest {
    #[serde(default)]
    pub reversal_date: Option<NaiveDate>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_database_text() {
        for status in [JournalStatus::Draft, JournalStatus::Posted, JournalStatus::Reversed] {
            assert_eq!(status.as_str().parse::<JournalStatus>(), Ok(status));
        }
        assert!("posted".parse::<JournalStatus>().is_err());
    }

    #[test]
    fn posting_keys_differ_by_purpose() {
        let revenue = PostingKey::new(SourceType::Sale, 42, "REVENUE");
        let cogs = PostingKey::new(SourceType::Sale, 42, "COGS");
        assert_ne!(revenue, cogs);
        assert_eq!(cogs.to_string(), "(SALE, 42, COGS)");
    }

    #[test]
    fn source_type_accepts_lowercase() {
        assert_eq!("cash_bank".parse::<SourceType>(), Ok(SourceType::CashBank));
        assert!("refund".parse::<SourceType>().is_err());
    }
}
