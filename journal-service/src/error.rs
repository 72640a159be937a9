//! Error taxonomy of the posting path.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

/// Why a line was rejected because of its account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidAccountReason {
    NotFound,
    Header,
    Inactive,
}

impl std::fmt::Display for InvalidAccountReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "does not exist"),
            Self::Header => write!(f, "is a header account"),
            Self::Inactive => write!(f, "is inactive"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unbalanced entry: debits ({total_debit}) != credits ({total_credit})")]
    UnbalancedEntry {
        total_debit: Decimal,
        total_credit: Decimal,
    },

    #[error("Invalid line {line_number}: {reason}")]
    InvalidLine { line_number: usize, reason: String },

    #[error("Account {account} {reason}")]
    InvalidAccount {
        account: String,
        reason: InvalidAccountReason,
    },

    #[error("Posting key already used by journal {journal_id}")]
    DuplicatePost { journal_id: Uuid },

    #[error("Insufficient funds in cash/bank {cash_bank_id}: balance {balance}, change {delta}")]
    InsufficientFunds {
        cash_bank_id: Uuid,
        balance: Decimal,
        delta: Decimal,
    },

    #[error("Journal {entry_id} cannot be reversed from status {status}")]
    ReversalState { entry_id: Uuid, status: String },

    #[error("Date {date} falls in the closed period {period_start} to {period_end}")]
    PeriodClosed {
        date: NaiveDate,
        period_start: NaiveDate,
        period_end: NaiveDate,
    },

    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// Serialization failures and deadlocks roll back cleanly and may be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnbalancedEntry { .. } => "unbalanced_entry",
            Self::InvalidLine { .. } => "invalid_line",
            Self::InvalidAccount { .. } => "invalid_account",
            Self::DuplicatePost { .. } => "duplicate_post",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::ReversalState { .. } => "reversal_state",
            Self::PeriodClosed { .. } => "period_closed",
            Self::InvalidRange { .. } => "invalid_range",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Config(_) => "config_error",
            Self::Database(_) => "db_error",
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::UnbalancedEntry { .. }
            | LedgerError::InvalidLine { .. }
            | LedgerError::InvalidAccount { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::PeriodClosed { .. }
            | LedgerError::InvalidRange { .. } => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            LedgerError::DuplicatePost { .. }
            | LedgerError::ReversalState { .. }
            | LedgerError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            LedgerError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            LedgerError::Config(msg) => AppError::ConfigError(anyhow::anyhow!(msg)),
            LedgerError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Reject ranges whose start lies after their end. Both bounds are inclusive.
pub fn check_range(start: NaiveDate, end: NaiveDate) -> LedgerResult<()> {
    if start > end {
        return Err(LedgerError::InvalidRange { start, end });
    }
    Ok(())
}
