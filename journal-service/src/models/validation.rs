//! Integrity report model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Which part of the ledger to check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationScope {
    #[default]
    All,
    Accounts,
    CashBanks,
    Journals,
}

impl ValidationScope {
    pub fn includes_accounts(&self) -> bool {
        matches!(self, Self::All | Self::Accounts)
    }

    pub fn includes_cash_banks(&self) -> bool {
        matches!(self, Self::All | Self::CashBanks)
    }

    pub fn includes_journals(&self) -> bool {
        matches!(self, Self::All | Self::Journals)
    }
}

impl FromStr for ValidationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "all" => Ok(Self::All),
            "accounts" => Ok(Self::Accounts),
            "cash_banks" => Ok(Self::CashBanks),
            "journals" => Ok(Self::Journals),
            other => Err(format!("unknown validation scope '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InconsistencyKind {
    /// Cached account balance differs from its journal lines.
    AccountDrift,
    /// A journal line targets a header account.
    HeaderPosting,
    /// A header account carries a stored balance.
    HeaderBalanceStored,
    /// Sub-ledger balance differs from its transaction log.
    CashBankTransactionDrift,
    /// Sub-ledger balance differs from its linked account.
    CashBankAccountDrift,
    /// Sub-ledger balance is exactly twice its transaction log.
    DoublePosting,
    /// Posted entry lines do not balance.
    UnbalancedJournal,
    /// Posted entry header totals disagree with its lines.
    JournalTotalsMismatch,
}

impl InconsistencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccountDrift => "ACCOUNT_DRIFT",
            Self::HeaderPosting => "HEADER_POSTING",
            Self::HeaderBalanceStored => "HEADER_BALANCE_STORED",
            Self::CashBankTransactionDrift => "CASH_BANK_TRANSACTION_DRIFT",
            Self::CashBankAccountDrift => "CASH_BANK_ACCOUNT_DRIFT",
            Self::DoublePosting => "DOUBLE_POSTING",
            Self::UnbalancedJournal => "UNBALANCED_JOURNAL",
            Self::JournalTotalsMismatch => "JOURNAL_TOTALS_MISMATCH",
        }
    }
}

impl std::fmt::Display for InconsistencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected drift. Never blocks a write; always surfaced to an operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityDriftWarning {
    pub kind: InconsistencyKind,
    pub entity_id: Uuid,
    pub entity_label: String,
    pub expected: Decimal,
    pub actual: Decimal,
    pub difference: Decimal,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub scope: ValidationScope,
    pub generated_utc: DateTime<Utc>,
    pub total_checks: usize,
    pub inconsistencies: Vec<IntegrityDriftWarning>,
}

impl ValidationReport {
    pub fn new(scope: ValidationScope) -> Self {
        Self {
            scope,
            generated_utc: Utc::now(),
            total_checks: 0,
            inconsistencies: Vec::new(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.inconsistencies.is_empty()
    }

    pub fn count_of(&self, kind: InconsistencyKind) -> usize {
        self.inconsistencies.iter().filter(|i| i.kind == kind).count()
    }

    pub fn has_critical(&self) -> bool {
        self.inconsistencies
            .iter()
            .any(|i| i.severity == Severity::Critical)
    }
}
