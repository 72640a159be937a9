//! Domain models for journal-service.

mod account;
mod cash_bank;
mod cash_flow;
mod cogs;
mod journal;
mod period;
mod validation;

pub use account::{Account, AccountNode, AccountType, CreateAccount, TrialBalance, TrialBalanceRow};
pub use cash_bank::{CashBank, CashBankTransaction, CreateCashBank, LinkedBalance};
pub use cash_flow::{
    AccountActivity, ActivitySection, CashFlowCategory, CashFlowItem, CashFlowStatement,
    OperatingActivities,
};
pub use cogs::{
    BackfillFailure, BackfillReport, CogsOutcome, CogsSkipReason, CogsSummary, SaleForCogs,
    SaleItem, SaleStatus, COGS_BACKFILL_TAG, COGS_PURPOSE,
};
pub use journal::{
    JournalEntry, JournalEntryWithLines, JournalLine, JournalLineInput, JournalStatus,
    PostOutcome, PostingKey, PostingRequest, ReversalRequest, SourceType, REVERSAL_PURPOSE,
};
pub use period::{
    closing_source_id, ClosePeriodRequest, ClosedPeriod, PeriodClosing, PeriodStatus,
    CLOSING_PURPOSE,
};
pub use validation::{
    InconsistencyKind, IntegrityDriftWarning, Severity, ValidationReport, ValidationScope,
};
