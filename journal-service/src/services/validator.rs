//! Read-only integrity checks of the cached balances against the journal.
//!
//! Nothing here writes. Drift is reported, logged and counted; repair happens
//! through correcting journal entries only.

use crate::config::PostingPolicy;
use crate::error::LedgerResult;
use crate::models::{
    AccountType, InconsistencyKind, IntegrityDriftWarning, Severity, ValidationReport,
    ValidationScope,
};
use crate::services::balance::signed_delta;
use crate::services::metrics::{DB_QUERY_DURATION, DRIFT_WARNINGS_TOTAL};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Severity of a monetary drift.
pub fn grade(difference: Decimal, policy: &PostingPolicy) -> Severity {
    let magnitude = difference.abs();
    if magnitude > policy.drift_critical_threshold {
        Severity::Critical
    } else if magnitude < policy.drift_low_threshold {
        Severity::Low
    } else {
        Severity::High
    }
}

#[derive(Debug, Clone, FromRow)]
struct AccountCheck {
    account_id: Uuid,
    code: String,
    name: String,
    account_type: String,
    is_header: bool,
    balance: Decimal,
    debit_total: Decimal,
    credit_total: Decimal,
    line_count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct CashBankCheck {
    cash_bank_id: Uuid,
    code: String,
    balance: Decimal,
    account_code: String,
    account_balance: Decimal,
    log_total: Decimal,
}

#[derive(Debug, Clone, FromRow)]
struct JournalCheck {
    journal_id: Uuid,
    entry_number: Option<String>,
    total_debit: Decimal,
    total_credit: Decimal,
    line_debit: Decimal,
    line_credit: Decimal,
}

fn warning(
    kind: InconsistencyKind,
    entity_id: Uuid,
    entity_label: String,
    expected: Decimal,
    actual: Decimal,
    severity: Severity,
    description: String,
) -> IntegrityDriftWarning {
    IntegrityDriftWarning {
        kind,
        entity_id,
        entity_label,
        expected,
        actual,
        difference: actual - expected,
        severity,
        description,
    }
}

fn check_account(row: &AccountCheck, policy: &PostingPolicy) -> Vec<IntegrityDriftWarning> {
    let mut found = Vec::new();
    let label = format!("{} {}", row.code, row.name);

    if row.is_header {
        if row.line_count > 0 {
            found.push(warning(
                InconsistencyKind::HeaderPosting,
                row.account_id,
                label.clone(),
                Decimal::ZERO,
                Decimal::from(row.line_count),
                Severity::High,
                format!("header account {} has {} journal lines", row.code, row.line_count),
            ));
        }
        if !row.balance.is_zero() {
            found.push(warning(
                InconsistencyKind::HeaderBalanceStored,
                row.account_id,
                label,
                Decimal::ZERO,
                row.balance,
                grade(row.balance, policy),
                format!("header account {} stores balance {}", row.code, row.balance),
            ));
        }
        return found;
    }

    let account_type = row
        .account_type
        .parse::<AccountType>()
        .ok()
        .or_else(|| AccountType::from_code(&row.code))
        .unwrap_or(AccountType::Asset);
    let expected = signed_delta(account_type, row.debit_total, row.credit_total);
    let difference = row.balance - expected;
    if difference.abs() > policy.balance_tolerance {
        found.push(warning(
            InconsistencyKind::AccountDrift,
            row.account_id,
            label,
            expected,
            row.balance,
            grade(difference, policy),
            format!(
                "account {} caches {} but its journal lines sum to {}",
                row.code, row.balance, expected
            ),
        ));
    }
    found
}

fn check_cash_bank(row: &CashBankCheck, policy: &PostingPolicy) -> Vec<IntegrityDriftWarning> {
    let mut found = Vec::new();

    let log_difference = row.balance - row.log_total;
    if log_difference.abs() > policy.balance_tolerance {
        let doubled = !row.balance.is_zero() && row.balance == row.log_total * Decimal::TWO;
        let (kind, severity, description) = if doubled {
            (
                InconsistencyKind::DoublePosting,
                Severity::Critical,
                format!(
                    "cash/bank {} balance {} is exactly twice its transaction log",
                    row.code, row.balance
                ),
            )
        } else {
            (
                InconsistencyKind::CashBankTransactionDrift,
                grade(log_difference, policy),
                format!(
                    "cash/bank {} caches {} but its transaction log sums to {}",
                    row.code, row.balance, row.log_total
                ),
            )
        };
        found.push(warning(
            kind,
            row.cash_bank_id,
            row.code.clone(),
            row.log_total,
            row.balance,
            severity,
            description,
        ));
    }

    let account_difference = row.balance - row.account_balance;
    if account_difference.abs() > policy.balance_tolerance {
        found.push(warning(
            InconsistencyKind::CashBankAccountDrift,
            row.cash_bank_id,
            row.code.clone(),
            row.account_balance,
            row.balance,
            grade(account_difference, policy),
            format!(
                "cash/bank {} caches {} but account {} holds {}",
                row.code, row.balance, row.account_code, row.account_balance
            ),
        ));
    }
    found
}

fn check_journal(row: &JournalCheck) -> Vec<IntegrityDriftWarning> {
    let mut found = Vec::new();
    let label = row
        .entry_number
        .clone()
        .unwrap_or_else(|| row.journal_id.to_string());

    if row.line_debit != row.line_credit {
        found.push(warning(
            InconsistencyKind::UnbalancedJournal,
            row.journal_id,
            label.clone(),
            row.line_debit,
            row.line_credit,
            Severity::Critical,
            format!(
                "journal {} lines debit {} but credit {}",
                label, row.line_debit, row.line_credit
            ),
        ));
    }

    if row.total_debit != row.line_debit || row.total_credit != row.line_credit {
        let difference = (row.total_debit - row.line_debit).abs()
            + (row.total_credit - row.line_credit).abs();
        found.push(warning(
            InconsistencyKind::JournalTotalsMismatch,
            row.journal_id,
            label.clone(),
            row.line_debit + row.line_credit,
            row.line_debit + row.line_credit + difference,
            Severity::Critical,
            format!(
                "journal {} header totals {}/{} differ from lines {}/{}",
                label, row.total_debit, row.total_credit, row.line_debit, row.line_credit
            ),
        ));
    }
    found
}

#[derive(Clone)]
pub struct LedgerValidator {
    pool: PgPool,
    policy: PostingPolicy,
}

impl LedgerValidator {
    pub fn new(pool: PgPool, policy: PostingPolicy) -> Self {
        Self { pool, policy }
    }

    #[instrument(skip(self))]
    pub async fn validate(&self, scope: ValidationScope) -> LedgerResult<ValidationReport> {
        let mut report = ValidationReport::new(scope);

        if scope.includes_accounts() {
            let rows = self.account_checks().await?;
            report.total_checks += rows.len();
            for row in &rows {
                report.inconsistencies.extend(check_account(row, &self.policy));
            }
        }

        if scope.includes_cash_banks() {
            let rows = self.cash_bank_checks().await?;
            report.total_checks += rows.len() * 2;
            for row in &rows {
                report.inconsistencies.extend(check_cash_bank(row, &self.policy));
            }
        }

        if scope.includes_journals() {
            let rows = self.journal_checks().await?;
            report.total_checks += rows.len() * 2;
            for row in &rows {
                report.inconsistencies.extend(check_journal(row));
            }
        }

        for item in &report.inconsistencies {
            DRIFT_WARNINGS_TOTAL
                .with_label_values(&[item.kind.as_str(), item.severity.as_str()])
                .inc();
            warn!(
                kind = %item.kind,
                severity = %item.severity,
                entity_id = %item.entity_id,
                entity = %item.entity_label,
                expected = %item.expected,
                actual = %item.actual,
                difference = %item.difference,
                "Integrity drift detected"
            );
        }

        info!(
            scope = ?scope,
            total_checks = report.total_checks,
            inconsistencies = report.inconsistencies.len(),
            "Ledger validation finished"
        );
        Ok(report)
    }

    async fn account_checks(&self) -> LedgerResult<Vec<AccountCheck>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["validate_accounts"])
            .start_timer();

        let rows = sqlx::query_as::<_, AccountCheck>(
            r#"
            SELECT a.account_id, a.code, a.name, a.account_type, a.is_header, a.balance,
                   COALESCE(SUM(l.debit_amount) FILTER (WHERE e.status <> 'DRAFT'), 0) AS debit_total,
                   COALESCE(SUM(l.credit_amount) FILTER (WHERE e.status <> 'DRAFT'), 0) AS credit_total,
                   COUNT(l.line_id) FILTER (WHERE e.status <> 'DRAFT') AS line_count
            FROM accounts a
            LEFT JOIN journal_lines l ON l.account_id = a.account_id
            LEFT JOIN journal_entries e ON e.journal_id = l.journal_id
            GROUP BY a.account_id, a.code, a.name, a.account_type, a.is_header, a.balance
            ORDER BY a.code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(rows)
    }

    async fn cash_bank_checks(&self) -> LedgerResult<Vec<CashBankCheck>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["validate_cash_banks"])
            .start_timer();

        let rows = sqlx::query_as::<_, CashBankCheck>(
            r#"
            SELECT cb.cash_bank_id, cb.code, cb.balance,
                   a.code AS account_code, a.balance AS account_balance,
                   COALESCE((
                       SELECT SUM(t.amount) FROM cash_bank_transactions t
                       WHERE t.cash_bank_id = cb.cash_bank_id
                   ), 0) AS log_total
            FROM cash_banks cb
            JOIN accounts a ON a.account_id = cb.account_id
            ORDER BY cb.code
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(rows)
    }

    async fn journal_checks(&self) -> LedgerResult<Vec<JournalCheck>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["validate_journals"])
            .start_timer();

        let rows = sqlx::query_as::<_, JournalCheck>(
            r#"
            SELECT e.journal_id, e.entry_number, e.total_debit, e.total_credit,
                   COALESCE(SUM(l.debit_amount), 0) AS line_debit,
                   COALESCE(SUM(l.credit_amount), 0) AS line_credit
            FROM journal_entries e
            LEFT JOIN journal_lines l ON l.journal_id = e.journal_id
            WHERE e.status <> 'DRAFT'
            GROUP BY e.journal_id, e.entry_number, e.total_debit, e.total_credit
            ORDER BY e.entry_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();
        Ok(rows)
    }
}
