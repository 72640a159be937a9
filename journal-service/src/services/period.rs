//! Accounting period closing.
//!
//! Closing a period posts one journal that moves every revenue and expense
//! account's period activity into retained earnings, then records the period as
//! closed. From then on no entry dated inside it is written.

use crate::config::AccountMapping;
use crate::error::{check_range, LedgerError, LedgerResult};
use crate::models::{
    closing_source_id, AccountActivity, AccountType, ClosedPeriod, JournalLineInput,
    PeriodClosing, PeriodStatus, PostingRequest, SourceType, CLOSING_PURPOSE,
};
use crate::services::balance::BalancePropagator;
use crate::services::metrics::{DB_QUERY_DURATION, PERIOD_CLOSINGS_TOTAL};
use crate::services::posting::JournalEngine;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Advisory lock serializing period closing against posts. Posts hold it
/// shared, a closing holds it exclusively.
const PERIOD_LOCK_KEY: i64 = 0x4a45_5045_5249_4f44;

const PERIOD_COLUMNS: &str = "period_id, start_date, end_date, description, \
    closing_journal_id, total_revenue, total_expense, net_income, closed_utc";

/// Reject writes dated inside a closed period. Called before anything is
/// locked or written.
pub(crate) async fn ensure_open(
    tx: &mut Transaction<'static, Postgres>,
    date: NaiveDate,
) -> LedgerResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock_shared($1)")
        .bind(PERIOD_LOCK_KEY)
        .execute(&mut **tx)
        .await?;

    let closed: Option<(NaiveDate, NaiveDate)> = sqlx::query_as(
        r#"
        SELECT start_date, end_date FROM closed_periods
        WHERE $1 BETWEEN start_date AND end_date
        LIMIT 1
        "#,
    )
    .bind(date)
    .fetch_optional(&mut **tx)
    .await?;

    match closed {
        Some((period_start, period_end)) => Err(LedgerError::PeriodClosed {
            date,
            period_start,
            period_end,
        }),
        None => Ok(()),
    }
}

/// Lines and totals of a closing journal.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosingPlan {
    pub lines: Vec<JournalLineInput>,
    pub total_revenue: Decimal,
    pub total_expense: Decimal,
    pub net_income: Decimal,
}

/// Zero every income-statement account's period activity against retained
/// earnings. Balance-sheet activity is ignored.
pub fn plan_closing(activity: &[AccountActivity], retained_earnings: Uuid) -> ClosingPlan {
    let mut lines = Vec::new();
    let mut total_revenue = Decimal::ZERO;
    let mut total_expense = Decimal::ZERO;

    for row in activity {
        // Debit-side balance to clear; a credit balance is negative.
        let net = match row.account_type.parse::<AccountType>() {
            Ok(AccountType::Revenue) => {
                let earned = row.credit_total - row.debit_total;
                total_revenue += earned;
                -earned
            }
            Ok(AccountType::Expense) => {
                let spent = row.debit_total - row.credit_total;
                total_expense += spent;
                spent
            }
            _ => continue,
        };
        let line = if net > Decimal::ZERO {
            JournalLineInput::credit(row.account_id, net)
        } else if net < Decimal::ZERO {
            JournalLineInput::debit(row.account_id, -net)
        } else {
            continue;
        };
        lines.push(line.with_description(format!("Close {} {}", row.code, row.name)));
    }

    let net_income = total_revenue - total_expense;
    if !lines.is_empty() {
        let transfer = if net_income > Decimal::ZERO {
            Some(JournalLineInput::credit(retained_earnings, net_income))
        } else if net_income < Decimal::ZERO {
            Some(JournalLineInput::debit(retained_earnings, -net_income))
        } else {
            None
        };
        if let Some(line) = transfer {
            lines.push(line.with_description("Net income to retained earnings"));
        }
    }

    ClosingPlan {
        lines,
        total_revenue,
        total_expense,
        net_income,
    }
}

#[derive(Clone)]
pub struct PeriodCloser {
    engine: JournalEngine,
    pool: PgPool,
    accounts: AccountMapping,
}

impl PeriodCloser {
    pub fn new(engine: JournalEngine, pool: PgPool, accounts: AccountMapping) -> Self {
        Self {
            engine,
            pool,
            accounts,
        }
    }

    /// Close `[start, end]`: post the closing journal and record the period in
    /// one transaction. Overlapping an already closed period is rejected.
    #[instrument(skip(self, description))]
    pub async fn close(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        description: Option<&str>,
    ) -> LedgerResult<PeriodClosing> {
        let result = self.try_close(start, end, description).await;
        match &result {
            Ok(closing) => {
                PERIOD_CLOSINGS_TOTAL.with_label_values(&["closed"]).inc();
                info!(
                    period_id = %closing.period.period_id,
                    net_income = %closing.period.net_income,
                    journal_id = ?closing.period.closing_journal_id,
                    "Period closed"
                );
            }
            Err(e) => {
                PERIOD_CLOSINGS_TOTAL.with_label_values(&["rejected"]).inc();
                warn!(error = %e, "Period closing failed");
            }
        }
        result
    }

    async fn try_close(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        description: Option<&str>,
    ) -> LedgerResult<PeriodClosing> {
        check_range(start, end)?;
        let retained_earnings = self.resolve_retained_earnings().await?;

        let mut tx = self.pool.begin().await?;
        BalancePropagator::authorize(&mut tx).await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(PERIOD_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let overlapping: Option<(NaiveDate, NaiveDate)> = sqlx::query_as(
            r#"
            SELECT start_date, end_date FROM closed_periods
            WHERE start_date <= $2 AND end_date >= $1
            ORDER BY start_date
            LIMIT 1
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some((period_start, period_end)) = overlapping {
            return Err(LedgerError::PeriodClosed {
                date: start.max(period_start),
                period_start,
                period_end,
            });
        }

        let activity = sqlx::query_as::<_, AccountActivity>(
            r#"
            SELECT a.account_id, a.code, a.name, a.account_type,
                   FALSE AS is_cash,
                   COALESCE(SUM(l.debit_amount), 0) AS debit_total,
                   COALESCE(SUM(l.credit_amount), 0) AS credit_total
            FROM journal_lines l
            JOIN journal_entries e ON e.journal_id = l.journal_id
            JOIN accounts a ON a.account_id = l.account_id
            WHERE e.status <> 'DRAFT' AND e.entry_date BETWEEN $1 AND $2
              AND a.account_type IN ('revenue', 'expense')
            GROUP BY a.account_id, a.code, a.name, a.account_type
            ORDER BY a.code
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&mut *tx)
        .await?;

        let plan = plan_closing(&activity, retained_earnings);
        let journal = if plan.lines.is_empty() {
            None
        } else {
            let label = description
                .map(str::to_string)
                .unwrap_or_else(|| format!("Period closing {} to {}", start, end));
            let request = PostingRequest {
                source_type: SourceType::PeriodClose,
                source_id: closing_source_id(end),
                purpose: CLOSING_PURPOSE.to_string(),
                entry_date: end,
                description: Some(label),
                lines: plan.lines.clone(),
            };
            Some(self.engine.post_within(&mut tx, &request).await?)
        };

        let sql = format!(
            r#"
            INSERT INTO closed_periods
                (period_id, start_date, end_date, description, closing_journal_id,
                 total_revenue, total_expense, net_income)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            PERIOD_COLUMNS
        );
        let period = sqlx::query_as::<_, ClosedPeriod>(&sql)
            .bind(Uuid::new_v4())
            .bind(start)
            .bind(end)
            .bind(description)
            .bind(journal.as_ref().map(|j| j.entry.journal_id))
            .bind(plan.total_revenue)
            .bind(plan.total_expense)
            .bind(plan.net_income)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(PeriodClosing { period, journal })
    }

    /// The closed period containing `date`, if any.
    #[instrument(skip(self))]
    pub async fn status(&self, date: NaiveDate) -> LedgerResult<PeriodStatus> {
        let sql = format!(
            r#"
            SELECT {} FROM closed_periods
            WHERE $1 BETWEEN start_date AND end_date
            LIMIT 1
            "#,
            PERIOD_COLUMNS
        );
        let period = sqlx::query_as::<_, ClosedPeriod>(&sql)
            .bind(date)
            .fetch_optional(&self.pool)
            .await?;
        Ok(PeriodStatus {
            date,
            closed: period.is_some(),
            period,
        })
    }

    /// Every closed period, most recent first.
    #[instrument(skip(self))]
    pub async fn list(&self) -> LedgerResult<Vec<ClosedPeriod>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_periods"])
            .start_timer();
        let sql = format!(
            "SELECT {} FROM closed_periods ORDER BY end_date DESC",
            PERIOD_COLUMNS
        );
        let periods = sqlx::query_as::<_, ClosedPeriod>(&sql)
            .fetch_all(&self.pool)
            .await?;
        timer.observe_duration();
        Ok(periods)
    }

    async fn resolve_retained_earnings(&self) -> LedgerResult<Uuid> {
        let code = &self.accounts.retained_earnings;
        let row: Option<(Uuid, String, bool)> = sqlx::query_as(
            "SELECT account_id, account_type, is_header FROM accounts WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((account_id, account_type, false))
                if account_type.parse::<AccountType>() == Ok(AccountType::Equity) =>
            {
                Ok(account_id)
            }
            Some(_) => Err(LedgerError::Config(format!(
                "retained earnings account {} must be a postable equity account",
                code
            ))),
            None => Err(LedgerError::Config(format!(
                "retained earnings account {} is not in the chart of accounts",
                code
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn activity(
        code: &str,
        account_type: AccountType,
        debit: Decimal,
        credit: Decimal,
    ) -> AccountActivity {
        AccountActivity {
            account_id: Uuid::new_v4(),
            code: code.to_string(),
            name: format!("Account {}", code),
            account_type: account_type.as_str().to_string(),
            is_cash: false,
            debit_total: debit,
            credit_total: credit,
        }
    }

    fn sum(lines: &[JournalLineInput]) -> (Decimal, Decimal) {
        lines.iter().fold((Decimal::ZERO, Decimal::ZERO), |(d, c), l| {
            (d + l.debit, c + l.credit)
        })
    }

    #[test]
    fn profit_moves_to_retained_earnings_as_credit() {
        let retained = Uuid::new_v4();
        let revenue = activity("4101", AccountType::Revenue, dec!(0), dec!(5000));
        let cogs = activity("5101", AccountType::Expense, dec!(3000), dec!(0));
        let (revenue_id, cogs_id) = (revenue.account_id, cogs.account_id);

        let plan = plan_closing(&[revenue, cogs], retained);

        assert_eq!(plan.total_revenue, dec!(5000));
        assert_eq!(plan.total_expense, dec!(3000));
        assert_eq!(plan.net_income, dec!(2000));
        assert_eq!(plan.lines.len(), 3);
        assert_eq!(plan.lines[0].account_id, revenue_id);
        assert_eq!(plan.lines[0].debit, dec!(5000));
        assert_eq!(plan.lines[1].account_id, cogs_id);
        assert_eq!(plan.lines[1].credit, dec!(3000));
        assert_eq!(plan.lines[2].account_id, retained);
        assert_eq!(plan.lines[2].credit, dec!(2000));
        let (debit, credit) = sum(&plan.lines);
        assert_eq!(debit, credit);
    }

    #[test]
    fn loss_debits_retained_earnings() {
        let retained = Uuid::new_v4();
        let plan = plan_closing(
            &[
                activity("4101", AccountType::Revenue, dec!(100), dec!(1100)),
                activity("5201", AccountType::Expense, dec!(1500), dec!(0)),
            ],
            retained,
        );
        assert_eq!(plan.net_income, dec!(-500));
        let transfer = plan.lines.last().unwrap();
        assert_eq!(transfer.account_id, retained);
        assert_eq!(transfer.debit, dec!(500));
        let (debit, credit) = sum(&plan.lines);
        assert_eq!(debit, credit);
    }

    #[test]
    fn break_even_needs_no_transfer_line() {
        let plan = plan_closing(
            &[
                activity("4101", AccountType::Revenue, dec!(0), dec!(800)),
                activity("5101", AccountType::Expense, dec!(800), dec!(0)),
            ],
            Uuid::new_v4(),
        );
        assert_eq!(plan.net_income, dec!(0));
        assert_eq!(plan.lines.len(), 2);
    }

    #[test]
    fn balance_sheet_and_settled_accounts_are_left_alone() {
        let plan = plan_closing(
            &[
                activity("1101", AccountType::Asset, dec!(900), dec!(0)),
                activity("4101", AccountType::Revenue, dec!(250), dec!(250)),
            ],
            Uuid::new_v4(),
        );
        assert!(plan.lines.is_empty());
        assert_eq!(plan.net_income, dec!(0));
    }

    #[test]
    fn closing_lines_are_described() {
        let plan = plan_closing(
            &[activity("4101", AccountType::Revenue, dec!(0), dec!(10))],
            Uuid::new_v4(),
        );
        assert_eq!(plan.lines[0].description.as_deref(), Some("Close 4101 Account 4101"));
        assert_eq!(
            plan.lines[1].description.as_deref(),
            Some("Net income to retained earnings")
        );
    }
}
