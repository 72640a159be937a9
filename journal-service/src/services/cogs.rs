//! Cost of goods sold recognition for invoiced sales.

use crate::config::AccountMapping;
use crate::error::{check_range, InvalidAccountReason, LedgerError, LedgerResult};
use crate::models::{
    BackfillFailure, BackfillReport, CogsOutcome, CogsSkipReason, CogsSummary, JournalLineInput,
    PostOutcome, PostingRequest, SaleForCogs, SaleItem, SaleStatus, SourceType,
    COGS_BACKFILL_TAG, COGS_PURPOSE,
};
use crate::services::metrics::{COGS_TOTAL, DB_QUERY_DURATION};
use crate::services::posting::JournalEngine;
use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Read access to the sales module.
#[async_trait]
pub trait SalesSource: Send + Sync {
    /// Sale header and items, or `None` if the sale does not exist.
    async fn sale_for_cogs(&self, sale_id: i64) -> LedgerResult<Option<SaleForCogs>>;

    /// Ids of COGS-eligible sales dated within `[start, end]`.
    async fn eligible_sales(&self, start: NaiveDate, end: NaiveDate) -> LedgerResult<Vec<i64>>;
}

/// [`SalesSource`] over the `sales` and `sale_items` tables.
#[derive(Clone)]
pub struct PgSalesSource {
    pool: PgPool,
}

impl PgSalesSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SalesSource for PgSalesSource {
    #[instrument(skip(self))]
    async fn sale_for_cogs(&self, sale_id: i64) -> LedgerResult<Option<SaleForCogs>> {
        let header: Option<(i64, String, String, NaiveDate)> = sqlx::query_as(
            "SELECT sale_id, invoice_number, status, sale_date FROM sales WHERE sale_id = $1",
        )
        .bind(sale_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((sale_id, invoice_number, status, sale_date)) = header else {
            return Ok(None);
        };
        let status: SaleStatus = status.parse().map_err(LedgerError::Conflict)?;

        let items = sqlx::query_as::<_, SaleItem>(
            r#"
            SELECT product_id, quantity, cost_price_snapshot
            FROM sale_items
            WHERE sale_id = $1
            ORDER BY sale_item_id
            "#,
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(SaleForCogs {
            sale_id,
            invoice_number,
            status,
            sale_date,
            items,
        }))
    }

    #[instrument(skip(self))]
    async fn eligible_sales(&self, start: NaiveDate, end: NaiveDate) -> LedgerResult<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT sale_id FROM sales
            WHERE sale_date BETWEEN $1 AND $2
              AND UPPER(status) IN ('INVOICED', 'PAID')
            ORDER BY sale_date, sale_id
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

/// Total cost of a sale, skipping items without a positive cost.
pub fn compute_cogs(items: &[SaleItem]) -> Decimal {
    items
        .iter()
        .map(SaleItem::cost)
        .filter(|cost| *cost > Decimal::ZERO)
        .sum::<Decimal>()
        .round_dp(2)
}

/// What to do for one sale.
#[derive(Debug, Clone)]
pub enum CogsPlan {
    Post { sale: SaleForCogs, total: Decimal },
    Skip(CogsSkipReason),
}

/// Decide whether a sale recognizes COGS and for how much.
pub async fn plan_cogs(sales: &dyn SalesSource, sale_id: i64) -> LedgerResult<CogsPlan> {
    let Some(sale) = sales.sale_for_cogs(sale_id).await? else {
        return Ok(CogsPlan::Skip(CogsSkipReason::SaleNotFound));
    };
    if !sale.status.is_cogs_eligible() {
        return Ok(CogsPlan::Skip(CogsSkipReason::NotEligible(sale.status)));
    }
    let total = compute_cogs(&sale.items);
    if total.is_zero() {
        return Ok(CogsPlan::Skip(CogsSkipReason::ZeroCost));
    }
    Ok(CogsPlan::Post { sale, total })
}

#[derive(Clone)]
pub struct CogsCalculator {
    engine: JournalEngine,
    sales: Arc<dyn SalesSource>,
    pool: PgPool,
    accounts: AccountMapping,
}

impl CogsCalculator {
    pub fn new(
        engine: JournalEngine,
        sales: Arc<dyn SalesSource>,
        pool: PgPool,
        accounts: AccountMapping,
    ) -> Self {
        Self {
            engine,
            sales,
            pool,
            accounts,
        }
    }

    /// Post `DEBIT COGS / CREDIT Inventory` for one sale, keyed by
    /// `(SALE, sale_id, COGS)`.
    #[instrument(skip(self))]
    pub async fn compute_and_post(&self, sale_id: i64) -> LedgerResult<CogsOutcome> {
        self.post_for_sale(sale_id, None).await
    }

    async fn post_for_sale(&self, sale_id: i64, tag: Option<&str>) -> LedgerResult<CogsOutcome> {
        let (sale, total) = match plan_cogs(self.sales.as_ref(), sale_id).await? {
            CogsPlan::Post { sale, total } => (sale, total),
            CogsPlan::Skip(reason) => {
                COGS_TOTAL.with_label_values(&["skipped"]).inc();
                info!(sale_id, reason = ?reason, "No COGS to post");
                return Ok(CogsOutcome::NoOp { reason });
            }
        };

        let cogs_account = self.resolve_account(&self.accounts.cogs).await?;
        let inventory_account = self.resolve_account(&self.accounts.inventory).await?;

        let base = format!("COGS for {}", sale.invoice_number);
        let description = match tag {
            Some(tag) => format!("{}: {}", tag, base),
            None => base,
        };
        let request = PostingRequest {
            source_type: SourceType::Sale,
            source_id: sale.sale_id,
            purpose: COGS_PURPOSE.to_string(),
            entry_date: sale.sale_date,
            description: Some(description),
            lines: vec![
                JournalLineInput::debit(cogs_account, total).with_description("Cost of goods sold"),
                JournalLineInput::credit(inventory_account, total)
                    .with_description("Inventory relieved"),
            ],
        };

        match self.engine.post(&request).await? {
            PostOutcome::Posted(journal) => {
                COGS_TOTAL.with_label_values(&["posted"]).inc();
                info!(sale_id, total = %total, journal_id = %journal.entry.journal_id, "COGS posted");
                Ok(CogsOutcome::Posted { journal })
            }
            PostOutcome::AlreadyPosted(journal) => {
                COGS_TOTAL.with_label_values(&["already_posted"]).inc();
                Ok(CogsOutcome::AlreadyPosted { journal })
            }
        }
    }

    /// Post COGS for every eligible sale in the range. Per-sale failures are
    /// collected and do not stop the run.
    #[instrument(skip(self))]
    pub async fn backfill(&self, start: NaiveDate, end: NaiveDate) -> LedgerResult<BackfillReport> {
        check_range(start, end)?;
        let candidates = self.sales.eligible_sales(start, end).await?;
        let mut report = BackfillReport {
            candidates: candidates.len(),
            ..BackfillReport::default()
        };

        for sale_id in candidates {
            match self.post_for_sale(sale_id, Some(COGS_BACKFILL_TAG)).await {
                Ok(CogsOutcome::Posted { .. }) => report.posted += 1,
                Ok(CogsOutcome::AlreadyPosted { .. }) => report.already_posted += 1,
                Ok(CogsOutcome::NoOp { .. }) => report.skipped += 1,
                Err(e) => {
                    warn!(sale_id, error = %e, "COGS backfill failed for sale");
                    report.failures.push(BackfillFailure {
                        sale_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            candidates = report.candidates,
            posted = report.posted,
            already_posted = report.already_posted,
            skipped = report.skipped,
            failed = report.failures.len(),
            "COGS backfill finished"
        );
        Ok(report)
    }

    /// COGS recognized by posted COGS entries dated within the range.
    #[instrument(skip(self))]
    pub async fn summary(&self, start: NaiveDate, end: NaiveDate) -> LedgerResult<CogsSummary> {
        check_range(start, end)?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cogs_summary"])
            .start_timer();

        let (total_cogs, journal_count): (Decimal, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(l.debit_amount), 0), COUNT(DISTINCT e.journal_id)
            FROM journal_entries e
            JOIN journal_lines l ON l.journal_id = e.journal_id
            JOIN accounts a ON a.account_id = l.account_id
            WHERE e.purpose = $1
              AND e.status = 'POSTED'
              AND e.entry_date BETWEEN $2 AND $3
              AND a.code = $4
            "#,
        )
        .bind(COGS_PURPOSE)
        .bind(start)
        .bind(end)
        .bind(&self.accounts.cogs)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(CogsSummary {
            start_date: start,
            end_date: end,
            total_cogs,
            journal_count,
        })
    }

    async fn resolve_account(&self, code: &str) -> LedgerResult<Uuid> {
        let account_id: Option<Uuid> =
            sqlx::query_scalar("SELECT account_id FROM accounts WHERE code = $1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await?;
        account_id.ok_or_else(|| LedgerError::InvalidAccount {
            account: code.to_string(),
            reason: InvalidAccountReason::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct StubSales {
        sales: HashMap<i64, SaleForCogs>,
    }

    #[async_trait]
    impl SalesSource for StubSales {
        async fn sale_for_cogs(&self, sale_id: i64) -> LedgerResult<Option<SaleForCogs>> {
            Ok(self.sales.get(&sale_id).cloned())
        }

        async fn eligible_sales(&self, _: NaiveDate, _: NaiveDate) -> LedgerResult<Vec<i64>> {
            Ok(self
                .sales
                .values()
                .filter(|s| s.status.is_cogs_eligible())
                .map(|s| s.sale_id)
                .collect())
        }
    }

    fn item(quantity: Decimal, cost: Decimal) -> SaleItem {
        SaleItem {
            product_id: 1,
            quantity,
            cost_price_snapshot: cost,
        }
    }

    fn sale(sale_id: i64, status: SaleStatus, items: Vec<SaleItem>) -> SaleForCogs {
        SaleForCogs {
            sale_id,
            invoice_number: format!("INV-{}", sale_id),
            status,
            sale_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            items,
        }
    }

    fn stub(sales: Vec<SaleForCogs>) -> StubSales {
        StubSales {
            sales: sales.into_iter().map(|s| (s.sale_id, s)).collect(),
        }
    }

    #[test]
    fn every_sales_module_status_parses_and_only_billed_sales_qualify() {
        let eligible: Vec<&str> = [
            "DRAFT", "PENDING", "CONFIRMED", "COMPLETED", "INVOICED", "OVERDUE", "PAID",
            "CANCELLED",
        ]
        .into_iter()
        .filter(|raw| {
            raw.parse::<SaleStatus>()
                .map(|status| status.is_cogs_eligible())
                .unwrap_or_else(|e| panic!("{}", e))
        })
        .collect();
        assert_eq!(eligible, vec!["INVOICED", "PAID"]);
        assert_eq!("pending".parse::<SaleStatus>(), Ok(SaleStatus::Pending));
        assert!("SHIPPED".parse::<SaleStatus>().is_err());
    }

    #[test]
    fn cost_uses_snapshot_and_skips_free_items() {
        let items = vec![
            item(dec!(10), dec!(50000)),
            item(dec!(5), dec!(50000)),
            item(dec!(3), dec!(0)),
        ];
        assert_eq!(compute_cogs(&items), dec!(750000));
    }

    #[test]
    fn fractional_quantities_round_to_cents() {
        let items = vec![item(dec!(0.3333), dec!(10.00))];
        assert_eq!(compute_cogs(&items), dec!(3.33));
    }

    #[tokio::test]
    async fn invoiced_sale_plans_a_post() {
        let source = stub(vec![sale(
            7,
            SaleStatus::Invoiced,
            vec![item(dec!(15), dec!(50000))],
        )]);
        match plan_cogs(&source, 7).await.unwrap() {
            CogsPlan::Post { sale, total } => {
                assert_eq!(sale.sale_id, 7);
                assert_eq!(total, dec!(750000));
            }
            other => panic!("expected a post, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn ineligible_missing_and_free_sales_are_skipped() {
        let source = stub(vec![
            sale(1, SaleStatus::Confirmed, vec![item(dec!(1), dec!(10))]),
            sale(2, SaleStatus::Paid, vec![item(dec!(4), dec!(0))]),
        ]);

        assert!(matches!(
            plan_cogs(&source, 1).await.unwrap(),
            CogsPlan::Skip(CogsSkipReason::NotEligible(SaleStatus::Confirmed))
        ));
        assert!(matches!(
            plan_cogs(&source, 2).await.unwrap(),
            CogsPlan::Skip(CogsSkipReason::ZeroCost)
        ));
        assert!(matches!(
            plan_cogs(&source, 99).await.unwrap(),
            CogsPlan::Skip(CogsSkipReason::SaleNotFound)
        ));
    }
}
