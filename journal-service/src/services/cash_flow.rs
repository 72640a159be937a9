//! Indirect-method cash flow statement from posted journal activity.

use crate::error::{check_range, LedgerResult};
use crate::models::{
    AccountActivity, AccountType, ActivitySection, CashFlowCategory, CashFlowItem,
    CashFlowStatement, OperatingActivities,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use tracing::{info, instrument, warn};

/// Account-code prefix rules for balance-sheet accounts. The longest matching
/// prefix wins; accounts matching nothing are working capital.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashFlowRules {
    rules: Vec<(String, CashFlowCategory)>,
}

impl Default for CashFlowRules {
    fn default() -> Self {
        use CashFlowCategory::*;
        let rules = [
            // Accumulated depreciation and amortization
            ("1690", NonCashAdjustment),
            ("1790", NonCashAdjustment),
            // Receivables, inventory, payables and tax payable
            ("11", WorkingCapital),
            ("12", WorkingCapital),
            ("13", WorkingCapital),
            ("21", WorkingCapital),
            ("2103", WorkingCapital),
            // Investments, fixed assets and intangibles
            ("14", Investing),
            ("15", Investing),
            ("16", Investing),
            ("17", Investing),
            // Short and long term debt, equity
            ("211", Financing),
            ("22", Financing),
            ("3", Financing),
        ];
        Self {
            rules: rules
                .into_iter()
                .map(|(prefix, category)| (prefix.to_string(), category))
                .collect(),
        }
    }
}

impl CashFlowRules {
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Parse `prefix=category` pairs separated by commas, e.g.
    /// `1690=non_cash_adjustment,16=investing,22=financing`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut rules = Vec::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (prefix, category) = pair
                .split_once('=')
                .ok_or_else(|| format!("expected prefix=category, got '{}'", pair))?;
            let prefix = prefix.trim();
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("invalid account prefix '{}'", prefix));
            }
            let category = match category.trim().to_ascii_lowercase().as_str() {
                "non_cash_adjustment" => CashFlowCategory::NonCashAdjustment,
                "working_capital" => CashFlowCategory::WorkingCapital,
                "investing" => CashFlowCategory::Investing,
                "financing" => CashFlowCategory::Financing,
                other => return Err(format!("unknown cash flow category '{}'", other)),
            };
            rules.push((prefix.to_string(), category));
        }
        if rules.is_empty() {
            return Err("no rules given".to_string());
        }
        Ok(Self { rules })
    }

    /// Category of a non-cash account. Revenue and expense accounts always feed
    /// net income.
    pub fn classify(&self, code: &str, account_type: AccountType) -> CashFlowCategory {
        if account_type.is_income_statement() {
            return CashFlowCategory::NetIncome;
        }
        self.rules
            .iter()
            .filter(|(prefix, _)| code.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, category)| *category)
            .unwrap_or(CashFlowCategory::WorkingCapital)
    }
}

/// Assemble the statement. Cash positions come from the sub-ledger logs and are
/// never adjusted to fit the activity total.
pub fn build_statement(
    start_date: NaiveDate,
    end_date: NaiveDate,
    activity: &[AccountActivity],
    rules: &CashFlowRules,
    cash_at_beginning: Decimal,
    cash_at_end: Decimal,
) -> CashFlowStatement {
    let mut operating = OperatingActivities::default();
    let mut investing = ActivitySection::default();
    let mut financing = ActivitySection::default();

    for account in activity.iter().filter(|a| !a.is_cash) {
        let amount = account.cash_effect();
        if amount.is_zero() {
            continue;
        }
        let account_type = account
            .account_type
            .parse::<AccountType>()
            .ok()
            .or_else(|| AccountType::from_code(&account.code))
            .unwrap_or(AccountType::Asset);
        let category = rules.classify(&account.code, account_type);
        let item = CashFlowItem {
            account_id: account.account_id,
            code: account.code.clone(),
            name: account.name.clone(),
            category,
            amount,
        };

        match category {
            CashFlowCategory::NetIncome => {
                operating.net_income += amount;
                operating.items.push(item);
            }
            CashFlowCategory::NonCashAdjustment => {
                operating.non_cash_adjustments += amount;
                operating.items.push(item);
            }
            CashFlowCategory::WorkingCapital => {
                operating.working_capital_changes += amount;
                operating.items.push(item);
            }
            CashFlowCategory::Investing => {
                investing.total += amount;
                investing.items.push(item);
            }
            CashFlowCategory::Financing => {
                financing.total += amount;
                financing.items.push(item);
            }
        }
    }

    operating.total =
        operating.net_income + operating.non_cash_adjustments + operating.working_capital_changes;
    let net_cash_flow = operating.total + investing.total + financing.total;

    CashFlowStatement {
        start_date,
        end_date,
        operating,
        investing,
        financing,
        net_cash_flow,
        cash_at_beginning,
        cash_at_end,
        reconciliation_difference: cash_at_end - (cash_at_beginning + net_cash_flow),
    }
}

#[derive(Clone)]
pub struct CashFlowAggregator {
    pool: PgPool,
    rules: CashFlowRules,
    tolerance: Decimal,
}

impl CashFlowAggregator {
    pub fn new(pool: PgPool, rules: CashFlowRules, tolerance: Decimal) -> Self {
        Self {
            pool,
            rules,
            tolerance,
        }
    }

    /// Statement for `[start, end]`, both inclusive.
    #[instrument(skip(self))]
    pub async fn aggregate(&self, start: NaiveDate, end: NaiveDate) -> LedgerResult<CashFlowStatement> {
        check_range(start, end)?;
        let timer = DB_QUERY_DURATION
            .with_label_values(&["cash_flow"])
            .start_timer();

        let activity = sqlx::query_as::<_, AccountActivity>(
            r#"
            SELECT a.account_id, a.code, a.name, a.account_type,
                   EXISTS (SELECT 1 FROM cash_banks cb WHERE cb.account_id = a.account_id) AS is_cash,
                   COALESCE(SUM(l.debit_amount), 0) AS debit_total,
                   COALESCE(SUM(l.credit_amount), 0) AS credit_total
            FROM journal_lines l
            JOIN journal_entries e ON e.journal_id = l.journal_id
            JOIN accounts a ON a.account_id = l.account_id
            WHERE e.status <> 'DRAFT' AND e.entry_date BETWEEN $1 AND $2
              AND e.source_type <> 'PERIOD_CLOSE'
            GROUP BY a.account_id, a.code, a.name, a.account_type
            ORDER BY a.code
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        let (cash_at_beginning, cash_at_end): (Decimal, Decimal) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(amount) FILTER (WHERE transaction_date < $1), 0),
                   COALESCE(SUM(amount) FILTER (WHERE transaction_date <= $2), 0)
            FROM cash_bank_transactions
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();

        let statement = build_statement(
            start,
            end,
            &activity,
            &self.rules,
            cash_at_beginning,
            cash_at_end,
        );

        if !statement.is_reconciled(self.tolerance) {
            warn!(
                difference = %statement.reconciliation_difference,
                "Cash flow statement does not reconcile with cash/bank logs"
            );
        }
        info!(
            net_cash_flow = %statement.net_cash_flow,
            cash_at_end = %statement.cash_at_end,
            "Cash flow statement built"
        );
        Ok(statement)
    }
}
