//! Balance propagation.
//!
//! This module is the only writer of `accounts.balance` and `cash_banks.balance`.
//! The database refuses balance changes from any transaction that has not called
//! [`BalancePropagator::authorize`].

use crate::error::{InvalidAccountReason, LedgerError, LedgerResult};
use crate::models::{Account, AccountType, CashBank, JournalLineInput, LinkedBalance};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, instrument};
use uuid::Uuid;

/// Signed change of an account balance for one line.
///
/// Asset and expense accounts move by `debit - credit`, every other type by
/// `credit - debit`.
pub fn signed_delta(account_type: AccountType, debit: Decimal, credit: Decimal) -> Decimal {
    if account_type.is_debit_normal() {
        debit - credit
    } else {
        credit - debit
    }
}

/// Resolve the type of a stored account, falling back to its code prefix.
pub fn account_type_of(account: &Account) -> LedgerResult<AccountType> {
    account
        .parsed_type()
        .or_else(|| AccountType::from_code(&account.code))
        .ok_or_else(|| {
            LedgerError::Conflict(format!(
                "account {} has unknown type '{}'",
                account.code, account.account_type
            ))
        })
}

/// Net effect of a whole entry on one account.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChange {
    pub account_id: Uuid,
    pub cash_bank_id: Option<Uuid>,
    pub delta: Decimal,
    pub new_balance: Decimal,
}

/// Aggregate the entry's deltas per account and enforce the sub-ledger
/// overdraft policy against the (locked) current balances.
///
/// Nothing is written; a failure here leaves the transaction untouched.
pub fn plan_balance_changes(
    linked: &HashMap<Uuid, LinkedBalance>,
    lines: &[JournalLineInput],
) -> LedgerResult<Vec<PlannedChange>> {
    let mut deltas: BTreeMap<Uuid, Decimal> = BTreeMap::new();
    for line in lines {
        let target = linked
            .get(&line.account_id)
            .ok_or_else(|| LedgerError::InvalidAccount {
                account: line.account_id.to_string(),
                reason: InvalidAccountReason::NotFound,
            })?;
        let account_type = account_type_of(&target.account)?;
        *deltas.entry(line.account_id).or_default() +=
            signed_delta(account_type, line.debit, line.credit);
    }

    let mut plan = Vec::with_capacity(deltas.len());
    for (account_id, delta) in deltas {
        let target = &linked[&account_id];
        if let Some(cash_bank) = &target.cash_bank {
            if !cash_bank.allow_negative && cash_bank.balance + delta < Decimal::ZERO {
                return Err(LedgerError::InsufficientFunds {
                    cash_bank_id: cash_bank.cash_bank_id,
                    balance: cash_bank.balance,
                    delta,
                });
            }
        }
        plan.push(PlannedChange {
            account_id,
            cash_bank_id: target.cash_bank.as_ref().map(|cb| cb.cash_bank_id),
            delta,
            new_balance: target.account.balance + delta,
        });
    }
    Ok(plan)
}

/// A stored journal line about to move balances.
#[derive(Debug, Clone, Copy)]
pub struct LineEffect {
    pub journal_id: Uuid,
    pub line_id: Uuid,
    pub entry_date: NaiveDate,
    pub debit: Decimal,
    pub credit: Decimal,
}

pub struct BalancePropagator;

impl BalancePropagator {
    /// Mark the current transaction as the balance writer. Transaction-local.
    pub async fn authorize(tx: &mut Transaction<'static, Postgres>) -> LedgerResult<()> {
        sqlx::query("SELECT set_config('ledger.balance_writer', 'propagator', true)")
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Lock the accounts and sub-ledgers touched by an entry, in ascending id
    /// order, and pair them up.
    #[instrument(skip(tx, account_ids), fields(accounts = account_ids.len()))]
    pub async fn lock(
        tx: &mut Transaction<'static, Postgres>,
        account_ids: &[Uuid],
    ) -> LedgerResult<HashMap<Uuid, LinkedBalance>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_balances"])
            .start_timer();

        let mut ids = account_ids.to_vec();
        ids.sort();
        ids.dedup();

        let accounts = sqlx::query_as::<_, Account>(
            r#"
            SELECT account_id, code, name, account_type, parent_id, is_header, is_active,
                   balance, version, created_utc
            FROM accounts
            WHERE account_id = ANY($1)
            ORDER BY account_id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await?;

        let cash_banks = sqlx::query_as::<_, CashBank>(
            r#"
            SELECT cash_bank_id, code, name, account_id, balance, allow_negative, is_active,
                   created_utc
            FROM cash_banks
            WHERE account_id = ANY($1)
            ORDER BY cash_bank_id
            FOR UPDATE
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await?;

        timer.observe_duration();

        let mut by_account: HashMap<Uuid, CashBank> = cash_banks
            .into_iter()
            .map(|cb| (cb.account_id, cb))
            .collect();

        Ok(accounts
            .into_iter()
            .map(|account| {
                let cash_bank = by_account.remove(&account.account_id);
                (account.account_id, LinkedBalance::new(account, cash_bank))
            })
            .collect())
    }

    /// Apply one line to its account and, when linked, to the sub-ledger by the
    /// same signed delta. Returns the new account balance.
    #[instrument(skip(tx, target, effect), fields(account_id = %target.account_id(), line_id = %effect.line_id))]
    pub async fn apply(
        tx: &mut Transaction<'static, Postgres>,
        target: &mut LinkedBalance,
        effect: &LineEffect,
    ) -> LedgerResult<Decimal> {
        let account_type = account_type_of(&target.account)?;
        let delta = signed_delta(account_type, effect.debit, effect.credit);

        let (balance, version): (Decimal, i64) = sqlx::query_as(
            r#"
            UPDATE accounts
            SET balance = balance + $1, version = version + 1
            WHERE account_id = $2
            RETURNING balance, version
            "#,
        )
        .bind(delta)
        .bind(target.account.account_id)
        .fetch_one(&mut **tx)
        .await?;
        target.account.balance = balance;
        target.account.version = version;

        if let Some(cash_bank) = target.cash_bank.as_mut() {
            let cash_balance: Decimal = sqlx::query_scalar(
                r#"
                UPDATE cash_banks
                SET balance = balance + $1
                WHERE cash_bank_id = $2
                RETURNING balance
                "#,
            )
            .bind(delta)
            .bind(cash_bank.cash_bank_id)
            .fetch_one(&mut **tx)
            .await?;
            cash_bank.balance = cash_balance;

            sqlx::query(
                r#"
                INSERT INTO cash_bank_transactions
                    (transaction_id, cash_bank_id, journal_id, journal_line_id, amount,
                     balance_after, transaction_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(cash_bank.cash_bank_id)
            .bind(effect.journal_id)
            .bind(effect.line_id)
            .bind(delta)
            .bind(cash_balance)
            .bind(effect.entry_date)
            .execute(&mut **tx)
            .await?;
        }

        debug!(delta = %delta, balance = %balance, "Balance propagated");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn account(code: &str, account_type: AccountType, balance: Decimal) -> Account {
        Account {
            account_id: Uuid::new_v4(),
            code: code.to_string(),
            name: format!("Account {}", code),
            account_type: account_type.as_str().to_string(),
            parent_id: None,
            is_header: false,
            is_active: true,
            balance,
            version: 0,
            created_utc: Utc::now(),
        }
    }

    fn cash_bank(account: &Account, allow_negative: bool) -> CashBank {
        CashBank {
            cash_bank_id: Uuid::new_v4(),
            code: format!("CB-{}", account.code),
            name: "Main bank".to_string(),
            account_id: account.account_id,
            balance: account.balance,
            allow_negative,
            is_active: true,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn sign_follows_normal_side() {
        assert_eq!(signed_delta(AccountType::Asset, dec!(100), dec!(0)), dec!(100));
        assert_eq!(signed_delta(AccountType::Expense, dec!(0), dec!(40)), dec!(-40));
        assert_eq!(signed_delta(AccountType::Liability, dec!(0), dec!(550000)), dec!(550000));
        assert_eq!(signed_delta(AccountType::Revenue, dec!(10), dec!(0)), dec!(-10));
        assert_eq!(signed_delta(AccountType::Equity, dec!(0), dec!(7)), dec!(7));
    }

    #[test]
    fn plan_aggregates_lines_on_same_account() {
        let bank = account("1102", AccountType::Asset, dec!(60));
        let revenue = account("4101", AccountType::Revenue, dec!(0));
        let cb = cash_bank(&bank, false);
        let (bank_id, revenue_id) = (bank.account_id, revenue.account_id);

        let linked = HashMap::from([
            (bank_id, LinkedBalance::new(bank, Some(cb))),
            (revenue_id, LinkedBalance::new(revenue, None)),
        ]);
        // Net -50 on the bank keeps it at 10 even though one line alone would overdraw.
        let lines = vec![
            JournalLineInput::credit(bank_id, dec!(150)),
            JournalLineInput::debit(bank_id, dec!(100)),
            JournalLineInput::debit(revenue_id, dec!(50)),
        ];

        let plan = plan_balance_changes(&linked, &lines).unwrap();
        let bank_change = plan.iter().find(|c| c.account_id == bank_id).unwrap();
        assert_eq!(bank_change.delta, dec!(-50));
        assert_eq!(bank_change.new_balance, dec!(10));
        assert!(bank_change.cash_bank_id.is_some());
        let revenue_change = plan.iter().find(|c| c.account_id == revenue_id).unwrap();
        assert_eq!(revenue_change.delta, dec!(-50));
    }

    #[test]
    fn plan_rejects_overdraft_on_strict_sub_ledger() {
        let bank = account("1101", AccountType::Asset, dec!(100));
        let expense = account("6101", AccountType::Expense, dec!(0));
        let cb = cash_bank(&bank, false);
        let cb_id = cb.cash_bank_id;
        let (bank_id, expense_id) = (bank.account_id, expense.account_id);
        let linked = HashMap::from([
            (bank_id, LinkedBalance::new(bank, Some(cb))),
            (expense_id, LinkedBalance::new(expense, None)),
        ]);
        let lines = vec![
            JournalLineInput::debit(expense_id, dec!(100.01)),
            JournalLineInput::credit(bank_id, dec!(100.01)),
        ];

        match plan_balance_changes(&linked, &lines) {
            Err(LedgerError::InsufficientFunds {
                cash_bank_id,
                balance,
                delta,
            }) => {
                assert_eq!(cash_bank_id, cb_id);
                assert_eq!(balance, dec!(100));
                assert_eq!(delta, dec!(-100.01));
            }
            other => panic!("expected InsufficientFunds, got {:?}", other),
        }
    }

    #[test]
    fn plan_allows_overdraft_when_permitted() {
        let bank = account("1102", AccountType::Asset, dec!(0));
        let payable = account("2101", AccountType::Liability, dec!(0));
        let cb = cash_bank(&bank, true);
        let (bank_id, payable_id) = (bank.account_id, payable.account_id);
        let linked = HashMap::from([
            (bank_id, LinkedBalance::new(bank, Some(cb))),
            (payable_id, LinkedBalance::new(payable, None)),
        ]);
        let lines = vec![
            JournalLineInput::debit(payable_id, dec!(500)),
            JournalLineInput::credit(bank_id, dec!(500)),
        ];
        let plan = plan_balance_changes(&linked, &lines).unwrap();
        assert_eq!(plan.len(), 2);
        let payable_change = plan.iter().find(|c| c.account_id == payable_id).unwrap();
        assert_eq!(payable_change.new_balance, dec!(-500));
    }

    #[test]
    fn plan_reports_unknown_account() {
        let lines = vec![JournalLineInput::debit(Uuid::new_v4(), dec!(1))];
        assert!(matches!(
            plan_balance_changes(&HashMap::new(), &lines),
            Err(LedgerError::InvalidAccount {
                reason: InvalidAccountReason::NotFound,
                ..
            })
        ));
    }
}
