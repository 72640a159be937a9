//! Journal posting engine.
//!
//! Every post runs in one transaction: intent claim, closed-period check,
//! account locks, policy checks, numbering, entry and lines, balance
//! propagation. Any failure rolls the whole unit back.

use crate::config::PostingPolicy;
use crate::error::{InvalidAccountReason, LedgerError, LedgerResult};
use crate::models::{
    JournalEntry, JournalEntryWithLines, JournalLine, JournalLineInput, JournalStatus,
    LinkedBalance, PostOutcome, PostingKey, PostingRequest, ReversalRequest, SourceType,
    REVERSAL_PURPOSE,
};
use crate::services::balance::{plan_balance_changes, BalancePropagator, LineEffect};
use crate::services::idempotency::IdempotencyGuard;
use crate::services::metrics::{
    DB_QUERY_DURATION, ERRORS_TOTAL, POSTS_TOTAL, POST_RETRIES_TOTAL, REVERSALS_TOTAL,
};
use crate::services::numbering::next_entry_number;
use crate::services::period::ensure_open;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub(crate) const ENTRY_COLUMNS: &str = "journal_id, entry_number, source_type, source_id, \
    purpose, entry_date, description, status, total_debit, total_credit, reversal_of, \
    reversed_by, reversal_reason, posted_utc, created_utc";

pub(crate) const LINE_COLUMNS: &str =
    "line_id, journal_id, account_id, line_number, debit_amount, credit_amount, description";

/// Structural and balance checks that need no database access. Amounts are
/// exact at two decimal places, so debits must equal credits to the cent.
/// Returns `(total_debit, total_credit)`.
pub fn validate_lines(lines: &[JournalLineInput]) -> LedgerResult<(Decimal, Decimal)> {
    if lines.len() < 2 {
        return Err(LedgerError::InvalidLine {
            line_number: lines.len(),
            reason: "an entry needs at least two lines".to_string(),
        });
    }
    let (total_debit, total_credit) = validate_line_shapes(lines)?;
    if total_debit != total_credit {
        return Err(LedgerError::UnbalancedEntry {
            total_debit,
            total_credit,
        });
    }
    Ok((total_debit, total_credit))
}

/// Per-line checks shared by drafts and posts: exactly one positive side, at
/// most two decimal places.
fn validate_line_shapes(lines: &[JournalLineInput]) -> LedgerResult<(Decimal, Decimal)> {
    let mut total_debit = Decimal::ZERO;
    let mut total_credit = Decimal::ZERO;
    for (idx, line) in lines.iter().enumerate() {
        let reason = if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
            Some("amounts must not be negative")
        } else if line.debit.is_zero() && line.credit.is_zero() {
            Some("either debit or credit must be set")
        } else if !line.debit.is_zero() && !line.credit.is_zero() {
            Some("a line cannot carry both debit and credit")
        } else if line.debit.normalize().scale() > 2 || line.credit.normalize().scale() > 2 {
            Some("amounts are limited to two decimal places")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(LedgerError::InvalidLine {
                line_number: idx + 1,
                reason: reason.to_string(),
            });
        }
        total_debit += line.debit;
        total_credit += line.credit;
    }
    Ok((total_debit, total_credit))
}

/// Every line must target an existing, active, non-header account whose
/// cash/bank sub-ledger, if any, is active too.
pub fn check_accounts(
    linked: &HashMap<Uuid, LinkedBalance>,
    lines: &[JournalLineInput],
) -> LedgerResult<()> {
    for line in lines {
        let target = match linked.get(&line.account_id) {
            Some(target) => target,
            None => {
                return Err(LedgerError::InvalidAccount {
                    account: line.account_id.to_string(),
                    reason: InvalidAccountReason::NotFound,
                })
            }
        };
        let account = &target.account;
        let sub_ledger_closed = target.cash_bank.as_ref().is_some_and(|cb| !cb.is_active);
        let reason = if account.is_header {
            Some(InvalidAccountReason::Header)
        } else if !account.is_active || sub_ledger_closed {
            Some(InvalidAccountReason::Inactive)
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(LedgerError::InvalidAccount {
                account: account.code.clone(),
                reason,
            });
        }
    }
    Ok(())
}

/// Lines of a reversing entry: same accounts, debit and credit swapped.
pub fn reversal_lines(lines: &[JournalLine]) -> Vec<JournalLineInput> {
    lines
        .iter()
        .map(|line| JournalLineInput {
            account_id: line.account_id,
            debit: line.credit_amount,
            credit: line.debit_amount,
            description: line.description.clone(),
        })
        .collect()
}

fn stored_lines_as_input(lines: &[JournalLine]) -> Vec<JournalLineInput> {
    lines
        .iter()
        .map(|line| JournalLineInput {
            account_id: line.account_id,
            debit: line.debit_amount,
            credit: line.credit_amount,
            description: line.description.clone(),
        })
        .collect()
}

fn is_entry_number_collision(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation()
                && db_err.constraint() == Some("journal_entries_entry_number_key")
        }
        _ => false,
    }
}

/// Header of an entry about to be written as POSTED.
struct NewEntry<'a> {
    journal_id: Uuid,
    source_type: &'a str,
    source_id: i64,
    purpose: &'a str,
    entry_date: NaiveDate,
    description: Option<&'a str>,
    total_debit: Decimal,
    total_credit: Decimal,
    reversal_of: Option<Uuid>,
    reversal_reason: Option<&'a str>,
}

/// What receives the entry number.
enum NumberTarget<'a> {
    Insert(&'a NewEntry<'a>),
    Draft {
        journal_id: Uuid,
        total_debit: Decimal,
        total_credit: Decimal,
    },
}

#[derive(Clone)]
pub struct JournalEngine {
    pool: PgPool,
    policy: PostingPolicy,
    guard: IdempotencyGuard,
}

impl JournalEngine {
    pub fn new(pool: PgPool, policy: PostingPolicy) -> Self {
        let guard = IdempotencyGuard::new(pool.clone());
        Self {
            pool,
            policy,
            guard,
        }
    }

    pub fn policy(&self) -> &PostingPolicy {
        &self.policy
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    // -------------------------------------------------------------------------
    // Posting
    // -------------------------------------------------------------------------

    /// Post a balanced entry. A repeated key returns the entry that already holds
    /// it without touching any balance.
    #[instrument(skip(self, request), fields(key = %request.key(), lines = request.lines.len()))]
    pub async fn post(&self, request: &PostingRequest) -> LedgerResult<PostOutcome> {
        if let Err(e) = validate_lines(&request.lines) {
            POSTS_TOTAL.with_label_values(&["rejected"]).inc();
            warn!(error = %e, "Posting rejected");
            return Err(e);
        }

        let result = self.with_retries("post", || self.try_post(request)).await;
        self.settle(result).await
    }

    async fn try_post(&self, request: &PostingRequest) -> LedgerResult<JournalEntryWithLines> {
        let mut tx = self.pool.begin().await?;
        BalancePropagator::authorize(&mut tx).await?;
        let posted = self.post_within(&mut tx, request).await?;
        tx.commit().await?;
        Ok(posted)
    }

    /// Claim, write and bind a posting inside a caller's authorized transaction.
    /// Nothing is committed here.
    pub(crate) async fn post_within(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        request: &PostingRequest,
    ) -> LedgerResult<JournalEntryWithLines> {
        let key = request.key();
        let (total_debit, total_credit) = validate_lines(&request.lines)?;

        if !IdempotencyGuard::claim(tx, &key).await? {
            return Err(self.duplicate_of(&key).await?);
        }

        let entry = NewEntry {
            journal_id: Uuid::new_v4(),
            source_type: request.source_type.as_str(),
            source_id: request.source_id,
            purpose: &request.purpose,
            entry_date: request.entry_date,
            description: request.description.as_deref(),
            total_debit,
            total_credit,
            reversal_of: None,
            reversal_reason: None,
        };
        let posted = self.write_posted_entry(tx, &entry, &request.lines).await?;

        IdempotencyGuard::bind_journal(tx, &key, posted.entry.journal_id).await?;
        Ok(posted)
    }

    /// Lock, check, number, insert and propagate. Shared by posts and reversals.
    async fn write_posted_entry(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        entry: &NewEntry<'_>,
        lines: &[JournalLineInput],
    ) -> LedgerResult<JournalEntryWithLines> {
        ensure_open(tx, entry.entry_date).await?;
        let account_ids: Vec<Uuid> = lines.iter().map(|l| l.account_id).collect();
        let mut linked = BalancePropagator::lock(tx, &account_ids).await?;
        check_accounts(&linked, lines)?;
        plan_balance_changes(&linked, lines)?;

        let header = self
            .assign_number(tx, NumberTarget::Insert(entry), entry.entry_date)
            .await?;
        let stored = Self::insert_lines(tx, header.journal_id, lines).await?;
        Self::propagate(tx, &mut linked, &header, &stored).await?;

        Ok(JournalEntryWithLines {
            entry: header,
            lines: stored,
        })
    }

    /// Allocate the next period number and store it, retrying inside a
    /// savepoint when the number is already taken.
    async fn assign_number(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        target: NumberTarget<'_>,
        entry_date: NaiveDate,
    ) -> LedgerResult<JournalEntry> {
        for attempt in 1..=self.policy.max_numbering_attempts {
            let entry_number = next_entry_number(tx, entry_date).await?;

            sqlx::query("SAVEPOINT entry_number_attempt")
                .execute(&mut **tx)
                .await?;

            let result = match &target {
                NumberTarget::Insert(entry) => {
                    let sql = format!(
                        r#"
                        INSERT INTO journal_entries
                            (journal_id, entry_number, source_type, source_id, purpose,
                             entry_date, description, status, total_debit, total_credit,
                             reversal_of, reversal_reason, posted_utc)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, 'POSTED', $8, $9, $10, $11, NOW())
                        RETURNING {}
                        "#,
                        ENTRY_COLUMNS
                    );
                    sqlx::query_as::<_, JournalEntry>(&sql)
                        .bind(entry.journal_id)
                        .bind(&entry_number)
                        .bind(entry.source_type)
                        .bind(entry.source_id)
                        .bind(entry.purpose)
                        .bind(entry.entry_date)
                        .bind(entry.description)
                        .bind(entry.total_debit)
                        .bind(entry.total_credit)
                        .bind(entry.reversal_of)
                        .bind(entry.reversal_reason)
                        .fetch_one(&mut **tx)
                        .await
                }
                NumberTarget::Draft {
                    journal_id,
                    total_debit,
                    total_credit,
                } => {
                    let sql = format!(
                        r#"
                        UPDATE journal_entries
                        SET entry_number = $2, status = 'POSTED', total_debit = $3,
                            total_credit = $4, posted_utc = NOW()
                        WHERE journal_id = $1
                        RETURNING {}
                        "#,
                        ENTRY_COLUMNS
                    );
                    sqlx::query_as::<_, JournalEntry>(&sql)
                        .bind(journal_id)
                        .bind(&entry_number)
                        .bind(total_debit)
                        .bind(total_credit)
                        .fetch_one(&mut **tx)
                        .await
                }
            };

            match result {
                Ok(header) => {
                    sqlx::query("RELEASE SAVEPOINT entry_number_attempt")
                        .execute(&mut **tx)
                        .await?;
                    return Ok(header);
                }
                Err(e) if is_entry_number_collision(&e) => {
                    warn!(entry_number = %entry_number, attempt, "Entry number taken, retrying");
                    sqlx::query("ROLLBACK TO SAVEPOINT entry_number_attempt")
                        .execute(&mut **tx)
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LedgerError::Conflict(format!(
            "no free entry number for {} after {} attempts",
            entry_date.format("%Y-%m"),
            self.policy.max_numbering_attempts
        )))
    }

    async fn insert_lines(
        tx: &mut Transaction<'static, Postgres>,
        journal_id: Uuid,
        lines: &[JournalLineInput],
    ) -> LedgerResult<Vec<JournalLine>> {
        let sql = format!(
            r#"
            INSERT INTO journal_lines
                (line_id, journal_id, account_id, line_number, debit_amount, credit_amount,
                 description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            LINE_COLUMNS
        );

        let mut stored = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            let row = sqlx::query_as::<_, JournalLine>(&sql)
                .bind(Uuid::new_v4())
                .bind(journal_id)
                .bind(line.account_id)
                .bind((idx + 1) as i32)
                .bind(line.debit)
                .bind(line.credit)
                .bind(line.description.as_deref())
                .fetch_one(&mut **tx)
                .await?;
            stored.push(row);
        }
        Ok(stored)
    }

    async fn propagate(
        tx: &mut Transaction<'static, Postgres>,
        linked: &mut HashMap<Uuid, LinkedBalance>,
        header: &JournalEntry,
        lines: &[JournalLine],
    ) -> LedgerResult<()> {
        for line in lines {
            let target = linked.get_mut(&line.account_id).ok_or_else(|| {
                LedgerError::InvalidAccount {
                    account: line.account_id.to_string(),
                    reason: InvalidAccountReason::NotFound,
                }
            })?;
            let effect = LineEffect {
                journal_id: header.journal_id,
                line_id: line.line_id,
                entry_date: header.entry_date,
                debit: line.debit_amount,
                credit: line.credit_amount,
            };
            BalancePropagator::apply(tx, target, &effect).await?;
        }
        Ok(())
    }

    /// Build the duplicate error for a key another transaction already holds.
    async fn duplicate_of(&self, key: &PostingKey) -> LedgerResult<LedgerError> {
        match self.guard.existing_journal(key).await? {
            Some(journal_id) => Ok(LedgerError::DuplicatePost { journal_id }),
            None => Ok(LedgerError::Conflict(format!(
                "posting key {} is claimed but has no journal",
                key
            ))),
        }
    }

    /// Turn the raw result of a post into its outcome and record metrics.
    async fn settle(
        &self,
        result: LedgerResult<JournalEntryWithLines>,
    ) -> LedgerResult<PostOutcome> {
        match result {
            Ok(journal) => {
                POSTS_TOTAL.with_label_values(&["posted"]).inc();
                info!(
                    journal_id = %journal.entry.journal_id,
                    entry_number = ?journal.entry.entry_number,
                    total = %journal.entry.total_debit,
                    "Journal posted"
                );
                Ok(PostOutcome::Posted(journal))
            }
            Err(LedgerError::DuplicatePost { journal_id }) => {
                let journal = self.get_entry(journal_id).await?.ok_or_else(|| {
                    LedgerError::NotFound(format!("journal {} not found", journal_id))
                })?;
                POSTS_TOTAL.with_label_values(&["already_posted"]).inc();
                info!(journal_id = %journal_id, "Posting key already used, returning existing journal");
                Ok(PostOutcome::AlreadyPosted(journal))
            }
            Err(e) => {
                let outcome = match e {
                    LedgerError::Database(_) | LedgerError::Conflict(_) => "error",
                    _ => "rejected",
                };
                POSTS_TOTAL.with_label_values(&[outcome]).inc();
                ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
                warn!(error = %e, "Posting failed");
                Err(e)
            }
        }
    }

    /// Run `op` again while it fails with a serialization failure or deadlock.
    async fn with_retries<T, F, Fut>(&self, operation: &'static str, mut op: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Err(e) if e.is_transient() => {
                    if attempt >= self.policy.max_post_retries {
                        return Err(LedgerError::Conflict(format!(
                            "{} gave up after {} attempts: {}",
                            operation, attempt, e
                        )));
                    }
                    POST_RETRIES_TOTAL.with_label_values(&[operation]).inc();
                    warn!(error = %e, attempt, "Transient database conflict, retrying");
                    tokio::time::sleep(Duration::from_millis(25 * (1u64 << attempt.min(6))))
                        .await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reversal
    // -------------------------------------------------------------------------

    /// Reverse a POSTED entry with a mirror entry and mark the original REVERSED.
    #[instrument(skip(self, request), fields(entry_id = %entry_id))]
    pub async fn reverse(
        &self,
        entry_id: Uuid,
        request: &ReversalRequest,
    ) -> LedgerResult<JournalEntryWithLines> {
        let result = self
            .with_retries("reverse", || self.try_reverse(entry_id, request))
            .await;

        match &result {
            Ok(reversal) => {
                REVERSALS_TOTAL.with_label_values(&["ok"]).inc();
                info!(
                    reversal_id = %reversal.entry.journal_id,
                    entry_number = ?reversal.entry.entry_number,
                    "Journal reversed"
                );
            }
            Err(e) => {
                REVERSALS_TOTAL.with_label_values(&["error"]).inc();
                ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
                warn!(error = %e, "Reversal failed");
            }
        }
        result
    }

    async fn try_reverse(
        &self,
        entry_id: Uuid,
        request: &ReversalRequest,
    ) -> LedgerResult<JournalEntryWithLines> {
        let mut tx = self.pool.begin().await?;
        BalancePropagator::authorize(&mut tx).await?;

        let sql = format!(
            "SELECT {} FROM journal_entries WHERE journal_id = $1 FOR UPDATE",
            ENTRY_COLUMNS
        );
        let original = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("journal {} not found", entry_id)))?;

        if original.parsed_status() != Some(JournalStatus::Posted) {
            return Err(LedgerError::ReversalState {
                entry_id,
                status: original.status,
            });
        }
        if original.source_type == SourceType::PeriodClose.as_str() {
            return Err(LedgerError::Conflict(format!(
                "journal {} closes a period and cannot be reversed",
                entry_id
            )));
        }

        let original_lines = Self::fetch_lines(&mut *tx, entry_id).await?;
        let lines = reversal_lines(&original_lines);

        let number = original.entry_number.as_deref().unwrap_or("-");
        let description = match &request.reason {
            Some(reason) => format!("Reversal of {}: {}", number, reason),
            None => format!("Reversal of {}", number),
        };
        let entry = NewEntry {
            journal_id: Uuid::new_v4(),
            source_type: &original.source_type,
            source_id: original.source_id,
            purpose: REVERSAL_PURPOSE,
            entry_date: request
                .reversal_date
                .unwrap_or_else(|| Utc::now().date_naive()),
            description: Some(&description),
            total_debit: original.total_credit,
            total_credit: original.total_debit,
            reversal_of: Some(entry_id),
            reversal_reason: request.reason.as_deref(),
        };
        let reversal = self.write_posted_entry(&mut tx, &entry, &lines).await?;

        sqlx::query(
            r#"
            UPDATE journal_entries
            SET status = 'REVERSED', reversed_by = $2, reversal_reason = $3
            WHERE journal_id = $1
            "#,
        )
        .bind(entry_id)
        .bind(reversal.entry.journal_id)
        .bind(request.reason.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(reversal)
    }

    // -------------------------------------------------------------------------
    // Drafts
    // -------------------------------------------------------------------------

    /// Store a DRAFT: no number, no intent claim, no balance effect.
    #[instrument(skip(self, request), fields(key = %request.key(), lines = request.lines.len()))]
    pub async fn save_draft(&self, request: &PostingRequest) -> LedgerResult<JournalEntryWithLines> {
        if request.lines.is_empty() {
            return Err(LedgerError::InvalidLine {
                line_number: 0,
                reason: "a draft needs at least one line".to_string(),
            });
        }
        let (total_debit, total_credit) = validate_line_shapes(&request.lines)?;

        let mut tx = self.pool.begin().await?;
        let account_ids: Vec<Uuid> = request.lines.iter().map(|l| l.account_id).collect();
        let linked = BalancePropagator::lock(&mut tx, &account_ids).await?;
        check_accounts(&linked, &request.lines)?;

        let journal_id = Uuid::new_v4();
        let sql = format!(
            r#"
            INSERT INTO journal_entries
                (journal_id, source_type, source_id, purpose, entry_date, description, status,
                 total_debit, total_credit)
            VALUES ($1, $2, $3, $4, $5, $6, 'DRAFT', $7, $8)
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        );
        let entry = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(journal_id)
            .bind(request.source_type.as_str())
            .bind(request.source_id)
            .bind(&request.purpose)
            .bind(request.entry_date)
            .bind(request.description.as_deref())
            .bind(total_debit)
            .bind(total_credit)
            .fetch_one(&mut *tx)
            .await?;
        let lines = Self::insert_lines(&mut tx, journal_id, &request.lines).await?;
        tx.commit().await?;

        info!(journal_id = %journal_id, "Draft saved");
        Ok(JournalEntryWithLines { entry, lines })
    }

    /// Validate a draft as a post would, then number it and move balances.
    #[instrument(skip(self), fields(entry_id = %entry_id))]
    pub async fn post_draft(&self, entry_id: Uuid) -> LedgerResult<PostOutcome> {
        let result = self
            .with_retries("post_draft", || self.try_post_draft(entry_id))
            .await;
        self.settle(result).await
    }

    async fn try_post_draft(&self, entry_id: Uuid) -> LedgerResult<JournalEntryWithLines> {
        let mut tx = self.pool.begin().await?;
        BalancePropagator::authorize(&mut tx).await?;

        let sql = format!(
            "SELECT {} FROM journal_entries WHERE journal_id = $1 FOR UPDATE",
            ENTRY_COLUMNS
        );
        let draft = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("journal {} not found", entry_id)))?;

        match draft.parsed_status() {
            Some(JournalStatus::Draft) => {}
            Some(JournalStatus::Posted) => {
                return Err(LedgerError::DuplicatePost { journal_id: entry_id })
            }
            _ => {
                return Err(LedgerError::Conflict(format!(
                    "journal {} is {} and cannot be posted",
                    entry_id, draft.status
                )))
            }
        }

        ensure_open(&mut tx, draft.entry_date).await?;
        let stored = Self::fetch_lines(&mut *tx, entry_id).await?;
        let inputs = stored_lines_as_input(&stored);
        let (total_debit, total_credit) = validate_lines(&inputs)?;

        let source_type: SourceType = draft
            .source_type
            .parse()
            .map_err(LedgerError::Conflict)?;
        let key = PostingKey::new(source_type, draft.source_id, draft.purpose.clone());
        if !IdempotencyGuard::claim(&mut tx, &key).await? {
            tx.rollback().await?;
            return Err(self.duplicate_of(&key).await?);
        }

        let account_ids: Vec<Uuid> = inputs.iter().map(|l| l.account_id).collect();
        let mut linked = BalancePropagator::lock(&mut tx, &account_ids).await?;
        check_accounts(&linked, &inputs)?;
        plan_balance_changes(&linked, &inputs)?;

        let header = self
            .assign_number(
                &mut tx,
                NumberTarget::Draft {
                    journal_id: entry_id,
                    total_debit,
                    total_credit,
                },
                draft.entry_date,
            )
            .await?;
        Self::propagate(&mut tx, &mut linked, &header, &stored).await?;
        IdempotencyGuard::bind_journal(&mut tx, &key, entry_id).await?;

        tx.commit().await?;
        Ok(JournalEntryWithLines {
            entry: header,
            lines: stored,
        })
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Advisory check whether a key is still free.
    pub async fn should_post(&self, key: &PostingKey) -> LedgerResult<bool> {
        self.guard.should_post(key).await
    }

    #[instrument(skip(self), fields(journal_id = %journal_id))]
    pub async fn get_entry(&self, journal_id: Uuid) -> LedgerResult<Option<JournalEntryWithLines>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_entry"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM journal_entries WHERE journal_id = $1",
            ENTRY_COLUMNS
        );
        let entry = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(journal_id)
            .fetch_optional(&self.pool)
            .await?;

        let result = match entry {
            Some(entry) => {
                let lines = Self::fetch_lines(&self.pool, journal_id).await?;
                Some(JournalEntryWithLines { entry, lines })
            }
            None => None,
        };

        timer.observe_duration();
        Ok(result)
    }

    /// Journal drilldown: every entry emitted for one source document, oldest first.
    #[instrument(skip(self))]
    pub async fn find_by_source(
        &self,
        source_type: SourceType,
        source_id: i64,
    ) -> LedgerResult<Vec<JournalEntryWithLines>> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_by_source"])
            .start_timer();

        let sql = format!(
            r#"
            SELECT {} FROM journal_entries
            WHERE source_type = $1 AND source_id = $2
            ORDER BY created_utc, journal_id
            "#,
            ENTRY_COLUMNS
        );
        let entries = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(source_type.as_str())
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;

        let ids: Vec<Uuid> = entries.iter().map(|e| e.journal_id).collect();
        let sql = format!(
            "SELECT {} FROM journal_lines WHERE journal_id = ANY($1) ORDER BY journal_id, line_number",
            LINE_COLUMNS
        );
        let lines = sqlx::query_as::<_, JournalLine>(&sql)
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;

        let mut by_entry: HashMap<Uuid, Vec<JournalLine>> = HashMap::new();
        for line in lines {
            by_entry.entry(line.journal_id).or_default().push(line);
        }

        timer.observe_duration();
        Ok(entries
            .into_iter()
            .map(|entry| {
                let lines = by_entry.remove(&entry.journal_id).unwrap_or_default();
                JournalEntryWithLines { entry, lines }
            })
            .collect())
    }

    /// Entry holding a posting key, if any.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get_by_key(&self, key: &PostingKey) -> LedgerResult<Option<JournalEntryWithLines>> {
        match self.guard.existing_journal(key).await? {
            Some(journal_id) => self.get_entry(journal_id).await,
            None => Ok(None),
        }
    }

    async fn fetch_lines<'e, E>(executor: E, journal_id: Uuid) -> LedgerResult<Vec<JournalLine>>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            "SELECT {} FROM journal_lines WHERE journal_id = $1 ORDER BY line_number",
            LINE_COLUMNS
        );
        let lines = sqlx::query_as::<_, JournalLine>(&sql)
            .bind(journal_id)
            .fetch_all(executor)
            .await?;
        Ok(lines)
    }
}
