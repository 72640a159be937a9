//! Entry numbering: `JE-YYYY/MM/NNNN`, one sequence per calendar month.

use crate::error::LedgerResult;
use chrono::{Datelike, NaiveDate};
use sqlx::{Postgres, Transaction};

pub fn format_entry_number(year: i32, month: u32, sequence: i64) -> String {
    format!("JE-{:04}/{:02}/{:04}", year, month, sequence)
}

/// Bump the period sequence inside the posting transaction. The bump rolls back
/// with the post, so committed numbers carry no gaps.
pub async fn next_sequence(
    tx: &mut Transaction<'static, Postgres>,
    entry_date: NaiveDate,
) -> LedgerResult<i64> {
    let value: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO journal_sequences (period_year, period_month, last_value)
        VALUES ($1, $2, 1)
        ON CONFLICT (period_year, period_month)
        DO UPDATE SET last_value = journal_sequences.last_value + 1
        RETURNING last_value
        "#,
    )
    .bind(entry_date.year())
    .bind(entry_date.month() as i32)
    .fetch_one(&mut **tx)
    .await?;
    Ok(value)
}

/// Next entry number for the period of `entry_date`.
pub async fn next_entry_number(
    tx: &mut Transaction<'static, Postgres>,
    entry_date: NaiveDate,
) -> LedgerResult<String> {
    let sequence = next_sequence(tx, entry_date).await?;
    Ok(format_entry_number(
        entry_date.year(),
        entry_date.month(),
        sequence,
    ))
}
