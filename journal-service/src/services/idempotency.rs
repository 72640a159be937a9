//! Posting intents: at most one journal per (source type, source id, purpose).

use crate::error::LedgerResult;
use crate::models::PostingKey;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct IdempotencyGuard {
    pool: PgPool,
}

impl IdempotencyGuard {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Advisory check: true when no journal holds the key yet. A concurrent
    /// post may still win between this check and [`IdempotencyGuard::claim`].
    #[instrument(skip(self), fields(key = %key))]
    pub async fn should_post(&self, key: &PostingKey) -> LedgerResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM posting_intents
                WHERE source_type = $1 AND source_id = $2 AND purpose = $3
            )
            "#,
        )
        .bind(key.source_type.as_str())
        .bind(key.source_id)
        .bind(&key.purpose)
        .fetch_one(&self.pool)
        .await?;
        Ok(!exists)
    }

    /// Claim the key inside the posting transaction. Returns `false` when the key
    /// is already held; a concurrent claimer blocks on the primary key until the
    /// holder commits or rolls back.
    #[instrument(skip(tx), fields(key = %key))]
    pub async fn claim(
        tx: &mut Transaction<'static, Postgres>,
        key: &PostingKey,
    ) -> LedgerResult<bool> {
        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO posting_intents (source_type, source_id, purpose)
            VALUES ($1, $2, $3)
            ON CONFLICT (source_type, source_id, purpose) DO NOTHING
            RETURNING purpose
            "#,
        )
        .bind(key.source_type.as_str())
        .bind(key.source_id)
        .bind(&key.purpose)
        .fetch_optional(&mut **tx)
        .await?;

        debug!(claimed = claimed.is_some(), "Posting intent claim");
        Ok(claimed.is_some())
    }

    /// Record which journal fulfilled a claimed key.
    pub async fn bind_journal(
        tx: &mut Transaction<'static, Postgres>,
        key: &PostingKey,
        journal_id: Uuid,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            UPDATE posting_intents
            SET journal_id = $4
            WHERE source_type = $1 AND source_id = $2 AND purpose = $3
            "#,
        )
        .bind(key.source_type.as_str())
        .bind(key.source_id)
        .bind(&key.purpose)
        .bind(journal_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Journal currently holding the key, if any.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn existing_journal(&self, key: &PostingKey) -> LedgerResult<Option<Uuid>> {
        let journal_id: Option<Option<Uuid>> = sqlx::query_scalar(
            r#"
            SELECT journal_id FROM posting_intents
            WHERE source_type = $1 AND source_id = $2 AND purpose = $3
            "#,
        )
        .bind(key.source_type.as_str())
        .bind(key.source_id)
        .bind(&key.purpose)
        .fetch_optional(&self.pool)
        .await?;
        Ok(journal_id.flatten())
    }
}
