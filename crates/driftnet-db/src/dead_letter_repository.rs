use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use driftnet_core::error::AppError;
use driftnet_core::reliability::{DeadLetterEntry, DeadLetterStore};

use crate::database::db_err;

/// PostgreSQL dead-letter queue, ordered by insertion.
#[derive(Clone)]
pub struct PgDeadLetterRepository {
    pool: Pool<Postgres>,
}

impl PgDeadLetterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: Uuid,
    seq: i64,
    job_id: Option<Uuid>,
    payload: serde_json::Value,
    reason: String,
    attempt_count: i32,
    first_attempted_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<DeadLetterRow> for DeadLetterEntry {
    fn from(row: DeadLetterRow) -> Self {
        DeadLetterEntry {
            id: row.id,
            job_id: row.job_id,
            original_payload: row.payload,
            failure_reason: row.reason,
            attempt_count: row.attempt_count.max(0) as u32,
            first_attempted_at: row.first_attempted_at,
            created_at: row.created_at,
        }
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

impl DeadLetterStore for PgDeadLetterRepository {
    async fn push(&self, entry: &DeadLetterEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO dead_letters (id, job_id, payload, reason, attempt_count, first_attempted_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.id)
        .bind(entry.job_id)
        .bind(&entry.original_payload)
        .bind(&entry.failure_reason)
        .bind(i32::try_from(entry.attempt_count).unwrap_or(i32::MAX))
        .bind(entry.first_attempted_at)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::warn!(
            dead_letter_id = %entry.id,
            attempts = entry.attempt_count,
            reason = %entry.failure_reason,
            "Item moved to dead-letter queue"
        );
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, AppError> {
        let rows = sqlx::query_as::<_, DeadLetterRow>("SELECT * FROM dead_letters ORDER BY seq ASC LIMIT $1")
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(DeadLetterEntry::from).collect())
    }

    async fn count(&self) -> Result<u64, AppError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n.max(0) as u64)
    }

    async fn count_for_job(&self, job_id: Uuid) -> Result<u64, AppError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dead_letters WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n.max(0) as u64)
    }

    async fn drain(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, AppError> {
        // SKIP LOCKED lets concurrent drainers split the queue instead of blocking.
        let mut rows = sqlx::query_as::<_, DeadLetterRow>(
            r#"
            DELETE FROM dead_letters
            WHERE id IN (
                SELECT id FROM dead_letters
                ORDER BY seq ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.sort_by_key(|r| r.seq);
        if !rows.is_empty() {
            tracing::info!(drained = rows.len(), "Drained dead-letter entries");
        }
        Ok(rows.into_iter().map(DeadLetterEntry::from).collect())
    }
}
