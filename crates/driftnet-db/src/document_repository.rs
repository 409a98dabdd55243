use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use driftnet_core::error::AppError;
use driftnet_core::models::Document;
use driftnet_core::router::Tier;
use driftnet_core::traits::DocumentStore;

use crate::database::db_err;

/// Repository for translated documents.
#[derive(Clone)]
pub struct PgDocumentRepository {
    pool: Pool<Postgres>,
}

impl PgDocumentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Most recent documents of a job.
    pub async fn list_for_job(&self, job_id: Uuid, limit: usize) -> Result<Vec<Document>, AppError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            r#"
            SELECT * FROM documents
            WHERE job_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(job_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Document::from).collect())
    }

    pub async fn count_for_job(&self, job_id: Uuid) -> Result<u64, AppError> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(n.max(0) as u64)
    }
}

#[derive(sqlx::FromRow)]
struct DocumentRow {
    id: Uuid,
    job_id: Uuid,
    entry_id: Uuid,
    url: String,
    normalized_url: String,
    content_hash: String,
    simhash: i64,
    original_text: String,
    translated_text: String,
    provider: String,
    source_lang: String,
    target_lang: String,
    tier: String,
    near_duplicate_of: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            job_id: row.job_id,
            entry_id: row.entry_id,
            url: row.url,
            normalized_url: row.normalized_url,
            content_hash: row.content_hash.trim().to_string(),
            simhash: row.simhash as u64,
            original_text: row.original_text,
            translated_text: row.translated_text,
            provider: row.provider,
            source_lang: row.source_lang,
            target_lang: row.target_lang,
            tier: row.tier.parse().unwrap_or(Tier::Balanced),
            near_duplicate_of: row.near_duplicate_of,
            created_at: row.created_at,
        }
    }
}

impl DocumentStore for PgDocumentRepository {
    async fn save(&self, document: &Document) -> Result<Uuid, AppError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO documents (
                id, job_id, entry_id, url, normalized_url, content_hash, simhash,
                original_text, translated_text, provider, source_lang, target_lang,
                tier, near_duplicate_of, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id
            "#,
        )
        .bind(document.id)
        .bind(document.job_id)
        .bind(document.entry_id)
        .bind(&document.url)
        .bind(&document.normalized_url)
        .bind(&document.content_hash)
        .bind(document.simhash as i64)
        .bind(&document.original_text)
        .bind(&document.translated_text)
        .bind(&document.provider)
        .bind(&document.source_lang)
        .bind(&document.target_lang)
        .bind(document.tier.as_str())
        .bind(&document.near_duplicate_of)
        .bind(document.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        tracing::debug!(document_id = %id, url = %document.url, "Saved document");
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>, AppError> {
        let row = sqlx::query_as::<_, DocumentRow>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Document::from))
    }

    async fn find_by_entry(&self, entry_id: Uuid) -> Result<Option<Document>, AppError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE entry_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(entry_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Document::from))
    }
}
