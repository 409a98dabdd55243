use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Pool, Postgres};
use uuid::Uuid;

use driftnet_core::clock::SharedClock;
use driftnet_core::error::AppError;
use driftnet_core::frontier::{
    CompletionOutcome, DomainState, EnqueueOutcome, EntryStatus, FrontierConfig, FrontierEntry,
    FrontierStore, NewFrontierEntry,
};
use driftnet_core::job::{FrontierCounts, JobConfig, JobId};
use driftnet_core::router::Tier;

use crate::database::db_err;

/// Domains skipped per claim when another worker wins the politeness gate.
const MAX_GATE_RETRIES: usize = 8;

/// PostgreSQL frontier. Claims use `SELECT FOR UPDATE SKIP LOCKED` plus a
/// conditional upsert on `domain_state` so concurrent workers never crawl
/// the same domain inside its delay.
#[derive(Clone)]
pub struct PgFrontierRepository {
    pool: Pool<Postgres>,
    config: FrontierConfig,
    clock: SharedClock,
}

impl PgFrontierRepository {
    pub fn new(pool: PgPool, config: FrontierConfig, clock: SharedClock) -> Self {
        Self {
            pool,
            config,
            clock,
        }
    }

    /// Stored settings of a job, for resuming it after a restart.
    pub async fn job(&self, job_id: JobId) -> Result<Option<JobConfig>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT id, max_pages, max_depth, source_lang, target_lang, tier FROM ingest_jobs WHERE id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(JobConfig::from))
    }

    fn domain_from_row(&self, row: DomainRow) -> DomainState {
        DomainState {
            domain: row.domain,
            crawl_delay: Duration::try_from_secs_f64(row.crawl_delay_seconds)
                .unwrap_or(self.config.default_crawl_delay),
            blocked_until: row.blocked_until,
            consecutive_errors: row.consecutive_errors.max(0) as u32,
            robots_txt: row.robots_txt,
            robots_txt_fetched_at: row.robots_txt_fetched_at,
            last_crawl_at: row.last_crawl_at,
        }
    }

    /// Locks the domain row, creating it with the default delay first.
    async fn lock_domain(&self, conn: &mut PgConnection, domain: &str) -> Result<DomainState, AppError> {
        sqlx::query(
            r#"
            INSERT INTO domain_state (domain, crawl_delay_seconds)
            VALUES ($1, $2)
            ON CONFLICT (domain) DO NOTHING
            "#,
        )
        .bind(domain)
        .bind(self.config.default_crawl_delay.as_secs_f64())
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

        let row = sqlx::query_as::<_, DomainRow>("SELECT * FROM domain_state WHERE domain = $1 FOR UPDATE")
            .bind(domain)
            .fetch_one(&mut *conn)
            .await
            .map_err(db_err)?;
        Ok(self.domain_from_row(row))
    }

    async fn save_domain(
        &self,
        conn: &mut PgConnection,
        state: &DomainState,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE domain_state
            SET crawl_delay_seconds = $2,
                blocked_until = $3,
                consecutive_errors = $4,
                robots_txt = $5,
                robots_txt_fetched_at = $6,
                last_crawl_at = $7,
                updated_at = $8
            WHERE domain = $1
            "#,
        )
        .bind(&state.domain)
        .bind(state.crawl_delay.as_secs_f64())
        .bind(state.blocked_until)
        .bind(i32::try_from(state.consecutive_errors).unwrap_or(i32::MAX))
        .bind(&state.robots_txt)
        .bind(state.robots_txt_fetched_at)
        .bind(state.last_crawl_at)
        .bind(now)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Applies `mutate` to the domain's state inside one transaction.
    async fn update_domain<M>(&self, domain: &str, mutate: M) -> Result<(), AppError>
    where
        M: FnOnce(&mut DomainState, DateTime<Utc>) + Send,
    {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut state = self.lock_domain(&mut tx, domain).await?;
        mutate(&mut state, now);
        self.save_domain(&mut tx, &state, now).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn ensure_job(&self, job_id: JobId) -> Result<(), AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM ingest_jobs WHERE id = $1)")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        if exists {
            Ok(())
        } else {
            Err(AppError::UnknownJob(job_id))
        }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    max_pages: i64,
    max_depth: i32,
    source_lang: Option<String>,
    target_lang: Option<String>,
    tier: Option<String>,
}

impl From<JobRow> for JobConfig {
    fn from(row: JobRow) -> Self {
        JobConfig {
            job_id: row.id,
            max_pages: row.max_pages.max(0) as u64,
            max_depth: row.max_depth.max(0) as u32,
            source_lang: row.source_lang,
            target_lang: row.target_lang,
            tier: row.tier.and_then(|t| t.parse::<Tier>().ok()),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FrontierRow {
    id: Uuid,
    seq: i64,
    job_id: Uuid,
    url: String,
    normalized_url: String,
    domain: String,
    priority: f64,
    depth: i32,
    status: String,
    parent_url: Option<String>,
    retry_count: i32,
    last_error: Option<String>,
    next_attempt_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FrontierRow> for FrontierEntry {
    fn from(row: FrontierRow) -> Self {
        FrontierEntry {
            id: row.id,
            job_id: row.job_id,
            url: row.url,
            normalized_url: row.normalized_url,
            domain: row.domain,
            priority: row.priority,
            depth: row.depth.max(0) as u32,
            status: row.status.parse().unwrap_or(EntryStatus::Pending),
            parent_url: row.parent_url,
            retry_count: row.retry_count.max(0) as u32,
            last_error: row.last_error,
            next_attempt_at: row.next_attempt_at,
            seq: row.seq,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DomainRow {
    domain: String,
    crawl_delay_seconds: f64,
    blocked_until: Option<DateTime<Utc>>,
    consecutive_errors: i32,
    robots_txt: Option<String>,
    robots_txt_fetched_at: Option<DateTime<Utc>>,
    last_crawl_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow)]
struct JobLimits {
    max_pages: i64,
    max_depth: i32,
    total_entries: i64,
}

impl FrontierStore for PgFrontierRepository {
    async fn register_job(&self, job: &JobConfig) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO ingest_jobs (id, max_pages, max_depth, source_lang, target_lang, tier, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            ON CONFLICT (id) DO UPDATE
            SET max_pages = EXCLUDED.max_pages,
                max_depth = EXCLUDED.max_depth,
                source_lang = EXCLUDED.source_lang,
                target_lang = EXCLUDED.target_lang,
                tier = EXCLUDED.tier,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(job.job_id)
        .bind(i64::try_from(job.max_pages).unwrap_or(i64::MAX))
        .bind(i32::try_from(job.max_depth).unwrap_or(i32::MAX))
        .bind(&job.source_lang)
        .bind(&job.target_lang)
        .bind(job.tier.map(|t| t.as_str()))
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn enqueue(&self, new: NewFrontierEntry) -> Result<EnqueueOutcome, AppError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // The job row lock serializes bound checks for the job.
        let limits = sqlx::query_as::<_, JobLimits>(
            "SELECT max_pages, max_depth, total_entries FROM ingest_jobs WHERE id = $1 FOR UPDATE",
        )
        .bind(new.job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or(AppError::UnknownJob(new.job_id))?;

        if i64::from(new.depth) > i64::from(limits.max_depth) {
            return Ok(EnqueueOutcome::TooDeep);
        }
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM frontier WHERE job_id = $1 AND normalized_url = $2)",
        )
        .bind(new.job_id)
        .bind(&new.normalized_url)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;
        if exists {
            return Ok(EnqueueOutcome::Duplicate);
        }
        if limits.total_entries >= limits.max_pages {
            return Ok(EnqueueOutcome::LimitReached);
        }

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO frontier (job_id, url, normalized_url, domain, priority, depth, parent_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (job_id, normalized_url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(new.job_id)
        .bind(&new.url)
        .bind(&new.normalized_url)
        .bind(&new.domain)
        .bind(new.priority)
        .bind(i32::try_from(new.depth).unwrap_or(i32::MAX))
        .bind(&new.parent_url)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(id) = inserted else {
            return Ok(EnqueueOutcome::Duplicate);
        };

        sqlx::query("UPDATE ingest_jobs SET total_entries = total_entries + 1, updated_at = $2 WHERE id = $1")
            .bind(new.job_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(EnqueueOutcome::Inserted(id))
    }

    async fn claim_next(&self, job_id: JobId) -> Result<Option<FrontierEntry>, AppError> {
        self.ensure_job(job_id).await?;

        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let mut contended: Vec<String> = Vec::new();

        for _ in 0..MAX_GATE_RETRIES {
            let candidate = sqlx::query_as::<_, FrontierRow>(
                r#"
                SELECT f.*
                FROM frontier f
                LEFT JOIN domain_state d ON d.domain = f.domain
                WHERE f.job_id = $1
                  AND f.status = 'pending'
                  AND NOT (f.domain = ANY($3))
                  AND (f.next_attempt_at IS NULL OR f.next_attempt_at <= $2)
                  AND (d.blocked_until IS NULL OR d.blocked_until <= $2)
                  AND (d.last_crawl_at IS NULL
                       OR d.last_crawl_at + make_interval(secs => d.crawl_delay_seconds) <= $2)
                ORDER BY f.priority DESC, f.depth ASC, f.seq ASC
                LIMIT 1
                FOR UPDATE OF f SKIP LOCKED
                "#,
            )
            .bind(job_id)
            .bind(now)
            .bind(&contended)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

            let Some(candidate) = candidate else {
                return Ok(None);
            };

            // Take the domain's crawl slot only if it is still free.
            let gated: Option<String> = sqlx::query_scalar(
                r#"
                INSERT INTO domain_state (domain, crawl_delay_seconds, last_crawl_at, updated_at)
                VALUES ($1, $2, $3, $3)
                ON CONFLICT (domain) DO UPDATE
                SET last_crawl_at = EXCLUDED.last_crawl_at,
                    updated_at = EXCLUDED.updated_at
                WHERE (domain_state.blocked_until IS NULL OR domain_state.blocked_until <= $3)
                  AND (domain_state.last_crawl_at IS NULL
                       OR domain_state.last_crawl_at
                          + make_interval(secs => domain_state.crawl_delay_seconds) <= $3)
                RETURNING domain
                "#,
            )
            .bind(&candidate.domain)
            .bind(self.config.default_crawl_delay.as_secs_f64())
            .bind(now)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

            if gated.is_none() {
                tracing::debug!(domain = %candidate.domain, "Domain claimed concurrently, trying another");
                contended.push(candidate.domain);
                continue;
            }

            let row = sqlx::query_as::<_, FrontierRow>(
                r#"
                UPDATE frontier
                SET status = 'processing', updated_at = $2
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(candidate.id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            tx.commit().await.map_err(db_err)?;

            let entry = FrontierEntry::from(row);
            tracing::debug!(
                job_id = %job_id,
                entry_id = %entry.id,
                domain = %entry.domain,
                "Claimed frontier entry"
            );
            return Ok(Some(entry));
        }

        Ok(None)
    }

    async fn complete(&self, entry: &FrontierEntry, outcome: &CompletionOutcome) -> Result<(), AppError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let stored = sqlx::query_as::<_, FrontierRow>("SELECT * FROM frontier WHERE id = $1 FOR UPDATE")
            .bind(entry.id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        let Some(stored) = stored.map(FrontierEntry::from) else {
            tracing::warn!(entry_id = %entry.id, "Completion for unknown frontier entry");
            return Ok(());
        };
        if stored.status != EntryStatus::Processing {
            tracing::warn!(
                entry_id = %entry.id,
                status = %stored.status,
                "Ignoring completion for entry not in processing"
            );
            return Ok(());
        }

        let mut retry_count = stored.retry_count;
        let mut next_attempt_at = stored.next_attempt_at;
        let (status, domain_success) = match outcome {
            CompletionOutcome::Done => (EntryStatus::Done, Some(true)),
            CompletionOutcome::Skipped { .. } => (EntryStatus::Done, None),
            CompletionOutcome::TransientFailure { .. } => {
                if retry_count < self.config.max_item_retries {
                    retry_count += 1;
                    next_attempt_at = Some(self.config.next_attempt_at(now, retry_count));
                    (EntryStatus::Pending, Some(false))
                } else {
                    (EntryStatus::Failed, Some(false))
                }
            }
            CompletionOutcome::PermanentFailure { .. } | CompletionOutcome::DeadLettered { .. } => {
                (EntryStatus::Failed, None)
            }
        };

        sqlx::query(
            r#"
            UPDATE frontier
            SET status = $2, retry_count = $3, last_error = $4, next_attempt_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(entry.id)
        .bind(status.as_str())
        .bind(i32::try_from(retry_count).unwrap_or(i32::MAX))
        .bind(outcome.message())
        .bind(next_attempt_at)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if let Some(success) = domain_success {
            let mut domain = self.lock_domain(&mut tx, &stored.domain).await?;
            if success {
                domain.record_success();
            } else {
                domain.record_failure(now, &self.config);
            }
            self.save_domain(&mut tx, &domain, now).await?;
        }

        tx.commit().await.map_err(db_err)?;

        tracing::debug!(
            entry_id = %entry.id,
            outcome = outcome.label(),
            status = %status,
            "Completed frontier entry"
        );
        Ok(())
    }

    async fn get_entry(&self, id: Uuid) -> Result<Option<FrontierEntry>, AppError> {
        let row = sqlx::query_as::<_, FrontierRow>("SELECT * FROM frontier WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(FrontierEntry::from))
    }

    async fn domain_state(&self, domain: &str) -> Result<Option<DomainState>, AppError> {
        let row = sqlx::query_as::<_, DomainRow>("SELECT * FROM domain_state WHERE domain = $1")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(|r| self.domain_from_row(r)))
    }

    async fn record_robots(
        &self,
        domain: &str,
        robots_txt: &str,
        crawl_delay: Option<Duration>,
    ) -> Result<(), AppError> {
        let config = &self.config;
        self.update_domain(domain, |state, now| {
            state.set_robots(robots_txt, now, crawl_delay, config)
        })
        .await
    }

    async fn adapt_crawl_delay(
        &self,
        domain: &str,
        response_time: Duration,
        floor: Duration,
    ) -> Result<(), AppError> {
        let config = &self.config;
        self.update_domain(domain, |state, _| {
            state.adapt_crawl_delay(response_time, floor, config)
        })
        .await
    }

    async fn requeue(&self, id: Uuid) -> Result<bool, AppError> {
        let requeued: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE frontier
            SET status = 'pending', retry_count = 0, next_attempt_at = NULL,
                last_error = NULL, updated_at = $2
            WHERE id = $1 AND status = 'failed'
            RETURNING job_id
            "#,
        )
        .bind(id)
        .bind(self.clock.now())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(job_id) = requeued {
            tracing::info!(entry_id = %id, %job_id, "Re-queued failed frontier entry");
        }
        Ok(requeued.is_some())
    }

    async fn release_processing(&self, job_id: JobId) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE frontier
            SET status = 'pending', updated_at = $2
            WHERE job_id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(self.clock.now())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        let released = result.rows_affected();
        if released > 0 {
            tracing::info!(job_id = %job_id, released, "Released processing entries");
        }
        Ok(released)
    }

    async fn status_counts(&self, job_id: JobId) -> Result<FrontierCounts, AppError> {
        self.ensure_job(job_id).await?;

        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM frontier WHERE job_id = $1 GROUP BY status",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut counts = FrontierCounts::default();
        for (status, n) in rows {
            let n = n.max(0) as u64;
            match status.parse::<EntryStatus>() {
                Ok(EntryStatus::Pending) => counts.pending = n,
                Ok(EntryStatus::Processing) => counts.processing = n,
                Ok(EntryStatus::Done) => counts.done = n,
                Ok(EntryStatus::Failed) => counts.failed = n,
                Err(e) => tracing::warn!(%job_id, error = %e, "Unexpected frontier status"),
            }
        }
        Ok(counts)
    }
}
