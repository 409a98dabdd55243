use driftnet_core::AppError;
use driftnet_core::clock::SharedClock;
use driftnet_core::frontier::FrontierConfig;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::DatabaseConfig;
use crate::dead_letter_repository::PgDeadLetterRepository;
use crate::document_repository::PgDocumentRepository;
use crate::fingerprint_repository::PgFingerprintRepository;
use crate::frontier_repository::PgFrontierRepository;

pub(crate) fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

/// Central database facade. Owns the connection pool, runs migrations,
/// and vends the Postgres-backed stores.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    pub fn frontier_repo(&self, config: FrontierConfig, clock: SharedClock) -> PgFrontierRepository {
        PgFrontierRepository::new(self.pool.clone(), config, clock)
    }

    /// `band_distance` must match the near-duplicate distance the index
    /// was populated with.
    pub fn fingerprint_repo(&self, band_distance: u32) -> PgFingerprintRepository {
        PgFingerprintRepository::new(self.pool.clone(), band_distance)
    }

    pub fn dead_letter_repo(&self) -> PgDeadLetterRepository {
        PgDeadLetterRepository::new(self.pool.clone())
    }

    pub fn document_repo(&self) -> PgDocumentRepository {
        PgDocumentRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
