use sqlx::{PgPool, Pool, Postgres};

use driftnet_core::error::AppError;
use driftnet_core::fingerprint::simhash::{band_keys, hamming_distance};
use driftnet_core::fingerprint::{
    ContentFingerprint, ContentHash, FingerprintIndex, IndexKeys, NearMatch,
};

use crate::database::db_err;

/// PostgreSQL fingerprint index.
///
/// SimHashes are stored as `BIGINT` (bit-cast) next to their bands, so a
/// near lookup within `band_distance` is an indexed band join. Wider
/// lookups fall back to a `bit_count` scan.
#[derive(Clone)]
pub struct PgFingerprintRepository {
    pool: Pool<Postgres>,
    band_distance: u32,
}

impl PgFingerprintRepository {
    pub fn new(pool: PgPool, band_distance: u32) -> Self {
        Self {
            pool,
            band_distance,
        }
    }

    async fn band_candidates(&self, simhash: u64) -> Result<Vec<(String, i64)>, AppError> {
        let (bands, values): (Vec<i16>, Vec<i64>) = band_keys(simhash, self.band_distance)
            .into_iter()
            .map(|(band, value)| (i16::from(band), value as i64))
            .unzip();

        sqlx::query_as(
            r#"
            SELECT f.owner_id, f.simhash
            FROM fingerprints f
            WHERE f.content_hash IN (
                SELECT b.content_hash
                FROM fingerprint_bands b
                JOIN UNNEST($1::smallint[], $2::bigint[]) AS k(band, band_value)
                  ON b.band = k.band AND b.band_value = k.band_value
            )
            "#,
        )
        .bind(&bands)
        .bind(&values)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }
}

fn parse_hash(hex: &str) -> Option<ContentHash> {
    match ContentHash::from_hex(hex.trim()) {
        Ok(hash) => Some(hash),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping malformed stored hash");
            None
        }
    }
}

impl FingerprintIndex for PgFingerprintRepository {
    async fn find_exact(&self, hash: &ContentHash) -> Result<Option<String>, AppError> {
        sqlx::query_scalar("SELECT owner_id FROM fingerprints WHERE content_hash = $1")
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_near(&self, simhash: u64, max_distance: u32) -> Result<Option<NearMatch>, AppError> {
        if max_distance > self.band_distance {
            let row: Option<(String, i64, i64)> = sqlx::query_as(
                r#"
                SELECT owner_id, simhash, bit_count((simhash # $1)::bit(64)) AS distance
                FROM fingerprints
                WHERE bit_count((simhash # $1)::bit(64)) <= $2
                ORDER BY distance ASC
                LIMIT 1
                "#,
            )
            .bind(simhash as i64)
            .bind(i64::from(max_distance))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

            return Ok(row.map(|(owner_id, candidate, distance)| NearMatch {
                owner_id,
                simhash: candidate as u64,
                distance: distance as u32,
            }));
        }

        let best = self
            .band_candidates(simhash)
            .await?
            .into_iter()
            .filter_map(|(owner_id, candidate)| {
                let candidate = candidate as u64;
                let distance = hamming_distance(simhash, candidate);
                (distance <= max_distance).then_some(NearMatch {
                    owner_id,
                    simhash: candidate,
                    distance,
                })
            })
            .min_by_key(|m| m.distance);
        Ok(best)
    }

    async fn insert(&self, fingerprint: &ContentFingerprint) -> Result<bool, AppError> {
        let hash = fingerprint.content_hash.to_hex();
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO fingerprints (content_hash, simhash, owner_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (content_hash) DO NOTHING
            "#,
        )
        .bind(&hash)
        .bind(fingerprint.simhash as i64)
        .bind(&fingerprint.owner_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?
        .rows_affected()
            == 1;

        if !inserted {
            return Ok(false);
        }

        let (bands, values): (Vec<i16>, Vec<i64>) = band_keys(fingerprint.simhash, self.band_distance)
            .into_iter()
            .map(|(band, value)| (i16::from(band), value as i64))
            .unzip();

        sqlx::query(
            r#"
            INSERT INTO fingerprint_bands (band, band_value, content_hash)
            SELECT k.band, k.band_value, $3
            FROM UNNEST($1::smallint[], $2::bigint[]) AS k(band, band_value)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&bands)
        .bind(&values)
        .bind(&hash)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn find_url(&self, url_hash: &ContentHash) -> Result<Option<String>, AppError> {
        sqlx::query_scalar("SELECT owner_id FROM seen_urls WHERE url_hash = $1")
            .bind(url_hash.to_hex())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert_url(&self, url_hash: &ContentHash, owner_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT INTO seen_urls (url_hash, owner_id) VALUES ($1, $2) ON CONFLICT (url_hash) DO NOTHING",
        )
        .bind(url_hash.to_hex())
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_keys(&self) -> Result<IndexKeys, AppError> {
        let content: Vec<(String, i64)> =
            sqlx::query_as("SELECT content_hash, simhash FROM fingerprints")
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        let urls: Vec<String> = sqlx::query_scalar("SELECT url_hash FROM seen_urls")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(IndexKeys {
            content: content
                .iter()
                .filter_map(|(hex, simhash)| parse_hash(hex).map(|hash| (hash, *simhash as u64)))
                .collect(),
            urls: urls.iter().filter_map(|hex| parse_hash(hex)).collect(),
        })
    }
}
