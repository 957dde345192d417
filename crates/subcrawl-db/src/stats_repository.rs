use sqlx::{PgPool, Pool, Postgres};

use subcrawl_core::error::AppError;
use subcrawl_core::stats::RegionCounters;
use subcrawl_core::traits::StatsStore;

/// Per-region counters in PostgreSQL. Deltas are added in a single upsert so
/// concurrent flushes never lose increments.
#[derive(Clone)]
pub struct StatsRepository {
    pool: Pool<Postgres>,
}

impl StatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RegionRow {
    region_name: String,
    runs: i64,
    processed: i64,
    verified: i64,
    rejected: i64,
    errored: i64,
    latency_ms_total: i64,
    latency_samples: i64,
}

impl From<RegionRow> for (String, RegionCounters) {
    fn from(row: RegionRow) -> Self {
        (
            row.region_name,
            RegionCounters {
                runs: row.runs as u64,
                processed: row.processed as u64,
                verified: row.verified as u64,
                rejected: row.rejected as u64,
                errored: row.errored as u64,
                latency_ms_total: row.latency_ms_total as u64,
                latency_samples: row.latency_samples as u64,
            },
        )
    }
}

impl StatsStore for StatsRepository {
    async fn add_region_counters(
        &self,
        region_name: &str,
        delta: &RegionCounters,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO region_stats (region_name, runs, processed, verified, rejected, errored,
                                      latency_ms_total, latency_samples, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (region_name) DO UPDATE SET
                runs = region_stats.runs + EXCLUDED.runs,
                processed = region_stats.processed + EXCLUDED.processed,
                verified = region_stats.verified + EXCLUDED.verified,
                rejected = region_stats.rejected + EXCLUDED.rejected,
                errored = region_stats.errored + EXCLUDED.errored,
                latency_ms_total = region_stats.latency_ms_total + EXCLUDED.latency_ms_total,
                latency_samples = region_stats.latency_samples + EXCLUDED.latency_samples,
                updated_at = NOW()
            "#,
        )
        .bind(region_name)
        .bind(delta.runs as i64)
        .bind(delta.processed as i64)
        .bind(delta.verified as i64)
        .bind(delta.rejected as i64)
        .bind(delta.errored as i64)
        .bind(delta.latency_ms_total as i64)
        .bind(delta.latency_samples as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn list_region_counters(
        &self,
        region_name: Option<&str>,
    ) -> Result<Vec<(String, RegionCounters)>, AppError> {
        let rows = sqlx::query_as::<_, RegionRow>(
            r#"
            SELECT region_name, runs, processed, verified, rejected, errored,
                   latency_ms_total, latency_samples
            FROM region_stats
            WHERE ($1::text IS NULL OR region_name = $1)
            ORDER BY region_name
            "#,
        )
        .bind(region_name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
