use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use subcrawl_core::error::AppError;
use subcrawl_core::models::{HealthRecord, HealthStatus};
use subcrawl_core::traits::HealthStore;

/// Per-source fetch health in PostgreSQL.
#[derive(Clone)]
pub struct HealthRepository {
    pool: Pool<Postgres>,
}

impl HealthRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct HealthRow {
    source_id: Uuid,
    consecutive_failures: i32,
    total_attempts: i64,
    total_failures: i64,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_latency_ms: Option<i64>,
    status: String,
}

impl From<HealthRow> for HealthRecord {
    fn from(row: HealthRow) -> Self {
        HealthRecord {
            source_id: row.source_id,
            consecutive_failures: row.consecutive_failures as u32,
            total_attempts: row.total_attempts as u64,
            total_failures: row.total_failures as u64,
            last_success_at: row.last_success_at,
            last_failure_at: row.last_failure_at,
            last_error: row.last_error,
            last_latency_ms: row.last_latency_ms.map(|ms| ms as u64),
            status: row.status.parse().unwrap_or(HealthStatus::Healthy),
        }
    }
}

const HEALTH_COLUMNS: &str = "source_id, consecutive_failures, total_attempts, total_failures, \
     last_success_at, last_failure_at, last_error, last_latency_ms, status";

impl HealthStore for HealthRepository {
    async fn load_health(&self, source_id: Uuid) -> Result<Option<HealthRecord>, AppError> {
        let row = sqlx::query_as::<_, HealthRow>(&format!(
            "SELECT {HEALTH_COLUMNS} FROM source_health WHERE source_id = $1"
        ))
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn save_health(&self, record: &HealthRecord) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO source_health (source_id, consecutive_failures, total_attempts,
                                       total_failures, last_success_at, last_failure_at,
                                       last_error, last_latency_ms, status, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            ON CONFLICT (source_id) DO UPDATE SET
                consecutive_failures = EXCLUDED.consecutive_failures,
                total_attempts = EXCLUDED.total_attempts,
                total_failures = EXCLUDED.total_failures,
                last_success_at = EXCLUDED.last_success_at,
                last_failure_at = EXCLUDED.last_failure_at,
                last_error = EXCLUDED.last_error,
                last_latency_ms = EXCLUDED.last_latency_ms,
                status = EXCLUDED.status,
                updated_at = NOW()
            "#,
        )
        .bind(record.source_id)
        .bind(record.consecutive_failures as i32)
        .bind(record.total_attempts as i64)
        .bind(record.total_failures as i64)
        .bind(record.last_success_at)
        .bind(record.last_failure_at)
        .bind(&record.last_error)
        .bind(record.last_latency_ms.map(|ms| ms as i64))
        .bind(record.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn list_health(&self) -> Result<Vec<HealthRecord>, AppError> {
        let rows = sqlx::query_as::<_, HealthRow>(&format!(
            "SELECT {HEALTH_COLUMNS} FROM source_health ORDER BY consecutive_failures DESC, source_id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
