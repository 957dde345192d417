use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use subcrawl_core::error::AppError;
use subcrawl_core::models::Scope;
use subcrawl_core::run::{
    Batch, BatchItem, BatchStatus, ErrorStage, Run, RunFilter, RunStatus, Totals, UrlError,
};
use subcrawl_core::traits::RunStore;

/// Crawl runs, their batches and per-URL errors in PostgreSQL.
#[derive(Clone)]
pub struct RunRepository {
    pool: Pool<Postgres>,
}

impl RunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    status: String,
    scope_regions: Option<Vec<String>>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    discovered: i64,
    processed: i64,
    verified: i64,
    rejected: i64,
    errored: i64,
}

impl From<RunRow> for Run {
    fn from(row: RunRow) -> Self {
        Run {
            id: row.id,
            status: row.status.parse().unwrap_or(RunStatus::Failed),
            scope: Scope::from_region_list(row.scope_regions),
            started_at: row.started_at,
            finished_at: row.finished_at,
            totals: totals(
                row.discovered,
                row.processed,
                row.verified,
                row.rejected,
                row.errored,
            ),
        }
    }
}

#[derive(sqlx::FromRow)]
struct BatchRow {
    id: Uuid,
    run_id: Uuid,
    batch_number: i32,
    items: Json<Vec<BatchItem>>,
    status: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    discovered: i64,
    processed: i64,
    verified: i64,
    rejected: i64,
    errored: i64,
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Batch {
            id: row.id,
            run_id: row.run_id,
            batch_number: row.batch_number as u32,
            items: row.items.0,
            status: row.status.parse().unwrap_or(BatchStatus::Failed),
            started_at: row.started_at,
            finished_at: row.finished_at,
            totals: totals(
                row.discovered,
                row.processed,
                row.verified,
                row.rejected,
                row.errored,
            ),
        }
    }
}

#[derive(sqlx::FromRow)]
struct UrlErrorRow {
    run_id: Uuid,
    batch_id: Uuid,
    source_id: Uuid,
    url: String,
    stage: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl From<UrlErrorRow> for UrlError {
    fn from(row: UrlErrorRow) -> Self {
        UrlError {
            run_id: row.run_id,
            batch_id: row.batch_id,
            source_id: row.source_id,
            url: row.url,
            stage: row.stage.parse().unwrap_or(ErrorStage::Fetch),
            message: row.message,
            created_at: row.created_at,
        }
    }
}

fn totals(discovered: i64, processed: i64, verified: i64, rejected: i64, errored: i64) -> Totals {
    Totals {
        discovered: discovered as u64,
        processed: processed as u64,
        verified: verified as u64,
        rejected: rejected as u64,
        errored: errored as u64,
    }
}

const RUN_COLUMNS: &str = "id, status, scope_regions, started_at, finished_at, \
     discovered, processed, verified, rejected, errored";

const BATCH_COLUMNS: &str = "id, run_id, batch_number, items, status, started_at, finished_at, \
     discovered, processed, verified, rejected, errored";

impl RunStore for RunRepository {
    async fn create_run(&self, run: &Run, batches: &[Batch]) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO crawl_runs (id, status, scope_regions, started_at, finished_at,
                                    discovered, processed, verified, rejected, errored)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.scope.region_list().map(<[String]>::to_vec))
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.totals.discovered as i64)
        .bind(run.totals.processed as i64)
        .bind(run.totals.verified as i64)
        .bind(run.totals.rejected as i64)
        .bind(run.totals.errored as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        for batch in batches {
            sqlx::query(
                r#"
                INSERT INTO crawl_batches (id, run_id, batch_number, items, status, discovered)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(batch.id)
            .bind(batch.run_id)
            .bind(batch.batch_number as i32)
            .bind(Json(&batch.items))
            .bind(batch.status.as_str())
            .bind(batch.totals.discovered as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, AppError> {
        let row = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM crawl_runs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, AppError> {
        // LIMIT NULL means no limit.
        let rows = sqlx::query_as::<_, RunRow>(&format!(
            r#"
            SELECT {RUN_COLUMNS} FROM crawl_runs
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR scope_regions IS NULL OR $2 = ANY(scope_regions))
            ORDER BY started_at DESC
            LIMIT $3
            "#
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.region.as_deref())
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_runs SET status = $2, finished_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("run {id}")));
        }
        Ok(())
    }

    async fn update_run_totals(&self, id: Uuid, totals: &Totals) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_runs
            SET discovered = $2, processed = $3, verified = $4, rejected = $5, errored = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(totals.discovered as i64)
        .bind(totals.processed as i64)
        .bind(totals.verified as i64)
        .bind(totals.rejected as i64)
        .bind(totals.errored as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("run {id}")));
        }
        Ok(())
    }

    async fn list_batches(&self, run_id: Uuid) -> Result<Vec<Batch>, AppError> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM crawl_batches WHERE run_id = $1 ORDER BY batch_number"
        ))
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn save_batch_state(&self, batch: &Batch) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_batches
            SET status = $2, started_at = $3, finished_at = $4,
                discovered = $5, processed = $6, verified = $7, rejected = $8, errored = $9
            WHERE id = $1
            "#,
        )
        .bind(batch.id)
        .bind(batch.status.as_str())
        .bind(batch.started_at)
        .bind(batch.finished_at)
        .bind(batch.totals.discovered as i64)
        .bind(batch.totals.processed as i64)
        .bind(batch.totals.verified as i64)
        .bind(batch.totals.rejected as i64)
        .bind(batch.totals.errored as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("batch {}", batch.id)));
        }
        Ok(())
    }

    async fn record_url_error(&self, error: &UrlError) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO crawl_url_errors (run_id, batch_id, source_id, url, stage, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(error.run_id)
        .bind(error.batch_id)
        .bind(error.source_id)
        .bind(&error.url)
        .bind(error.stage.as_str())
        .bind(&error.message)
        .bind(error.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(())
    }

    async fn list_url_errors(&self, run_id: Uuid) -> Result<Vec<UrlError>, AppError> {
        let rows = sqlx::query_as::<_, UrlErrorRow>(
            r#"
            SELECT run_id, batch_id, source_id, url, stage, message, created_at
            FROM crawl_url_errors
            WHERE run_id = $1
            ORDER BY seq
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
