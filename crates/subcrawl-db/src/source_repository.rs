use chrono::{DateTime, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use subcrawl_core::error::AppError;
use subcrawl_core::models::{Scope, Source};
use subcrawl_core::traits::SourceStore;

/// Registered crawl sources in PostgreSQL.
#[derive(Clone)]
pub struct SourceRepository {
    pool: Pool<Postgres>,
}

impl SourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SourceRow {
    id: Uuid,
    region_name: String,
    url: String,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl From<SourceRow> for Source {
    fn from(row: SourceRow) -> Self {
        Source {
            id: row.id,
            region_name: row.region_name,
            url: row.url,
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

impl SourceStore for SourceRepository {
    async fn insert_source(&self, region_name: &str, url: &str) -> Result<Source, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            INSERT INTO sources (region_name, url)
            VALUES ($1, $2)
            RETURNING id, region_name, url, is_active, created_at
            "#,
        )
        .bind(region_name)
        .bind(url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::DuplicateSource {
                    region: region_name.to_string(),
                    url: url.to_string(),
                }
            } else {
                AppError::Persistence(e.to_string())
            }
        })?;

        Ok(row.into())
    }

    async fn deactivate_source(&self, id: Uuid) -> Result<Source, AppError> {
        let row = sqlx::query_as::<_, SourceRow>(
            r#"
            UPDATE sources SET is_active = FALSE
            WHERE id = $1
            RETURNING id, region_name, url, is_active, created_at
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        row.map(Into::into)
            .ok_or_else(|| AppError::NotFound(format!("source {id}")))
    }

    async fn list_sources(
        &self,
        scope: &Scope,
        active_only: bool,
    ) -> Result<Vec<Source>, AppError> {
        let rows = sqlx::query_as::<_, SourceRow>(
            r#"
            SELECT id, region_name, url, is_active, created_at
            FROM sources
            WHERE ($1::text[] IS NULL OR region_name = ANY($1))
              AND (NOT $2 OR is_active)
            ORDER BY region_name, url, created_at
            "#,
        )
        .bind(scope.region_list().map(<[String]>::to_vec))
        .bind(active_only)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
