use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use subcrawl_core::AppError;
use subcrawl_core::models::{
    Announcement, AnnouncementWrite, HealthRecord, NewLogEntry, Scope, Source,
    VerificationLogEntry,
};
use subcrawl_core::run::{Batch, Run, RunFilter, RunStatus, Totals, UrlError};
use subcrawl_core::stats::RegionCounters;
use subcrawl_core::traits::{AnnouncementStore, HealthStore, RunStore, SourceStore, StatsStore};

use crate::announcement_repository::AnnouncementRepository;
use crate::config::DatabaseConfig;
use crate::health_repository::HealthRepository;
use crate::run_repository::RunRepository;
use crate::source_repository::SourceRepository;
use crate::stats_repository::StatsRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// vends repository instances and implements every store trait by
/// delegating to them.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to connect: {e}")))?;
        tracing::debug!(max_connections = config.max_connections, "Database pool ready");

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        let migrator = sqlx::migrate!("../../migrations");
        migrator
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(format!("Migration failed: {e}")))?;
        tracing::info!(migrations = migrator.iter().count(), "Database schema up to date");
        Ok(())
    }

    /// Round-trip a trivial query to check connectivity.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Persistence(e.to_string()))?;
        Ok(())
    }

    pub fn source_repo(&self) -> SourceRepository {
        SourceRepository::new(self.pool.clone())
    }

    pub fn run_repo(&self) -> RunRepository {
        RunRepository::new(self.pool.clone())
    }

    pub fn announcement_repo(&self) -> AnnouncementRepository {
        AnnouncementRepository::new(self.pool.clone())
    }

    pub fn health_repo(&self) -> HealthRepository {
        HealthRepository::new(self.pool.clone())
    }

    pub fn stats_repo(&self) -> StatsRepository {
        StatsRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl SourceStore for Database {
    async fn insert_source(&self, region_name: &str, url: &str) -> Result<Source, AppError> {
        self.source_repo().insert_source(region_name, url).await
    }

    async fn deactivate_source(&self, id: Uuid) -> Result<Source, AppError> {
        self.source_repo().deactivate_source(id).await
    }

    async fn list_sources(
        &self,
        scope: &Scope,
        active_only: bool,
    ) -> Result<Vec<Source>, AppError> {
        self.source_repo().list_sources(scope, active_only).await
    }
}

impl RunStore for Database {
    async fn create_run(&self, run: &Run, batches: &[Batch]) -> Result<(), AppError> {
        self.run_repo().create_run(run, batches).await
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, AppError> {
        self.run_repo().get_run(id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, AppError> {
        self.run_repo().list_runs(filter).await
    }

    async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        self.run_repo()
            .update_run_status(id, status, finished_at)
            .await
    }

    async fn update_run_totals(&self, id: Uuid, totals: &Totals) -> Result<(), AppError> {
        self.run_repo().update_run_totals(id, totals).await
    }

    async fn list_batches(&self, run_id: Uuid) -> Result<Vec<Batch>, AppError> {
        self.run_repo().list_batches(run_id).await
    }

    async fn save_batch_state(&self, batch: &Batch) -> Result<(), AppError> {
        self.run_repo().save_batch_state(batch).await
    }

    async fn record_url_error(&self, error: &UrlError) -> Result<(), AppError> {
        self.run_repo().record_url_error(error).await
    }

    async fn list_url_errors(&self, run_id: Uuid) -> Result<Vec<UrlError>, AppError> {
        self.run_repo().list_url_errors(run_id).await
    }
}

impl AnnouncementStore for Database {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Announcement>, AppError> {
        self.announcement_repo().find_by_fingerprint(fingerprint).await
    }

    async fn get_announcement(&self, id: Uuid) -> Result<Option<Announcement>, AppError> {
        self.announcement_repo().get_announcement(id).await
    }

    async fn insert_announcement(
        &self,
        write: &AnnouncementWrite,
    ) -> Result<Announcement, AppError> {
        self.announcement_repo().insert_announcement(write).await
    }

    async fn update_announcement(
        &self,
        id: Uuid,
        write: &AnnouncementWrite,
    ) -> Result<Option<Announcement>, AppError> {
        self.announcement_repo().update_announcement(id, write).await
    }

    async fn append_log(&self, entry: &NewLogEntry) -> Result<VerificationLogEntry, AppError> {
        self.announcement_repo().append_log(entry).await
    }

    async fn list_log(
        &self,
        announcement_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<VerificationLogEntry>, AppError> {
        self.announcement_repo()
            .list_log(announcement_id, limit)
            .await
    }
}

impl HealthStore for Database {
    async fn load_health(&self, source_id: Uuid) -> Result<Option<HealthRecord>, AppError> {
        self.health_repo().load_health(source_id).await
    }

    async fn save_health(&self, record: &HealthRecord) -> Result<(), AppError> {
        self.health_repo().save_health(record).await
    }

    async fn list_health(&self) -> Result<Vec<HealthRecord>, AppError> {
        self.health_repo().list_health().await
    }
}

impl StatsStore for Database {
    async fn add_region_counters(
        &self,
        region_name: &str,
        delta: &RegionCounters,
    ) -> Result<(), AppError> {
        self.stats_repo()
            .add_region_counters(region_name, delta)
            .await
    }

    async fn list_region_counters(
        &self,
        region_name: Option<&str>,
    ) -> Result<Vec<(String, RegionCounters)>, AppError> {
        self.stats_repo().list_region_counters(region_name).await
    }
}
