use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    Announcement, AnnouncementWrite, Candidate, HealthRecord, NewLogEntry, Scope, Source,
    Verification, VerificationLogEntry,
};
use crate::run::{Batch, Run, RunFilter, RunStatus, Totals, UrlError};
use crate::stats::RegionCounters;

/// Fetches the raw body of a source page.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String, AppError>> + Send;

    /// Checks the fetcher is usable before a batch is dispatched.
    ///
    /// A failing preflight marks the batch `failed` without attempting any URL.
    fn preflight(&self) -> Result<(), AppError> {
        Ok(())
    }
}

/// Turns a fetched page into a candidate announcement.
///
/// Must fail with [`AppError::Parse`] rather than return an empty candidate.
pub trait Extractor: Send + Sync + Clone {
    fn extract(&self, source_url: &str, raw_body: &str) -> Result<Candidate, AppError>;
}

/// Validates and normalizes a candidate with an AI classifier.
pub trait Verifier: Send + Sync + Clone {
    fn verify(
        &self,
        candidate: &Candidate,
    ) -> impl Future<Output = Result<Verification, AppError>> + Send;
}

/// Registered crawl sources.
pub trait SourceStore: Send + Sync + Clone {
    /// Fails with [`AppError::DuplicateSource`] if an active source already
    /// has the same region and URL.
    fn insert_source(
        &self,
        region_name: &str,
        url: &str,
    ) -> impl Future<Output = Result<Source, AppError>> + Send;

    fn deactivate_source(&self, id: Uuid) -> impl Future<Output = Result<Source, AppError>> + Send;

    /// Sources matching `scope`, ordered by region then URL.
    fn list_sources(
        &self,
        scope: &Scope,
        active_only: bool,
    ) -> impl Future<Output = Result<Vec<Source>, AppError>> + Send;
}

/// Runs, their batches and the URLs that errored in them.
pub trait RunStore: Send + Sync + Clone {
    /// Persist a new run together with its batches.
    fn create_run(
        &self,
        run: &Run,
        batches: &[Batch],
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn get_run(&self, id: Uuid) -> impl Future<Output = Result<Option<Run>, AppError>> + Send;

    /// Runs matching `filter`, newest first.
    fn list_runs(
        &self,
        filter: &RunFilter,
    ) -> impl Future<Output = Result<Vec<Run>, AppError>> + Send;

    fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn update_run_totals(
        &self,
        id: Uuid,
        totals: &Totals,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Batches of a run, ordered by batch number.
    fn list_batches(
        &self,
        run_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Batch>, AppError>> + Send;

    /// Store the status, timestamps and totals of a batch.
    fn save_batch_state(&self, batch: &Batch) -> impl Future<Output = Result<(), AppError>> + Send;

    fn record_url_error(&self, error: &UrlError)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn list_url_errors(
        &self,
        run_id: Uuid,
    ) -> impl Future<Output = Result<Vec<UrlError>, AppError>> + Send;
}

/// Deduplicated announcements and their append-only verification log.
pub trait AnnouncementStore: Send + Sync + Clone {
    fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = Result<Option<Announcement>, AppError>> + Send;

    fn get_announcement(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<Announcement>, AppError>> + Send;

    /// Insert a new announcement. Fails with
    /// [`AppError::FingerprintConflict`] if the fingerprint is taken.
    fn insert_announcement(
        &self,
        write: &AnnouncementWrite,
    ) -> impl Future<Output = Result<Announcement, AppError>> + Send;

    /// Update an announcement in place, only while its stored confidence is
    /// not higher than the new one. Returns `None` if the guard did not hold.
    ///
    /// Region and fingerprint are never changed.
    fn update_announcement(
        &self,
        id: Uuid,
        write: &AnnouncementWrite,
    ) -> impl Future<Output = Result<Option<Announcement>, AppError>> + Send;

    fn append_log(
        &self,
        entry: &NewLogEntry,
    ) -> impl Future<Output = Result<VerificationLogEntry, AppError>> + Send;

    /// The newest `limit` log entries, oldest first, optionally for one
    /// announcement.
    fn list_log(
        &self,
        announcement_id: Option<Uuid>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<VerificationLogEntry>, AppError>> + Send;
}

/// Per-source fetch health records.
pub trait HealthStore: Send + Sync + Clone {
    fn load_health(
        &self,
        source_id: Uuid,
    ) -> impl Future<Output = Result<Option<HealthRecord>, AppError>> + Send;

    fn save_health(&self, record: &HealthRecord)
    -> impl Future<Output = Result<(), AppError>> + Send;

    fn list_health(&self) -> impl Future<Output = Result<Vec<HealthRecord>, AppError>> + Send;
}

/// Per-region counters summed across runs.
pub trait StatsStore: Send + Sync + Clone {
    /// Add `delta` to the stored counters of `region_name`.
    fn add_region_counters(
        &self,
        region_name: &str,
        delta: &RegionCounters,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn list_region_counters(
        &self,
        region_name: Option<&str>,
    ) -> impl Future<Output = Result<Vec<(String, RegionCounters)>, AppError>> + Send;
}

/// Everything the pipeline persists.
pub trait PipelineStore:
    SourceStore + RunStore + AnnouncementStore + HealthStore + StatsStore + 'static
{
}

impl<T> PipelineStore for T where
    T: SourceStore + RunStore + AnnouncementStore + HealthStore + StatsStore + 'static
{
}
