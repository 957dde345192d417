use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use subcrawl_core::reanalyze::ReanalysisOutcome;
use subcrawl_core::run::{Batch, Run, Totals, UrlError};
use subcrawl_core::{
    Announcement, HealthRecord, RegionStats, RunDetail, Source, VerificationLogEntry,
};

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct StartRunRequest {
    /// Regions to crawl. Omitted or empty means every region.
    #[serde(default)]
    pub regions: Option<Vec<String>>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StartRunResponse {
    pub run_id: Uuid,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Copy, Serialize, utoipa::ToSchema)]
pub struct TotalsResponse {
    pub discovered: u64,
    pub processed: u64,
    pub verified: u64,
    pub rejected: u64,
    pub errored: u64,
}

impl From<Totals> for TotalsResponse {
    fn from(t: Totals) -> Self {
        Self {
            discovered: t.discovered,
            processed: t.processed,
            verified: t.verified,
            rejected: t.rejected,
            errored: t.errored,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunResponse {
    pub id: Uuid,
    pub status: String,
    /// Regions in scope; null means every region.
    pub regions: Option<Vec<String>>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub totals: TotalsResponse,
}

impl From<Run> for RunResponse {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            status: run.status.to_string(),
            regions: run.scope.region_list().map(<[String]>::to_vec),
            started_at: run.started_at,
            finished_at: run.finished_at,
            totals: run.totals.into(),
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListRunsQuery {
    pub status: Option<String>,
    pub region: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunListResponse {
    pub runs: Vec<RunResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchResponse {
    pub id: Uuid,
    pub run_id: Uuid,
    pub batch_number: u32,
    pub status: String,
    pub urls: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub totals: TotalsResponse,
}

impl From<Batch> for BatchResponse {
    fn from(batch: Batch) -> Self {
        Self {
            id: batch.id,
            run_id: batch.run_id,
            batch_number: batch.batch_number,
            status: batch.status.to_string(),
            urls: batch.items.into_iter().map(|item| item.url).collect(),
            started_at: batch.started_at,
            finished_at: batch.finished_at,
            totals: batch.totals.into(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchListResponse {
    pub batches: Vec<BatchResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UrlErrorResponse {
    pub batch_id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    pub stage: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<UrlError> for UrlErrorResponse {
    fn from(e: UrlError) -> Self {
        Self {
            batch_id: e.batch_id,
            source_id: e.source_id,
            url: e.url,
            stage: e.stage.to_string(),
            message: e.message,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunDetailResponse {
    pub run: RunResponse,
    pub batches: Vec<BatchResponse>,
    pub url_errors: Vec<UrlErrorResponse>,
    /// Current health of each source that errored in this run.
    pub errored_sources: Vec<SourceHealthResponse>,
}

impl From<RunDetail> for RunDetailResponse {
    fn from(detail: RunDetail) -> Self {
        Self {
            run: detail.run.into(),
            batches: detail.batches.into_iter().map(Into::into).collect(),
            url_errors: detail.url_errors.into_iter().map(Into::into).collect(),
            errored_sources: detail.errored_sources.into_iter().map(Into::into).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceHealthResponse {
    pub source_id: Uuid,
    pub status: String,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
}

impl From<HealthRecord> for SourceHealthResponse {
    fn from(r: HealthRecord) -> Self {
        Self {
            source_id: r.source_id,
            status: r.status.to_string(),
            consecutive_failures: r.consecutive_failures,
            total_attempts: r.total_attempts,
            total_failures: r.total_failures,
            last_success_at: r.last_success_at,
            last_failure_at: r.last_failure_at,
            last_error: r.last_error,
            last_latency_ms: r.last_latency_ms,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct UrlHealthQuery {
    pub unhealthy_only: Option<bool>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct UrlHealthListResponse {
    pub sources: Vec<SourceHealthResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct StatsQuery {
    pub region: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RegionStatsResponse {
    pub region_name: String,
    pub runs: u64,
    pub processed: u64,
    pub verified: u64,
    pub rejected: u64,
    pub errored: u64,
    pub success_rate: f64,
    pub avg_latency_ms: Option<u64>,
    /// `healthy`, `warning` or `critical`.
    pub health: String,
}

impl From<RegionStats> for RegionStatsResponse {
    fn from(s: RegionStats) -> Self {
        Self {
            region_name: s.region_name,
            runs: s.counters.runs,
            processed: s.counters.processed,
            verified: s.counters.verified,
            rejected: s.counters.rejected,
            errored: s.counters.errored,
            success_rate: s.success_rate,
            avg_latency_ms: s.avg_latency_ms,
            health: s.health.as_str().to_string(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RegionStatsListResponse {
    pub regions: Vec<RegionStatsResponse>,
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterSourceRequest {
    pub region_name: String,
    pub url: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceResponse {
    pub id: Uuid,
    pub region_name: String,
    pub url: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Source> for SourceResponse {
    fn from(s: Source) -> Self {
        Self {
            id: s.id,
            region_name: s.region_name,
            url: s.url,
            is_active: s.is_active,
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct SourcesQuery {
    /// Comma-separated region names; omitted means every region.
    pub region: Option<String>,
    pub include_inactive: Option<bool>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SourceListResponse {
    pub sources: Vec<SourceResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Announcements and verification log
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AnnouncementResponse {
    pub id: Uuid,
    pub region_name: String,
    pub title: String,
    pub application_start: Option<NaiveDate>,
    pub application_end: Option<NaiveDate>,
    pub budget_amount: Option<i64>,
    pub source_url: String,
    pub verification_status: String,
    pub ai_confidence: f64,
    pub raw_dates: Vec<String>,
    pub raw_budget_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Announcement> for AnnouncementResponse {
    fn from(a: Announcement) -> Self {
        Self {
            id: a.id,
            region_name: a.region_name,
            title: a.title,
            application_start: a.application_period.start,
            application_end: a.application_period.end,
            budget_amount: a.budget_amount,
            source_url: a.source_url,
            verification_status: a.verification_status.to_string(),
            ai_confidence: a.ai_confidence,
            raw_dates: a.raw_dates,
            raw_budget_text: a.raw_budget_text,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ReanalyzeResponse {
    pub decision: String,
    pub changed: bool,
    pub announcement: AnnouncementResponse,
    pub log_entry_id: Uuid,
}

impl From<ReanalysisOutcome> for ReanalyzeResponse {
    fn from(outcome: ReanalysisOutcome) -> Self {
        Self {
            decision: outcome.decision.to_string(),
            changed: outcome.changed(),
            announcement: outcome.announcement.into(),
            log_entry_id: outcome.log_entry_id,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct VerificationLogQuery {
    pub announcement_id: Option<Uuid>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LogEntryResponse {
    pub id: Uuid,
    pub announcement_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub source_url: String,
    pub input_snippet: String,
    pub ai_result: serde_json::Value,
    pub confidence: f64,
    pub decision: String,
    pub created_at: DateTime<Utc>,
}

impl From<VerificationLogEntry> for LogEntryResponse {
    fn from(e: VerificationLogEntry) -> Self {
        Self {
            id: e.id,
            announcement_id: e.announcement_id,
            run_id: e.run_id,
            source_url: e.source_url,
            input_snippet: e.input_snippet,
            ai_result: e.ai_result,
            confidence: e.confidence,
            decision: e.decision.to_string(),
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct VerificationLogResponse {
    pub entries: Vec<LogEntryResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Common
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
