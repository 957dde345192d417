use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use subcrawl_core::error::AppError;
use subcrawl_core::models::{
    Announcement, AnnouncementWrite, ApplicationPeriod, NewLogEntry, VerificationLogEntry,
    VerificationStatus, WriteDecision,
};
use subcrawl_core::traits::AnnouncementStore;

use crate::source_repository::is_unique_violation;

/// Announcements and the verification log in PostgreSQL.
///
/// The fingerprint column carries a unique constraint; inserts racing on the
/// same fingerprint surface as [`AppError::FingerprintConflict`] and updates
/// only apply while the stored confidence is not higher than the new one.
#[derive(Clone)]
pub struct AnnouncementRepository {
    pool: Pool<Postgres>,
}

impl AnnouncementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct AnnouncementRow {
    id: Uuid,
    region_name: String,
    title: String,
    content: String,
    application_start: Option<NaiveDate>,
    application_end: Option<NaiveDate>,
    budget_amount: Option<i64>,
    source_url: String,
    fingerprint: String,
    verification_status: String,
    ai_confidence: f64,
    raw_dates: Vec<String>,
    raw_budget_text: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AnnouncementRow> for Announcement {
    fn from(row: AnnouncementRow) -> Self {
        Announcement {
            id: row.id,
            region_name: row.region_name,
            title: row.title,
            content: row.content,
            application_period: ApplicationPeriod {
                start: row.application_start,
                end: row.application_end,
            },
            budget_amount: row.budget_amount,
            source_url: row.source_url,
            fingerprint: row.fingerprint,
            verification_status: row
                .verification_status
                .parse()
                .unwrap_or(VerificationStatus::Rejected),
            ai_confidence: row.ai_confidence,
            raw_dates: row.raw_dates,
            raw_budget_text: row.raw_budget_text,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    announcement_id: Option<Uuid>,
    run_id: Option<Uuid>,
    source_url: String,
    input_snippet: String,
    ai_result: serde_json::Value,
    confidence: f64,
    decision: String,
    created_at: DateTime<Utc>,
}

impl From<LogRow> for VerificationLogEntry {
    fn from(row: LogRow) -> Self {
        VerificationLogEntry {
            id: row.id,
            announcement_id: row.announcement_id,
            run_id: row.run_id,
            source_url: row.source_url,
            input_snippet: row.input_snippet,
            ai_result: row.ai_result,
            confidence: row.confidence,
            decision: row.decision.parse().unwrap_or(WriteDecision::Rejected),
            created_at: row.created_at,
        }
    }
}

const ANNOUNCEMENT_COLUMNS: &str = "id, region_name, title, content, application_start, \
     application_end, budget_amount, source_url, fingerprint, verification_status, \
     ai_confidence, raw_dates, raw_budget_text, created_at, updated_at";

const LOG_COLUMNS: &str = "id, announcement_id, run_id, source_url, input_snippet, ai_result, \
     confidence, decision, created_at";

impl AnnouncementStore for AnnouncementRepository {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Announcement>, AppError> {
        let row = sqlx::query_as::<_, AnnouncementRow>(&format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements WHERE fingerprint = $1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn get_announcement(&self, id: Uuid) -> Result<Option<Announcement>, AppError> {
        let row = sqlx::query_as::<_, AnnouncementRow>(&format!(
            "SELECT {ANNOUNCEMENT_COLUMNS} FROM announcements WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn insert_announcement(
        &self,
        write: &AnnouncementWrite,
    ) -> Result<Announcement, AppError> {
        let row = sqlx::query_as::<_, AnnouncementRow>(&format!(
            r#"
            INSERT INTO announcements (region_name, title, content, application_start,
                                       application_end, budget_amount, source_url, fingerprint,
                                       verification_status, ai_confidence, raw_dates,
                                       raw_budget_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {ANNOUNCEMENT_COLUMNS}
            "#
        ))
        .bind(&write.region_name)
        .bind(&write.title)
        .bind(&write.content)
        .bind(write.application_period.start)
        .bind(write.application_period.end)
        .bind(write.budget_amount)
        .bind(&write.source_url)
        .bind(&write.fingerprint)
        .bind(write.verification_status.as_str())
        .bind(write.ai_confidence)
        .bind(&write.raw_dates)
        .bind(&write.raw_budget_text)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::FingerprintConflict(write.fingerprint.clone())
            } else {
                AppError::Persistence(e.to_string())
            }
        })?;

        Ok(row.into())
    }

    async fn update_announcement(
        &self,
        id: Uuid,
        write: &AnnouncementWrite,
    ) -> Result<Option<Announcement>, AppError> {
        let row = sqlx::query_as::<_, AnnouncementRow>(&format!(
            r#"
            UPDATE announcements
            SET title = $2, content = $3, application_start = $4, application_end = $5,
                budget_amount = $6, source_url = $7, verification_status = $8,
                ai_confidence = $9, raw_dates = $10, raw_budget_text = $11, updated_at = NOW()
            WHERE id = $1 AND ai_confidence <= $9
            RETURNING {ANNOUNCEMENT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&write.title)
        .bind(&write.content)
        .bind(write.application_period.start)
        .bind(write.application_period.end)
        .bind(write.budget_amount)
        .bind(&write.source_url)
        .bind(write.verification_status.as_str())
        .bind(write.ai_confidence)
        .bind(&write.raw_dates)
        .bind(&write.raw_budget_text)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn append_log(&self, entry: &NewLogEntry) -> Result<VerificationLogEntry, AppError> {
        let row = sqlx::query_as::<_, LogRow>(&format!(
            r#"
            INSERT INTO verification_log (announcement_id, run_id, source_url, input_snippet,
                                          ai_result, confidence, decision)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {LOG_COLUMNS}
            "#
        ))
        .bind(entry.announcement_id)
        .bind(entry.run_id)
        .bind(&entry.source_url)
        .bind(&entry.input_snippet)
        .bind(&entry.ai_result)
        .bind(entry.confidence)
        .bind(entry.decision.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(row.into())
    }

    async fn list_log(
        &self,
        announcement_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<VerificationLogEntry>, AppError> {
        let rows = sqlx::query_as::<_, LogRow>(&format!(
            r#"
            SELECT {LOG_COLUMNS} FROM (
                SELECT {LOG_COLUMNS}, seq FROM verification_log
                WHERE ($1::uuid IS NULL OR announcement_id = $1)
                ORDER BY seq DESC
                LIMIT $2
            ) newest
            ORDER BY seq
            "#
        ))
        .bind(announcement_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Persistence(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
