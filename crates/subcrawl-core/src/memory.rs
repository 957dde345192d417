//! In-process store implementing every storage trait.
//!
//! Used by unit tests and by embedders that do not need durability. The
//! fingerprint index behaves like a unique constraint, and announcement
//! updates are guarded by confidence exactly like the SQL store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{
    Announcement, AnnouncementWrite, HealthRecord, NewLogEntry, Scope, Source,
    VerificationLogEntry,
};
use crate::run::{Batch, Run, RunFilter, RunStatus, Totals, UrlError};
use crate::stats::RegionCounters;
use crate::traits::{AnnouncementStore, HealthStore, RunStore, SourceStore, StatsStore};

#[derive(Default)]
struct State {
    sources: Vec<Source>,
    runs: HashMap<Uuid, Run>,
    batches: HashMap<Uuid, Vec<Batch>>,
    url_errors: Vec<UrlError>,
    announcements: HashMap<Uuid, Announcement>,
    fingerprints: HashMap<String, Uuid>,
    log: Vec<VerificationLogEntry>,
    health: HashMap<Uuid, HealthRecord>,
    regions: BTreeMap<String, RegionCounters>,
    failing_writes: u32,
}

impl State {
    fn injected_failure(&mut self) -> Result<(), AppError> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(AppError::Persistence("injected write failure".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` announcement writes fail with a persistence error.
    pub async fn fail_next_writes(&self, n: u32) {
        self.state.lock().await.failing_writes = n;
    }

    /// Every stored announcement, oldest first.
    pub async fn all_announcements(&self) -> Vec<Announcement> {
        let state = self.state.lock().await;
        let mut all: Vec<Announcement> = state.announcements.values().cloned().collect();
        all.sort_by_key(|a| a.created_at);
        all
    }
}

fn apply_write(announcement: &mut Announcement, write: &AnnouncementWrite, now: DateTime<Utc>) {
    announcement.title = write.title.clone();
    announcement.content = write.content.clone();
    announcement.application_period = write.application_period;
    announcement.budget_amount = write.budget_amount;
    announcement.source_url = write.source_url.clone();
    announcement.verification_status = write.verification_status;
    announcement.ai_confidence = write.ai_confidence;
    announcement.raw_dates = write.raw_dates.clone();
    announcement.raw_budget_text = write.raw_budget_text.clone();
    announcement.updated_at = now;
}

impl SourceStore for MemoryStore {
    async fn insert_source(&self, region_name: &str, url: &str) -> Result<Source, AppError> {
        let mut state = self.state.lock().await;
        if state
            .sources
            .iter()
            .any(|s| s.is_active && s.region_name == region_name && s.url == url)
        {
            return Err(AppError::DuplicateSource {
                region: region_name.to_string(),
                url: url.to_string(),
            });
        }
        let source = Source {
            id: Uuid::new_v4(),
            region_name: region_name.to_string(),
            url: url.to_string(),
            is_active: true,
            created_at: Utc::now(),
        };
        state.sources.push(source.clone());
        Ok(source)
    }

    async fn deactivate_source(&self, id: Uuid) -> Result<Source, AppError> {
        let mut state = self.state.lock().await;
        let source = state
            .sources
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| AppError::NotFound(format!("source {id}")))?;
        source.is_active = false;
        Ok(source.clone())
    }

    async fn list_sources(
        &self,
        scope: &Scope,
        active_only: bool,
    ) -> Result<Vec<Source>, AppError> {
        let state = self.state.lock().await;
        let mut sources: Vec<Source> = state
            .sources
            .iter()
            .filter(|s| (!active_only || s.is_active) && scope.matches(&s.region_name))
            .cloned()
            .collect();
        sources.sort_by(|a, b| {
            (&a.region_name, &a.url, a.created_at).cmp(&(&b.region_name, &b.url, b.created_at))
        });
        Ok(sources)
    }
}

impl RunStore for MemoryStore {
    async fn create_run(&self, run: &Run, batches: &[Batch]) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        state.runs.insert(run.id, run.clone());
        state.batches.insert(run.id, batches.to_vec());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, AppError> {
        Ok(self.state.lock().await.runs.get(&id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, AppError> {
        let state = self.state.lock().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn update_run_status(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("run {id}")))?;
        run.status = status;
        run.finished_at = finished_at;
        Ok(())
    }

    async fn update_run_totals(&self, id: Uuid, totals: &Totals) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("run {id}")))?;
        run.totals = *totals;
        Ok(())
    }

    async fn list_batches(&self, run_id: Uuid) -> Result<Vec<Batch>, AppError> {
        let state = self.state.lock().await;
        let mut batches = state.batches.get(&run_id).cloned().unwrap_or_default();
        batches.sort_by_key(|b| b.batch_number);
        Ok(batches)
    }

    async fn save_batch_state(&self, batch: &Batch) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let stored = state
            .batches
            .get_mut(&batch.run_id)
            .and_then(|batches| batches.iter_mut().find(|b| b.id == batch.id))
            .ok_or_else(|| AppError::NotFound(format!("batch {}", batch.id)))?;
        stored.status = batch.status;
        stored.started_at = batch.started_at;
        stored.finished_at = batch.finished_at;
        stored.totals = batch.totals;
        Ok(())
    }

    async fn record_url_error(&self, error: &UrlError) -> Result<(), AppError> {
        self.state.lock().await.url_errors.push(error.clone());
        Ok(())
    }

    async fn list_url_errors(&self, run_id: Uuid) -> Result<Vec<UrlError>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .url_errors
            .iter()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect())
    }
}

impl AnnouncementStore for MemoryStore {
    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Announcement>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .fingerprints
            .get(fingerprint)
            .and_then(|id| state.announcements.get(id))
            .cloned())
    }

    async fn get_announcement(&self, id: Uuid) -> Result<Option<Announcement>, AppError> {
        Ok(self.state.lock().await.announcements.get(&id).cloned())
    }

    async fn insert_announcement(
        &self,
        write: &AnnouncementWrite,
    ) -> Result<Announcement, AppError> {
        let mut state = self.state.lock().await;
        state.injected_failure()?;
        if state.fingerprints.contains_key(&write.fingerprint) {
            return Err(AppError::FingerprintConflict(write.fingerprint.clone()));
        }
        let now = Utc::now();
        let mut announcement = Announcement {
            id: Uuid::new_v4(),
            region_name: write.region_name.clone(),
            title: String::new(),
            content: String::new(),
            application_period: Default::default(),
            budget_amount: None,
            source_url: String::new(),
            fingerprint: write.fingerprint.clone(),
            verification_status: write.verification_status,
            ai_confidence: 0.0,
            raw_dates: Vec::new(),
            raw_budget_text: None,
            created_at: now,
            updated_at: now,
        };
        apply_write(&mut announcement, write, now);
        state
            .fingerprints
            .insert(write.fingerprint.clone(), announcement.id);
        state.announcements.insert(announcement.id, announcement.clone());
        Ok(announcement)
    }

    async fn update_announcement(
        &self,
        id: Uuid,
        write: &AnnouncementWrite,
    ) -> Result<Option<Announcement>, AppError> {
        let mut state = self.state.lock().await;
        state.injected_failure()?;
        let Some(announcement) = state.announcements.get_mut(&id) else {
            return Ok(None);
        };
        if announcement.ai_confidence > write.ai_confidence {
            return Ok(None);
        }
        apply_write(announcement, write, Utc::now());
        Ok(Some(announcement.clone()))
    }

    async fn append_log(&self, entry: &NewLogEntry) -> Result<VerificationLogEntry, AppError> {
        let mut state = self.state.lock().await;
        let stored = VerificationLogEntry {
            id: Uuid::new_v4(),
            announcement_id: entry.announcement_id,
            run_id: entry.run_id,
            source_url: entry.source_url.clone(),
            input_snippet: entry.input_snippet.clone(),
            ai_result: entry.ai_result.clone(),
            confidence: entry.confidence,
            decision: entry.decision,
            created_at: Utc::now(),
        };
        state.log.push(stored.clone());
        Ok(stored)
    }

    async fn list_log(
        &self,
        announcement_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<VerificationLogEntry>, AppError> {
        let state = self.state.lock().await;
        let matching: Vec<&VerificationLogEntry> = state
            .log
            .iter()
            .filter(|e| announcement_id.is_none() || e.announcement_id == announcement_id)
            .collect();
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.into_iter().skip(skip).cloned().collect())
    }
}

impl HealthStore for MemoryStore {
    async fn load_health(&self, source_id: Uuid) -> Result<Option<HealthRecord>, AppError> {
        Ok(self.state.lock().await.health.get(&source_id).cloned())
    }

    async fn save_health(&self, record: &HealthRecord) -> Result<(), AppError> {
        self.state
            .lock()
            .await
            .health
            .insert(record.source_id, record.clone());
        Ok(())
    }

    async fn list_health(&self) -> Result<Vec<HealthRecord>, AppError> {
        let state = self.state.lock().await;
        let mut records: Vec<HealthRecord> = state.health.values().cloned().collect();
        records.sort_by(|a, b| {
            b.consecutive_failures
                .cmp(&a.consecutive_failures)
                .then_with(|| a.source_id.cmp(&b.source_id))
        });
        Ok(records)
    }
}

impl StatsStore for MemoryStore {
    async fn add_region_counters(
        &self,
        region_name: &str,
        delta: &RegionCounters,
    ) -> Result<(), AppError> {
        self.state
            .lock()
            .await
            .regions
            .entry(region_name.to_string())
            .or_default()
            .add(delta);
        Ok(())
    }

    async fn list_region_counters(
        &self,
        region_name: Option<&str>,
    ) -> Result<Vec<(String, RegionCounters)>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .regions
            .iter()
            .filter(|(name, _)| region_name.is_none_or(|r| r == name.as_str()))
            .map(|(name, counters)| (name.clone(), *counters))
            .collect())
    }
}
