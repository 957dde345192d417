use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::HealthThresholds;
use crate::error::AppError;
use crate::models::{HealthRecord, HealthStatus};
use crate::traits::HealthStore;

/// Tracks consecutive fetch failures per source.
///
/// Updates are serialized per source id only; different sources never wait
/// on each other.
#[derive(Clone)]
pub struct HealthMonitor<S> {
    store: S,
    thresholds: HealthThresholds,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl<S: HealthStore> HealthMonitor<S> {
    pub fn new(store: S, thresholds: HealthThresholds) -> Self {
        Self {
            store,
            thresholds,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn status_for(&self, consecutive_failures: u32) -> HealthStatus {
        if consecutive_failures >= self.thresholds.unhealthy_after {
            HealthStatus::Unhealthy
        } else if consecutive_failures >= self.thresholds.degraded_after {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    async fn source_lock(&self, source_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(source_id).or_default().clone()
    }

    async fn update<M>(&self, source_id: Uuid, mutate: M) -> Result<HealthRecord, AppError>
    where
        M: FnOnce(&mut HealthRecord),
    {
        let lock = self.source_lock(source_id).await;
        let _guard = lock.lock().await;

        let mut record = self
            .store
            .load_health(source_id)
            .await?
            .unwrap_or_else(|| HealthRecord::new(source_id));
        mutate(&mut record);
        record.status = self.status_for(record.consecutive_failures);
        self.store.save_health(&record).await?;
        Ok(record)
    }

    /// Reset the failure streak and mark the source healthy.
    pub async fn record_success(
        &self,
        source_id: Uuid,
        latency: Option<Duration>,
    ) -> Result<HealthRecord, AppError> {
        self.update(source_id, |record| {
            record.consecutive_failures = 0;
            record.total_attempts += 1;
            record.last_success_at = Some(Utc::now());
            if let Some(latency) = latency {
                record.last_latency_ms = Some(latency.as_millis() as u64);
            }
        })
        .await
    }

    /// Extend the failure streak; status follows the configured thresholds.
    pub async fn record_failure(
        &self,
        source_id: Uuid,
        error: &str,
        latency: Option<Duration>,
    ) -> Result<HealthRecord, AppError> {
        let record = self
            .update(source_id, |record| {
                record.consecutive_failures += 1;
                record.total_attempts += 1;
                record.total_failures += 1;
                record.last_failure_at = Some(Utc::now());
                record.last_error = Some(error.to_string());
                if let Some(latency) = latency {
                    record.last_latency_ms = Some(latency.as_millis() as u64);
                }
            })
            .await?;

        if record.status != HealthStatus::Healthy {
            tracing::warn!(
                %source_id,
                failures = record.consecutive_failures,
                status = %record.status,
                "Source health degraded"
            );
        }
        Ok(record)
    }

    pub async fn get(&self, source_id: Uuid) -> Result<Option<HealthRecord>, AppError> {
        self.store.load_health(source_id).await
    }

    pub async fn list_all(&self) -> Result<Vec<HealthRecord>, AppError> {
        self.store.list_health().await
    }

    /// Sources currently `unhealthy`. Does not deactivate anything.
    pub async fn list_unhealthy(&self) -> Result<Vec<HealthRecord>, AppError> {
        Ok(self
            .store
            .list_health()
            .await?
            .into_iter()
            .filter(|r| r.status == HealthStatus::Unhealthy)
            .collect())
    }
}
