use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{PipelineConfig, RetryPolicy, TitleFilter};
use crate::dedup::StoreWriter;
use crate::error::AppError;
use crate::fetch::{AttemptObserver, FetchAttempt, fetch_with_retry};
use crate::health::HealthMonitor;
use crate::models::{ApplicationPeriod, Verification, WriteDecision};
use crate::orchestrator::{RunEvent, RunReporter};
use crate::run::{Batch, BatchItem, BatchStatus, ErrorStage, Totals, UrlError};
use crate::stats::{RegionCounters, RunTally, UrlOutcome};
use crate::throttle::ThrottledFetcher;
use crate::traits::{Extractor, Fetcher, PipelineStore, Verifier};
use crate::verify::GatedVerifier;

/// What one URL contributed to its batch.
#[derive(Debug, Clone)]
struct UrlReport {
    region_name: String,
    outcome: UrlOutcome,
    latency_ms_total: u64,
    latency_samples: u64,
}

/// Result of processing one batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub totals: Totals,
    pub region_deltas: BTreeMap<String, RegionCounters>,
}

/// Records every fetch attempt against the source's health and keeps the
/// latency sum for region stats.
struct HealthObserver<'a, S> {
    health: &'a HealthMonitor<S>,
    source_id: Uuid,
    latency_ms_total: AtomicU64,
    latency_samples: AtomicU64,
}

impl<S: PipelineStore> AttemptObserver for HealthObserver<'_, S> {
    async fn on_attempt(&self, attempt: &FetchAttempt<'_>) {
        self.latency_ms_total
            .fetch_add(attempt.latency.as_millis() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);

        let result = match attempt.error {
            Some(e) => {
                self.health
                    .record_failure(self.source_id, &e.to_string(), Some(attempt.latency))
                    .await
            }
            None => {
                self.health
                    .record_success(self.source_id, Some(attempt.latency))
                    .await
            }
        };
        if let Err(e) = result {
            tracing::warn!(
                source_id = %self.source_id,
                error = %e,
                "Failed to record source health"
            );
        }
    }
}

/// Runs fetch, extract, verify and write for every URL of a batch.
#[derive(Clone)]
pub struct BatchProcessor<F, E, V, S> {
    fetcher: ThrottledFetcher<F>,
    extractor: E,
    verifier: GatedVerifier<V>,
    writer: StoreWriter<S>,
    health: HealthMonitor<S>,
    store: S,
    fetch_retry: RetryPolicy,
    url_concurrency: usize,
    title_filter: TitleFilter,
}

impl<F, E, V, S> BatchProcessor<F, E, V, S>
where
    F: Fetcher,
    E: Extractor,
    V: Verifier,
    S: PipelineStore,
{
    pub fn new(
        fetcher: F,
        extractor: E,
        verifier: V,
        store: S,
        health: HealthMonitor<S>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            fetcher: ThrottledFetcher::new(fetcher, config.politeness_interval),
            extractor,
            verifier: GatedVerifier::new(verifier, config.ai_concurrency, config.verify_retry),
            writer: StoreWriter::new(store.clone(), config.persist_retry),
            health,
            store,
            fetch_retry: config.fetch_retry,
            url_concurrency: config.url_concurrency.max(1),
            title_filter: config.title_filter.clone(),
        }
    }

    pub fn verifier(&self) -> &GatedVerifier<V> {
        &self.verifier
    }

    pub fn writer(&self) -> &StoreWriter<S> {
        &self.writer
    }

    /// Process every URL of `batch` with bounded concurrency.
    ///
    /// The cancellation token is checked before each URL is dispatched; URLs
    /// already in flight run to completion. A batch that skipped any URL
    /// ends `cancelled`, one that attempted all of them ends `done`.
    pub async fn process(
        &self,
        batch: &Batch,
        cancel: &CancellationToken,
        tally: &RunTally,
        reporter: &dyn RunReporter,
    ) -> BatchOutcome {
        let mut totals = Totals {
            discovered: batch.items.len() as u64,
            ..Default::default()
        };

        if let Err(e) = self.fetcher.preflight() {
            tracing::error!(batch_id = %batch.id, error = %e, "Batch could not be dispatched");
            return BatchOutcome {
                status: BatchStatus::Failed,
                totals,
                region_deltas: BTreeMap::new(),
            };
        }

        let reports: Vec<Option<UrlReport>> = stream::iter(batch.items.clone())
            .map(|item| async move {
                if cancel.is_cancelled() {
                    return None;
                }
                Some(self.process_url(batch, &item, tally, reporter).await)
            })
            .buffer_unordered(self.url_concurrency)
            .collect()
            .await;

        let mut region_deltas: BTreeMap<String, RegionCounters> = BTreeMap::new();
        let mut skipped = 0;
        for report in reports {
            let Some(report) = report else {
                skipped += 1;
                continue;
            };
            totals.processed += 1;
            match report.outcome {
                UrlOutcome::Verified => totals.verified += 1,
                UrlOutcome::Rejected => totals.rejected += 1,
                UrlOutcome::Errored => totals.errored += 1,
            }
            let delta = region_deltas.entry(report.region_name).or_default();
            delta.record(report.outcome);
            delta.latency_ms_total += report.latency_ms_total;
            delta.latency_samples += report.latency_samples;
        }

        let status = if skipped > 0 {
            BatchStatus::Cancelled
        } else {
            BatchStatus::Done
        };

        BatchOutcome {
            status,
            totals,
            region_deltas,
        }
    }

    async fn process_url(
        &self,
        batch: &Batch,
        item: &BatchItem,
        tally: &RunTally,
        reporter: &dyn RunReporter,
    ) -> UrlReport {
        let observer = HealthObserver {
            health: &self.health,
            source_id: item.source_id,
            latency_ms_total: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        };

        let outcome = match self.run_pipeline(batch.run_id, item, &observer).await {
            Ok(WriteDecision::Rejected) => UrlOutcome::Rejected,
            Ok(_) => UrlOutcome::Verified,
            Err((stage, e)) => {
                self.record_error(batch, item, stage, &e).await;
                UrlOutcome::Errored
            }
        };

        tally.record(outcome);
        reporter.report(RunEvent::UrlFinished {
            run_id: batch.run_id,
            url: &item.url,
            outcome,
        });

        UrlReport {
            region_name: item.region_name.clone(),
            outcome,
            latency_ms_total: observer.latency_ms_total.load(Ordering::Relaxed),
            latency_samples: observer.latency_samples.load(Ordering::Relaxed),
        }
    }

    async fn run_pipeline(
        &self,
        run_id: Uuid,
        item: &BatchItem,
        observer: &HealthObserver<'_, S>,
    ) -> Result<WriteDecision, (ErrorStage, AppError)> {
        let body = fetch_with_retry(&self.fetcher, &item.url, &self.fetch_retry, observer)
            .await
            .map_err(|e| (ErrorStage::Fetch, e))?;

        let candidate = self
            .extractor
            .extract(&item.url, &body)
            .map_err(|e| (ErrorStage::Parse, e))?;
        if candidate.is_empty() {
            return Err((
                ErrorStage::Parse,
                AppError::Parse(format!("empty candidate from {}", item.url)),
            ));
        }

        let verification = match self.title_filter.rejection(&candidate.title) {
            Some(reason) => {
                tracing::debug!(url = %item.url, %reason, "Candidate filtered before verification");
                filtered(reason)
            }
            None => self
                .verifier
                .verify(&candidate)
                .await
                .map_err(|e| (ErrorStage::Verify, e))?,
        };

        let outcome = self
            .writer
            .write(Some(run_id), &item.region_name, &candidate, &verification)
            .await
            .map_err(|e| (ErrorStage::Persist, e))?;

        tracing::debug!(
            url = %item.url,
            decision = %outcome.decision,
            confidence = verification.confidence,
            "Candidate written"
        );
        Ok(outcome.decision)
    }

    async fn record_error(&self, batch: &Batch, item: &BatchItem, stage: ErrorStage, e: &AppError) {
        tracing::warn!(
            run_id = %batch.run_id,
            url = %item.url,
            %stage,
            kind = %e.kind_label(),
            error = %e,
            "URL errored"
        );
        let record = UrlError {
            run_id: batch.run_id,
            batch_id: batch.id,
            source_id: item.source_id,
            url: item.url.clone(),
            stage,
            message: e.to_string(),
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.record_url_error(&record).await {
            tracing::error!(url = %item.url, error = %err, "Failed to record URL error");
        }
    }
}

/// Verdict recorded for a candidate the title filter turned away.
fn filtered(reason: String) -> Verification {
    Verification {
        is_valid: false,
        normalized_dates: ApplicationPeriod::default(),
        normalized_budget: None,
        confidence: 0.0,
        reasoning: reason,
        matched_criteria: Vec::new(),
    }
}
