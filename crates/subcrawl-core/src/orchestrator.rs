use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::batch::BatchProcessor;
use crate::config::PipelineConfig;
use crate::error::AppError;
use crate::health::HealthMonitor;
use crate::models::{HealthRecord, Scope, Source, VerificationLogEntry};
use crate::reanalyze::{ReanalysisOutcome, Reanalyzer};
use crate::registry::SourceRegistry;
use crate::run::{Batch, BatchStatus, Run, RunFilter, RunStatus, Totals, UrlError, partition};
use crate::stats::{RegionStats, RunTally, StatsAggregator, UrlOutcome};
use crate::traits::{Extractor, Fetcher, PipelineStore, RunStore, Verifier};

/// Events emitted while a run executes, for monitoring/logging.
#[derive(Debug, Clone)]
pub enum RunEvent<'a> {
    RunStarted {
        run_id: Uuid,
        scope: &'a Scope,
        sources: usize,
        batches: usize,
    },
    BatchStarted {
        run_id: Uuid,
        batch_number: u32,
        size: usize,
    },
    UrlFinished {
        run_id: Uuid,
        url: &'a str,
        outcome: UrlOutcome,
    },
    BatchFinished {
        run_id: Uuid,
        batch_number: u32,
        status: BatchStatus,
        totals: &'a Totals,
    },
    CancelRequested {
        run_id: Uuid,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        totals: &'a Totals,
    },
}

/// Trait for receiving run events (decoupled logging).
pub trait RunReporter: Send + Sync {
    fn report(&self, event: RunEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRunReporter;

impl RunReporter for TracingRunReporter {
    fn report(&self, event: RunEvent<'_>) {
        match event {
            RunEvent::RunStarted {
                run_id,
                scope,
                sources,
                batches,
            } => {
                tracing::info!(%run_id, %scope, sources, batches, "Run started");
            }
            RunEvent::BatchStarted {
                run_id,
                batch_number,
                size,
            } => {
                tracing::info!(%run_id, batch_number, size, "Batch started");
            }
            RunEvent::UrlFinished {
                run_id,
                url,
                outcome,
            } => {
                tracing::debug!(%run_id, %url, ?outcome, "URL finished");
            }
            RunEvent::BatchFinished {
                run_id,
                batch_number,
                status,
                totals,
            } => {
                tracing::info!(
                    %run_id,
                    batch_number,
                    %status,
                    processed = totals.processed,
                    verified = totals.verified,
                    rejected = totals.rejected,
                    errored = totals.errored,
                    "Batch finished"
                );
            }
            RunEvent::CancelRequested { run_id } => {
                tracing::info!(%run_id, "Run cancellation requested");
            }
            RunEvent::RunFinished {
                run_id,
                status,
                totals,
            } => {
                tracing::info!(
                    %run_id,
                    %status,
                    discovered = totals.discovered,
                    verified = totals.verified,
                    rejected = totals.rejected,
                    errored = totals.errored,
                    "Run finished"
                );
            }
        }
    }
}

/// A run with everything the dashboard shows for it.
#[derive(Debug, Clone, Serialize)]
pub struct RunDetail {
    pub run: Run,
    pub batches: Vec<Batch>,
    pub url_errors: Vec<UrlError>,
    /// Current health of every source that errored in this run.
    pub errored_sources: Vec<HealthRecord>,
}

#[derive(Clone)]
struct ActiveRun {
    scope: Scope,
    cancel: CancellationToken,
    done: CancellationToken,
    tally: RunTally,
}

struct Inner<F, E, V, S> {
    store: S,
    registry: SourceRegistry<S>,
    health: HealthMonitor<S>,
    stats: StatsAggregator<S>,
    processor: BatchProcessor<F, E, V, S>,
    reanalyzer: Reanalyzer<V, S>,
    config: PipelineConfig,
    active: Mutex<HashMap<Uuid, ActiveRun>>,
    reporter: Arc<dyn RunReporter>,
}

/// Creates runs, schedules their batches and owns the run state machine.
pub struct Orchestrator<F, E, V, S> {
    inner: Arc<Inner<F, E, V, S>>,
}

impl<F, E, V, S> Clone for Orchestrator<F, E, V, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F, E, V, S> Orchestrator<F, E, V, S>
where
    F: Fetcher + 'static,
    E: Extractor + 'static,
    V: Verifier + 'static,
    S: PipelineStore,
{
    pub fn new(
        fetcher: F,
        extractor: E,
        verifier: V,
        store: S,
        config: PipelineConfig,
        reporter: Arc<dyn RunReporter>,
    ) -> Self {
        let health = HealthMonitor::new(store.clone(), config.health);
        let processor = BatchProcessor::new(
            fetcher,
            extractor,
            verifier,
            store.clone(),
            health.clone(),
            &config,
        );
        let reanalyzer = Reanalyzer::new(
            store.clone(),
            processor.verifier().clone(),
            processor.writer().clone(),
        );

        Self {
            inner: Arc::new(Inner {
                registry: SourceRegistry::new(store.clone()),
                stats: StatsAggregator::new(store.clone()),
                store,
                health,
                processor,
                reanalyzer,
                config,
                active: Mutex::new(HashMap::new()),
                reporter,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Start a run over `scope` and return its id without waiting for it.
    ///
    /// Fails with [`AppError::RunAlreadyActive`] if a running run has an
    /// overlapping scope, and with [`AppError::EmptyScope`] if no active
    /// source matches. Nothing is created in either case.
    pub async fn start_run(&self, scope: Scope) -> Result<Uuid, AppError> {
        let mut active = self.inner.active.lock().await;

        if let Some((run_id, _)) = active.iter().find(|(_, r)| r.scope.overlaps(&scope)) {
            return Err(AppError::RunAlreadyActive { run_id: *run_id });
        }
        let running = self
            .inner
            .store
            .list_runs(&RunFilter {
                status: Some(RunStatus::Running),
                ..Default::default()
            })
            .await?;
        if let Some(run) = running.iter().find(|r| r.scope.overlaps(&scope)) {
            return Err(AppError::RunAlreadyActive { run_id: run.id });
        }

        let sources = self.inner.registry.list_active(&scope).await?;
        if sources.is_empty() {
            return Err(AppError::EmptyScope(scope.to_string()));
        }

        let run_id = Uuid::new_v4();
        let batches = partition(run_id, &sources, self.inner.config.chunk_size);
        let mut run = Run {
            id: run_id,
            status: RunStatus::Pending,
            scope: scope.clone(),
            started_at: Utc::now(),
            finished_at: None,
            totals: Totals {
                discovered: sources.len() as u64,
                ..Default::default()
            },
        };
        self.inner.store.create_run(&run, &batches).await?;
        self.transition(&mut run, RunStatus::Running).await?;

        if let Err(e) = self
            .inner
            .stats
            .record_run_started(sources.iter().map(|s| s.region_name.as_str()))
            .await
        {
            tracing::warn!(%run_id, error = %e, "Failed to count run in region stats");
        }

        let handle = ActiveRun {
            scope,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            tally: RunTally::new(sources.len() as u64),
        };
        active.insert(run_id, handle.clone());
        drop(active);

        let this = self.clone();
        tokio::spawn(async move { this.execute(run, batches, handle).await });

        Ok(run_id)
    }

    /// Request cooperative cancellation of a run.
    ///
    /// URLs already in flight finish; nothing new is dispatched. The run
    /// becomes `cancelled` once every batch is terminal.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<(), AppError> {
        {
            let active = self.inner.active.lock().await;
            if let Some(handle) = active.get(&run_id) {
                handle.cancel.cancel();
                self.inner
                    .reporter
                    .report(RunEvent::CancelRequested { run_id });
                return Ok(());
            }
        }

        let run = self
            .inner
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
        if run.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "run {run_id} is already {}",
                run.status
            )));
        }

        // Not executing in this process, so no batch will ever finish it.
        self.inner
            .reporter
            .report(RunEvent::CancelRequested { run_id });
        self.close_orphan(run, RunStatus::Cancelled).await
    }

    /// Mark runs left `pending` or `running` by a previous process as failed.
    pub async fn recover_interrupted_runs(&self) -> Result<Vec<Uuid>, AppError> {
        let active = self.inner.active.lock().await;
        recover_orphaned_runs(&self.inner.store, |run_id| active.contains_key(run_id)).await
    }

    /// Cancel every run executing in this process and wait for them.
    pub async fn shutdown(&self) {
        let handles: Vec<ActiveRun> = {
            let active = self.inner.active.lock().await;
            active.values().cloned().collect()
        };
        for handle in &handles {
            handle.cancel.cancel();
        }
        for handle in handles {
            handle.done.cancelled().await;
        }
    }

    /// Wait until a run is terminal and return its final state.
    pub async fn wait_for_run(&self, run_id: Uuid) -> Result<Run, AppError> {
        let done = {
            let active = self.inner.active.lock().await;
            active.get(&run_id).map(|h| h.done.clone())
        };
        if let Some(done) = done {
            done.cancelled().await;
        }
        self.inner
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<RunDetail, AppError> {
        let mut run = self
            .inner
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("run {run_id}")))?;
        self.overlay_live_totals(std::slice::from_mut(&mut run)).await;

        let batches = self.inner.store.list_batches(run_id).await?;
        let url_errors = self.inner.store.list_url_errors(run_id).await?;

        let source_ids: BTreeSet<Uuid> = url_errors.iter().map(|e| e.source_id).collect();
        let mut errored_sources = Vec::with_capacity(source_ids.len());
        for source_id in source_ids {
            if let Some(record) = self.inner.health.get(source_id).await? {
                errored_sources.push(record);
            }
        }

        Ok(RunDetail {
            run,
            batches,
            url_errors,
            errored_sources,
        })
    }

    /// Runs matching `filter`, newest first.
    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>, AppError> {
        let mut runs = self.inner.store.list_runs(filter).await?;
        self.overlay_live_totals(&mut runs).await;
        Ok(runs)
    }

    pub async fn list_batches(&self, run_id: Uuid) -> Result<Vec<Batch>, AppError> {
        if self.inner.store.get_run(run_id).await?.is_none() {
            return Err(AppError::NotFound(format!("run {run_id}")));
        }
        self.inner.store.list_batches(run_id).await
    }

    // -----------------------------------------------------------------------
    // Stats, health, sources, announcements
    // -----------------------------------------------------------------------

    pub async fn get_stats_by_region(
        &self,
        region: Option<&str>,
    ) -> Result<Vec<RegionStats>, AppError> {
        self.inner.stats.by_region(region).await
    }

    pub async fn get_url_health(
        &self,
        unhealthy_only: bool,
    ) -> Result<Vec<HealthRecord>, AppError> {
        if unhealthy_only {
            self.inner.health.list_unhealthy().await
        } else {
            self.inner.health.list_all().await
        }
    }

    pub async fn register_source(&self, region: &str, url: &str) -> Result<Source, AppError> {
        self.inner.registry.register(region, url).await
    }

    pub async fn deactivate_source(&self, source_id: Uuid) -> Result<Source, AppError> {
        self.inner.registry.deactivate(source_id).await
    }

    pub async fn list_sources(
        &self,
        scope: &Scope,
        include_inactive: bool,
    ) -> Result<Vec<Source>, AppError> {
        if include_inactive {
            self.inner.registry.list_all(scope).await
        } else {
            self.inner.registry.list_active(scope).await
        }
    }

    pub async fn reanalyze(&self, announcement_id: Uuid) -> Result<ReanalysisOutcome, AppError> {
        self.inner.reanalyzer.reanalyze(announcement_id).await
    }

    /// The newest `limit` verification log entries in insertion order.
    pub async fn get_verification_log(
        &self,
        announcement_id: Option<Uuid>,
        limit: usize,
    ) -> Result<Vec<VerificationLogEntry>, AppError> {
        self.inner.store.list_log(announcement_id, limit).await
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    async fn execute(&self, mut run: Run, batches: Vec<Batch>, handle: ActiveRun) {
        let reporter = self.inner.reporter.as_ref();
        reporter.report(RunEvent::RunStarted {
            run_id: run.id,
            scope: &run.scope,
            sources: run.totals.discovered as usize,
            batches: batches.len(),
        });

        let statuses: Vec<BatchStatus> = stream::iter(batches)
            .map(|batch| {
                let this = self.clone();
                let handle = handle.clone();
                async move { this.run_batch(batch, &handle).await }
            })
            .buffer_unordered(self.inner.config.batch_concurrency.max(1))
            .collect()
            .await;

        let status = final_status(&statuses, handle.cancel.is_cancelled());
        let totals = handle.tally.snapshot();

        if let Err(e) = self.inner.store.update_run_totals(run.id, &totals).await {
            tracing::error!(run_id = %run.id, error = %e, "Failed to store final run totals");
        }
        run.totals = totals;
        if let Err(e) = self.transition(&mut run, status).await {
            tracing::error!(run_id = %run.id, error = %e, "Failed to finalize run");
        }

        self.inner.active.lock().await.remove(&run.id);
        handle.done.cancel();

        reporter.report(RunEvent::RunFinished {
            run_id: run.id,
            status,
            totals: &run.totals,
        });
    }

    async fn run_batch(&self, mut batch: Batch, handle: &ActiveRun) -> BatchStatus {
        let reporter = self.inner.reporter.as_ref();

        if handle.cancel.is_cancelled() {
            batch.status = BatchStatus::Cancelled;
            batch.finished_at = Some(Utc::now());
            self.save_batch(&batch).await;
            reporter.report(RunEvent::BatchFinished {
                run_id: batch.run_id,
                batch_number: batch.batch_number,
                status: batch.status,
                totals: &batch.totals,
            });
            return batch.status;
        }

        batch.status = BatchStatus::Running;
        batch.started_at = Some(Utc::now());
        self.save_batch(&batch).await;
        reporter.report(RunEvent::BatchStarted {
            run_id: batch.run_id,
            batch_number: batch.batch_number,
            size: batch.items.len(),
        });

        let outcome = self
            .inner
            .processor
            .process(&batch, &handle.cancel, &handle.tally, reporter)
            .await;

        batch.status = outcome.status;
        batch.totals = outcome.totals;
        batch.finished_at = Some(Utc::now());
        self.save_batch(&batch).await;

        if let Err(e) = self.inner.stats.flush(&outcome.region_deltas).await {
            tracing::warn!(batch_id = %batch.id, error = %e, "Failed to flush region stats");
        }
        if let Err(e) = self
            .inner
            .store
            .update_run_totals(batch.run_id, &handle.tally.snapshot())
            .await
        {
            tracing::warn!(run_id = %batch.run_id, error = %e, "Failed to store run totals");
        }

        reporter.report(RunEvent::BatchFinished {
            run_id: batch.run_id,
            batch_number: batch.batch_number,
            status: batch.status,
            totals: &batch.totals,
        });
        batch.status
    }

    async fn save_batch(&self, batch: &Batch) {
        if let Err(e) = self.inner.store.save_batch_state(batch).await {
            tracing::error!(batch_id = %batch.id, error = %e, "Failed to store batch state");
        }
    }

    async fn transition(&self, run: &mut Run, next: RunStatus) -> Result<(), AppError> {
        transition(&self.inner.store, run, next).await
    }

    async fn close_orphan(&self, run: Run, status: RunStatus) -> Result<(), AppError> {
        close_orphan(&self.inner.store, run, status).await
    }

    async fn overlay_live_totals(&self, runs: &mut [Run]) {
        let active = self.inner.active.lock().await;
        for run in runs.iter_mut() {
            if let Some(handle) = active.get(&run.id) {
                run.totals = handle.tally.snapshot();
            }
        }
    }
}

/// Mark every `pending` or `running` run for which `is_executing` is false
/// as failed, cancelling its unfinished batches.
///
/// Used at startup to close runs a crashed process left behind. Only call
/// this when no other live process is executing runs against the same store.
pub async fn recover_orphaned_runs<S, F>(store: &S, is_executing: F) -> Result<Vec<Uuid>, AppError>
where
    S: RunStore,
    F: Fn(&Uuid) -> bool,
{
    let mut recovered = Vec::new();
    for status in [RunStatus::Pending, RunStatus::Running] {
        let runs = store
            .list_runs(&RunFilter {
                status: Some(status),
                ..Default::default()
            })
            .await?;
        for run in runs {
            if is_executing(&run.id) {
                continue;
            }
            let run_id = run.id;
            close_orphan(store, run, RunStatus::Failed).await?;
            tracing::warn!(%run_id, "Marked interrupted run as failed");
            recovered.push(run_id);
        }
    }
    Ok(recovered)
}

/// Move `run` to `next`, setting `finished_at` exactly when `next` is
/// terminal.
async fn transition<S: RunStore>(
    store: &S,
    run: &mut Run,
    next: RunStatus,
) -> Result<(), AppError> {
    if !run.status.can_transition_to(next) {
        return Err(AppError::InvalidState(format!(
            "run {} cannot move from {} to {}",
            run.id, run.status, next
        )));
    }
    let finished_at = next.is_terminal().then(Utc::now);
    store.update_run_status(run.id, next, finished_at).await?;
    run.status = next;
    run.finished_at = finished_at;
    Ok(())
}

/// Terminate a run no task in this process is executing.
async fn close_orphan<S: RunStore>(
    store: &S,
    mut run: Run,
    status: RunStatus,
) -> Result<(), AppError> {
    for mut batch in store.list_batches(run.id).await? {
        if !batch.status.is_terminal() {
            batch.status = BatchStatus::Cancelled;
            batch.finished_at = Some(Utc::now());
            store.save_batch_state(&batch).await?;
        }
    }
    // A pending run only fails by way of running.
    if run.status == RunStatus::Pending && !run.status.can_transition_to(status) {
        transition(store, &mut run, RunStatus::Running).await?;
    }
    transition(store, &mut run, status).await
}

/// Terminal status of a run from the terminal statuses of its batches.
fn final_status(batches: &[BatchStatus], cancel_requested: bool) -> RunStatus {
    if cancel_requested || batches.contains(&BatchStatus::Cancelled) {
        RunStatus::Cancelled
    } else if !batches.is_empty() && batches.iter().all(|s| *s == BatchStatus::Failed) {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    }
}
