use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::run::Totals;
use crate::traits::StatsStore;

/// Per-URL outcome as counted in run totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlOutcome {
    Verified,
    Rejected,
    Errored,
}

/// Live totals of one run.
///
/// Every batch worker of the run increments the same atomic counters, so
/// there is a single aggregation point and no read-modify-write races.
#[derive(Debug, Clone, Default)]
pub struct RunTally {
    inner: Arc<TallyCounters>,
}

#[derive(Debug, Default)]
struct TallyCounters {
    discovered: AtomicU64,
    processed: AtomicU64,
    verified: AtomicU64,
    rejected: AtomicU64,
    errored: AtomicU64,
}

impl RunTally {
    pub fn new(discovered: u64) -> Self {
        let tally = Self::default();
        tally.inner.discovered.store(discovered, Ordering::Relaxed);
        tally
    }

    pub fn record(&self, outcome: UrlOutcome) {
        let c = &self.inner;
        c.processed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            UrlOutcome::Verified => c.verified.fetch_add(1, Ordering::Relaxed),
            UrlOutcome::Rejected => c.rejected.fetch_add(1, Ordering::Relaxed),
            UrlOutcome::Errored => c.errored.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn snapshot(&self) -> Totals {
        let c = &self.inner;
        Totals {
            discovered: c.discovered.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            verified: c.verified.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            errored: c.errored.load(Ordering::Relaxed),
        }
    }
}

/// Counters of one region, summed across runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCounters {
    pub runs: u64,
    pub processed: u64,
    pub verified: u64,
    pub rejected: u64,
    pub errored: u64,
    pub latency_ms_total: u64,
    pub latency_samples: u64,
}

impl RegionCounters {
    pub fn add(&mut self, other: &RegionCounters) {
        self.runs += other.runs;
        self.processed += other.processed;
        self.verified += other.verified;
        self.rejected += other.rejected;
        self.errored += other.errored;
        self.latency_ms_total += other.latency_ms_total;
        self.latency_samples += other.latency_samples;
    }

    pub fn record(&mut self, outcome: UrlOutcome) {
        self.processed += 1;
        match outcome {
            UrlOutcome::Verified => self.verified += 1,
            UrlOutcome::Rejected => self.rejected += 1,
            UrlOutcome::Errored => self.errored += 1,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == RegionCounters::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionHealth {
    Healthy,
    Warning,
    Critical,
}

impl RegionHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionHealth::Healthy => "healthy",
            RegionHealth::Warning => "warning",
            RegionHealth::Critical => "critical",
        }
    }

    /// `healthy` at 80% success or better, `warning` from 50%.
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 0.8 {
            RegionHealth::Healthy
        } else if rate >= 0.5 {
            RegionHealth::Warning
        } else {
            RegionHealth::Critical
        }
    }
}

/// Dashboard view of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionStats {
    pub region_name: String,
    #[serde(flatten)]
    pub counters: RegionCounters,
    /// Share of processed URLs that did not error; 0 when nothing ran.
    pub success_rate: f64,
    pub avg_latency_ms: Option<u64>,
    pub health: RegionHealth,
}

impl RegionStats {
    pub fn from_counters(region_name: String, counters: RegionCounters) -> Self {
        let success_rate = if counters.processed == 0 {
            0.0
        } else {
            (counters.processed - counters.errored) as f64 / counters.processed as f64
        };
        let avg_latency_ms = (counters.latency_samples > 0)
            .then(|| counters.latency_ms_total / counters.latency_samples);
        Self {
            region_name,
            counters,
            success_rate,
            avg_latency_ms,
            health: RegionHealth::from_success_rate(success_rate),
        }
    }
}

/// Rolls batch outcomes up per region and serves the read side.
#[derive(Clone)]
pub struct StatsAggregator<S> {
    store: S,
}

impl<S: StatsStore> StatsAggregator<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Count one run against each region it touches.
    pub async fn record_run_started<'a, I>(&self, regions: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut unique: Vec<&str> = regions.into_iter().collect();
        unique.sort();
        unique.dedup();
        let delta = RegionCounters {
            runs: 1,
            ..Default::default()
        };
        for region in unique {
            self.store.add_region_counters(region, &delta).await?;
        }
        Ok(())
    }

    /// Add the per-region deltas of a finished batch.
    pub async fn flush(&self, deltas: &BTreeMap<String, RegionCounters>) -> Result<(), AppError> {
        for (region, delta) in deltas {
            if !delta.is_zero() {
                self.store.add_region_counters(region, delta).await?;
            }
        }
        Ok(())
    }

    /// Region stats, worst success rate first.
    pub async fn by_region(&self, region: Option<&str>) -> Result<Vec<RegionStats>, AppError> {
        let mut stats: Vec<RegionStats> = self
            .store
            .list_region_counters(region)
            .await?
            .into_iter()
            .map(|(name, counters)| RegionStats::from_counters(name, counters))
            .collect();
        stats.sort_by(|a, b| {
            a.success_rate
                .total_cmp(&b.success_rate)
                .then_with(|| a.region_name.cmp(&b.region_name))
        });
        Ok(stats)
    }
}
