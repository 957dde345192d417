pub mod batch;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod health;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod reanalyze;
pub mod registry;
pub mod run;
pub mod stats;
pub mod throttle;
pub mod traits;
pub mod verify;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{HealthThresholds, PipelineConfig, RetryPolicy};
pub use error::{AppError, FetchErrorKind, VerificationErrorKind};
pub use models::{
    Announcement, Candidate, HealthRecord, HealthStatus, Scope, Source, Verification,
    VerificationLogEntry, WriteDecision, compute_hash,
};
pub use orchestrator::{
    Orchestrator, RunDetail, RunEvent, RunReporter, TracingRunReporter, recover_orphaned_runs,
};
pub use run::{Batch, BatchStatus, Run, RunFilter, RunStatus, Totals, UrlError};
pub use stats::RegionStats;
pub use traits::{Extractor, Fetcher, PipelineStore, Verifier};
