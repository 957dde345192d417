use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Scope, Source};

/// Status of a crawl run.
///
/// `pending -> running -> {completed, failed, cancelled}`; terminal states
/// have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match self {
            RunStatus::Pending => matches!(next, RunStatus::Running | RunStatus::Cancelled),
            RunStatus::Running => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Status of one batch within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    /// Every URL was attempted, whatever the per-URL outcome.
    Done,
    /// The batch could not be dispatched at all.
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Done => "done",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Done | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(BatchStatus::Pending),
            "running" => Ok(BatchStatus::Running),
            "done" => Ok(BatchStatus::Done),
            "failed" => Ok(BatchStatus::Failed),
            "cancelled" => Ok(BatchStatus::Cancelled),
            _ => Err(format!("Unknown batch status: {}", s)),
        }
    }
}

/// Outcome counters of a run or batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub discovered: u64,
    pub processed: u64,
    pub verified: u64,
    pub rejected: u64,
    pub errored: u64,
}

impl Totals {
    pub fn add(&mut self, other: &Totals) {
        self.discovered += other.discovered;
        self.processed += other.processed;
        self.verified += other.verified;
        self.rejected += other.rejected;
        self.errored += other.errored;
    }
}

/// A crawl run over a scope of sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub status: RunStatus,
    pub scope: Scope,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub totals: Totals,
}

/// One source reference inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub source_id: Uuid,
    pub region_name: String,
    pub url: String,
}

impl From<&Source> for BatchItem {
    fn from(source: &Source) -> Self {
        Self {
            source_id: source.id,
            region_name: source.region_name.clone(),
            url: source.url.clone(),
        }
    }
}

/// A fixed chunk of sources processed together. Membership never changes
/// after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    pub run_id: Uuid,
    pub batch_number: u32,
    pub items: Vec<BatchItem>,
    pub status: BatchStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub totals: Totals,
}

/// Split `sources` into `ceil(len / chunk_size)` batches, preserving order.
pub fn partition(run_id: Uuid, sources: &[Source], chunk_size: usize) -> Vec<Batch> {
    let chunk_size = chunk_size.max(1);
    sources
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| Batch {
            id: Uuid::new_v4(),
            run_id,
            batch_number: i as u32 + 1,
            items: chunk.iter().map(BatchItem::from).collect(),
            status: BatchStatus::Pending,
            started_at: None,
            finished_at: None,
            totals: Totals::default(),
        })
        .collect()
}

/// Filter for listing runs.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub region: Option<String>,
    pub limit: Option<usize>,
}

impl RunFilter {
    pub fn matches(&self, run: &Run) -> bool {
        if let Some(status) = self.status
            && run.status != status
        {
            return false;
        }
        if let Some(region) = &self.region
            && !run.scope.matches(region)
        {
            return false;
        }
        true
    }
}

/// Pipeline stage at which a URL failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Fetch,
    Parse,
    Verify,
    Persist,
}

impl ErrorStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorStage::Fetch => "fetch",
            ErrorStage::Parse => "parse",
            ErrorStage::Verify => "verify",
            ErrorStage::Persist => "persist",
        }
    }
}

impl fmt::Display for ErrorStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fetch" => Ok(ErrorStage::Fetch),
            "parse" => Ok(ErrorStage::Parse),
            "verify" => Ok(ErrorStage::Verify),
            "persist" => Ok(ErrorStage::Persist),
            _ => Err(format!("Unknown error stage: {}", s)),
        }
    }
}

/// A URL that errored during a run, kept so operators can see which
/// sources failed and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlError {
    pub run_id: Uuid,
    pub batch_id: Uuid,
    pub source_id: Uuid,
    pub url: String,
    pub stage: ErrorStage,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
