use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// A registered crawl source: one announcement page of one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub region_name: String,
    pub url: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Which sources a run covers.
///
/// Region lists are kept sorted and deduplicated so two scopes naming the
/// same regions compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "regions")]
pub enum Scope {
    All,
    Regions(Vec<String>),
}

impl Scope {
    /// Build a region scope. An empty region list means every region.
    pub fn regions<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list: Vec<String> = regions
            .into_iter()
            .map(|r| r.as_ref().trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        list.sort();
        list.dedup();
        if list.is_empty() {
            Scope::All
        } else {
            Scope::Regions(list)
        }
    }

    pub fn matches(&self, region: &str) -> bool {
        match self {
            Scope::All => true,
            Scope::Regions(list) => list.iter().any(|r| r == region),
        }
    }

    /// Two scopes overlap when at least one region could belong to both.
    pub fn overlaps(&self, other: &Scope) -> bool {
        match (self, other) {
            (Scope::All, _) | (_, Scope::All) => true,
            (Scope::Regions(a), Scope::Regions(b)) => a.iter().any(|r| b.contains(r)),
        }
    }

    /// Region list for storage; `None` stands for every region.
    pub fn region_list(&self) -> Option<&[String]> {
        match self {
            Scope::All => None,
            Scope::Regions(list) => Some(list),
        }
    }

    pub fn from_region_list(list: Option<Vec<String>>) -> Self {
        match list {
            None => Scope::All,
            Some(list) => Scope::regions(list),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::All => f.write_str("all"),
            Scope::Regions(list) => write!(f, "regions:{}", list.join(",")),
        }
    }
}

// ---------------------------------------------------------------------------
// Extraction and verification
// ---------------------------------------------------------------------------

/// Transient result of the extractor for one fetched page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub source_url: String,
    pub title: String,
    pub raw_dates: Vec<String>,
    pub raw_budget_text: Option<String>,
    pub body_text: String,
}

impl Candidate {
    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty() && self.body_text.trim().is_empty()
    }

    /// Leading part of the body used for audit log entries.
    pub fn snippet(&self, max_chars: usize) -> String {
        let text = if self.title.is_empty() {
            self.body_text.clone()
        } else {
            format!("{}\n{}", self.title, self.body_text)
        };
        text.chars().take(max_chars).collect()
    }
}

/// Application window of an announcement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPeriod {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ApplicationPeriod {
    /// The date used for fingerprinting: start if known, else end.
    pub fn primary_date(&self) -> Option<NaiveDate> {
        self.start.or(self.end)
    }
}

/// Answer of the AI verifier for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub is_valid: bool,
    pub normalized_dates: ApplicationPeriod,
    pub normalized_budget: Option<i64>,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub matched_criteria: Vec<String>,
}

impl Verification {
    pub fn clamp_confidence(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

// ---------------------------------------------------------------------------
// Announcements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Verified,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => "verified",
            VerificationStatus::Rejected => "rejected",
        }
    }

    pub fn from_valid(is_valid: bool) -> Self {
        if is_valid {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Rejected
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "verified" => Ok(VerificationStatus::Verified),
            "rejected" => Ok(VerificationStatus::Rejected),
            _ => Err(format!("Unknown verification status: {s}")),
        }
    }
}

/// A stored, deduplicated subsidy announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: Uuid,
    pub region_name: String,
    pub title: String,
    pub content: String,
    pub application_period: ApplicationPeriod,
    pub budget_amount: Option<i64>,
    pub source_url: String,
    pub fingerprint: String,
    pub verification_status: VerificationStatus,
    pub ai_confidence: f64,
    pub raw_dates: Vec<String>,
    pub raw_budget_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Announcement {
    /// Rebuild the extractor output this announcement was stored from.
    pub fn to_candidate(&self) -> Candidate {
        Candidate {
            source_url: self.source_url.clone(),
            title: self.title.clone(),
            raw_dates: self.raw_dates.clone(),
            raw_budget_text: self.raw_budget_text.clone(),
            body_text: self.content.clone(),
        }
    }

    /// True when writing `write` would not change any stored field.
    pub fn matches_write(&self, write: &AnnouncementWrite) -> bool {
        self.title == write.title
            && self.content == write.content
            && self.application_period == write.application_period
            && self.budget_amount == write.budget_amount
            && self.verification_status == write.verification_status
            && self.ai_confidence == write.ai_confidence
            && self.raw_dates == write.raw_dates
            && self.raw_budget_text == write.raw_budget_text
    }
}

/// Field values for inserting or updating an announcement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnouncementWrite {
    pub region_name: String,
    pub title: String,
    pub content: String,
    pub application_period: ApplicationPeriod,
    pub budget_amount: Option<i64>,
    pub source_url: String,
    pub fingerprint: String,
    pub verification_status: VerificationStatus,
    pub ai_confidence: f64,
    pub raw_dates: Vec<String>,
    pub raw_budget_text: Option<String>,
}

impl AnnouncementWrite {
    pub fn from_verified(
        region_name: &str,
        candidate: &Candidate,
        verification: &Verification,
        fingerprint: String,
    ) -> Self {
        Self {
            region_name: region_name.to_string(),
            title: candidate.title.clone(),
            content: candidate.body_text.clone(),
            application_period: verification.normalized_dates,
            budget_amount: verification.normalized_budget,
            source_url: candidate.source_url.clone(),
            fingerprint,
            verification_status: VerificationStatus::from_valid(verification.is_valid),
            ai_confidence: verification.confidence,
            raw_dates: candidate.raw_dates.clone(),
            raw_budget_text: candidate.raw_budget_text.clone(),
        }
    }
}

/// Outcome of the store writer for one verified candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteDecision {
    Inserted,
    Updated,
    /// Stored record already holds the same values.
    Unchanged,
    /// Stored record has higher confidence; nothing written.
    Skipped,
    /// Verifier judged the candidate invalid; no announcement written.
    Rejected,
}

impl WriteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDecision::Inserted => "inserted",
            WriteDecision::Updated => "updated",
            WriteDecision::Unchanged => "unchanged",
            WriteDecision::Skipped => "skipped",
            WriteDecision::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WriteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inserted" => Ok(WriteDecision::Inserted),
            "updated" => Ok(WriteDecision::Updated),
            "unchanged" => Ok(WriteDecision::Unchanged),
            "skipped" => Ok(WriteDecision::Skipped),
            "rejected" => Ok(WriteDecision::Rejected),
            _ => Err(format!("Unknown write decision: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Verification log
// ---------------------------------------------------------------------------

/// Append-only audit record of one AI verification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationLogEntry {
    pub id: Uuid,
    pub announcement_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub source_url: String,
    pub input_snippet: String,
    pub ai_result: serde_json::Value,
    pub confidence: f64,
    pub decision: WriteDecision,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewLogEntry {
    pub announcement_id: Option<Uuid>,
    pub run_id: Option<Uuid>,
    pub source_url: String,
    pub input_snippet: String,
    pub ai_result: serde_json::Value,
    pub confidence: f64,
    pub decision: WriteDecision,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            _ => Err(format!("Unknown health status: {s}")),
        }
    }
}

/// Fetch health of one source, derived from its fetch attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub source_id: Uuid,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_failures: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub status: HealthStatus,
}

impl HealthRecord {
    pub fn new(source_id: Uuid) -> Self {
        Self {
            source_id,
            consecutive_failures: 0,
            total_attempts: 0,
            total_failures: 0,
            last_success_at: None,
            last_failure_at: None,
            last_error: None,
            last_latency_ms: None,
            status: HealthStatus::Healthy,
        }
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
