use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Classification of a failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Timeout,
    Network,
    Http4xx,
    Http5xx,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Timeout => "timeout",
            FetchErrorKind::Network => "network",
            FetchErrorKind::Http4xx => "http_4xx",
            FetchErrorKind::Http5xx => "http_5xx",
        }
    }

    /// Map an HTTP status code onto a fetch error kind.
    ///
    /// Only meaningful for non-success statuses; anything below 500 is
    /// treated as a client error.
    pub fn from_status(status: u16) -> Self {
        if status >= 500 {
            FetchErrorKind::Http5xx
        } else {
            FetchErrorKind::Http4xx
        }
    }

    /// `http_4xx` is permanent; every other kind is worth another attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchErrorKind::Http4xx)
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a failed AI verification call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationErrorKind {
    RateLimited,
    Timeout,
    MalformedResponse,
}

impl VerificationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationErrorKind::RateLimited => "rate_limited",
            VerificationErrorKind::Timeout => "timeout",
            VerificationErrorKind::MalformedResponse => "malformed_response",
        }
    }
}

impl fmt::Display for VerificationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-wide error types for the crawler pipeline.
#[derive(Error, Debug)]
pub enum AppError {
    /// Fetching a source URL failed.
    #[error("Fetch error ({kind}): {message}")]
    Fetch {
        kind: FetchErrorKind,
        message: String,
    },

    /// The extractor could not turn a fetched page into a candidate.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The AI verifier failed to produce a usable answer.
    #[error("Verification error ({kind}): {message}")]
    Verification {
        kind: VerificationErrorKind,
        message: String,
    },

    /// Missing or invalid configuration (including an invalid run scope).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A storage read or write failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Another writer inserted the same fingerprint first.
    #[error("Fingerprint already exists: {0}")]
    FingerprintConflict(String),

    /// An active source with the same region and URL is already registered.
    #[error("Source already registered: {region} {url}")]
    DuplicateSource { region: String, url: String },

    /// A running run already covers part of the requested scope.
    #[error("Run {run_id} is already running for an overlapping scope")]
    RunAlreadyActive { run_id: Uuid },

    /// The requested scope matched no active sources.
    #[error("No active sources match scope {0}")]
    EmptyScope(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested transition is not allowed from the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    pub fn fetch(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        AppError::Fetch {
            kind,
            message: message.into(),
        }
    }

    pub fn verification(kind: VerificationErrorKind, message: impl Into<String>) -> Self {
        AppError::Verification {
            kind,
            message: message.into(),
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Fetch { kind, .. } => kind.is_transient(),
            AppError::Verification { kind, .. } => *kind == VerificationErrorKind::RateLimited,
            AppError::Persistence(_) => true,
            _ => false,
        }
    }

    /// Short machine-readable label, used in logs and URL error records.
    pub fn kind_label(&self) -> String {
        match self {
            AppError::Fetch { kind, .. } => format!("fetch:{kind}"),
            AppError::Parse(_) => "parse".to_string(),
            AppError::Verification { kind, .. } => format!("verification:{kind}"),
            AppError::Config(_) => "config".to_string(),
            AppError::Persistence(_) => "persistence".to_string(),
            AppError::FingerprintConflict(_) => "fingerprint_conflict".to_string(),
            AppError::DuplicateSource { .. } => "duplicate_source".to_string(),
            AppError::RunAlreadyActive { .. } => "run_already_active".to_string(),
            AppError::EmptyScope(_) => "empty_scope".to_string(),
            AppError::NotFound(_) => "not_found".to_string(),
            AppError::InvalidState(_) => "invalid_state".to_string(),
            AppError::Serialization(_) => "serialization".to_string(),
        }
    }
}
