//! Test utilities: mock implementations of the capability traits.
//!
//! Handwritten mocks for dependency injection in unit tests. All mocks use
//! `Arc<Mutex<_>>` or atomics for interior mutability, allowing test
//! assertions on recorded calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;

use crate::config::{PipelineConfig, RetryPolicy};
use crate::error::{AppError, FetchErrorKind, VerificationErrorKind};
use crate::models::{ApplicationPeriod, Candidate, Verification};
use crate::orchestrator::{RunEvent, RunReporter};
use crate::traits::{Extractor, Fetcher, Verifier};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Pipeline config without politeness delays or backoff sleeps.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        politeness_interval: Duration::ZERO,
        fetch_retry: RetryPolicy::immediate(3),
        verify_retry: RetryPolicy::immediate(3),
        persist_retry: RetryPolicy::immediate(2),
        ..PipelineConfig::default()
    }
}

pub fn candidate(url: &str, title: &str) -> Candidate {
    Candidate {
        source_url: url.to_string(),
        title: title.to_string(),
        raw_dates: vec!["2025.03.01 ~ 2025.03.31".to_string()],
        raw_budget_text: Some("예산 1,000,000원".to_string()),
        body_text: format!("{title} 신청기간 2025.03.01 ~ 2025.03.31"),
    }
}

pub fn verification(is_valid: bool, confidence: f64) -> Verification {
    Verification {
        is_valid,
        normalized_dates: ApplicationPeriod {
            start: NaiveDate::from_ymd_opt(2025, 3, 1),
            end: NaiveDate::from_ymd_opt(2025, 3, 31),
        },
        normalized_budget: Some(1_000_000),
        confidence,
        reasoning: "test".to_string(),
        matched_criteria: vec!["application_period".to_string()],
    }
}

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher with per-URL behavior.
///
/// Resolution order: failing URL, per-URL body, queued response, default.
#[derive(Clone)]
pub struct MockFetcher {
    /// `None` echoes `"Notice at {url}"`.
    default_body: Option<String>,
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    bodies: Arc<Mutex<HashMap<String, String>>>,
    failing: Arc<Mutex<HashMap<String, FetchErrorKind>>>,
    delay: Duration,
    preflight_error: Option<String>,
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
}

impl MockFetcher {
    fn with_default(default_body: Option<String>) -> Self {
        Self {
            default_body,
            responses: Arc::new(Mutex::new(Vec::new())),
            bodies: Arc::new(Mutex::new(HashMap::new())),
            failing: Arc::new(Mutex::new(HashMap::new())),
            delay: Duration::ZERO,
            preflight_error: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns `html` for every URL.
    pub fn new(html: &str) -> Self {
        Self::with_default(Some(html.to_string()))
    }

    /// Returns a distinct body per URL.
    pub fn echo() -> Self {
        Self::with_default(None)
    }

    pub fn with_error(error: AppError) -> Self {
        Self::with_responses(vec![Err(error)])
    }

    pub fn with_responses(responses: Vec<Result<String, AppError>>) -> Self {
        let fetcher = Self::with_default(Some("<html><body>default</body></html>".into()));
        *fetcher.responses.lock().unwrap() = responses;
        fetcher
    }

    /// Every fetch of `url` fails with `kind`.
    pub fn fail_url(self, url: &str, kind: FetchErrorKind) -> Self {
        self.failing.lock().unwrap().insert(url.to_string(), kind);
        self
    }

    pub fn with_body(self, url: &str, body: &str) -> Self {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_preflight_error(mut self, message: &str) -> Self {
        self.preflight_error = Some(message.to_string());
        self
    }

    pub fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Start times of every call, in call order.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(kind) = self.failing.lock().unwrap().get(url) {
            return Err(AppError::fetch(*kind, format!("mock {kind} for {url}")));
        }
        if let Some(body) = self.bodies.lock().unwrap().get(url) {
            return Ok(body.clone());
        }
        {
            let mut responses = self.responses.lock().unwrap();
            if !responses.is_empty() {
                return responses.remove(0);
            }
        }
        Ok(self
            .default_body
            .clone()
            .unwrap_or_else(|| format!("Notice at {url}")))
    }

    fn preflight(&self) -> Result<(), AppError> {
        match &self.preflight_error {
            Some(message) => Err(AppError::Config(message.clone())),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Mock extractor: first line becomes the title, the whole body the text.
#[derive(Clone, Default)]
pub struct MockExtractor;

impl MockExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for MockExtractor {
    fn extract(&self, source_url: &str, raw_body: &str) -> Result<Candidate, AppError> {
        let body = raw_body.trim();
        if body.is_empty() {
            return Err(AppError::Parse(format!("empty page at {source_url}")));
        }
        let title = body.lines().next().unwrap_or_default().trim().to_string();
        Ok(Candidate {
            source_url: source_url.to_string(),
            title,
            raw_dates: Vec::new(),
            raw_budget_text: None,
            body_text: body.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// MockVerifier
// ---------------------------------------------------------------------------

/// Mock verifier returning queued responses, then a fixed default.
#[derive(Clone)]
pub struct MockVerifier {
    default: Option<Verification>,
    responses: Arc<Mutex<Vec<Result<Verification, AppError>>>>,
    rejected_titles: Arc<Mutex<Vec<String>>>,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockVerifier {
    fn build(
        default: Option<Verification>,
        responses: Vec<Result<Verification, AppError>>,
    ) -> Self {
        Self {
            default,
            responses: Arc::new(Mutex::new(responses)),
            rejected_titles: Arc::new(Mutex::new(Vec::new())),
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn always(verification: Verification) -> Self {
        Self::build(Some(verification), Vec::new())
    }

    pub fn with_responses(responses: Vec<Result<Verification, AppError>>) -> Self {
        Self::build(None, responses)
    }

    /// Candidates with this title are answered as invalid.
    pub fn reject_title(self, title: &str) -> Self {
        self.rejected_titles.lock().unwrap().push(title.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, candidate: &Candidate) -> Result<Verification, AppError> {
        let queued = {
            let mut responses = self.responses.lock().unwrap();
            (!responses.is_empty()).then(|| responses.remove(0))
        };
        let mut result = match queued {
            Some(r) => r,
            None => self.default.clone().ok_or_else(|| {
                AppError::verification(
                    VerificationErrorKind::MalformedResponse,
                    "no mock response configured",
                )
            }),
        };
        if let Ok(v) = &mut result
            && self.rejected_titles.lock().unwrap().contains(&candidate.title)
        {
            v.is_valid = false;
        }
        result
    }
}

impl Verifier for MockVerifier {
    async fn verify(&self, candidate: &Candidate) -> Result<Verification, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = self.next_response(candidate);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ---------------------------------------------------------------------------
// RecordingReporter
// ---------------------------------------------------------------------------

/// Reporter that records a one-line summary of every event.
#[derive(Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
    batches_finished: AtomicUsize,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until at least `n` batches have finished.
    pub async fn wait_for_batches_finished(&self, n: usize) {
        while self.batches_finished.load(Ordering::SeqCst) < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl RunReporter for RecordingReporter {
    fn report(&self, event: RunEvent<'_>) {
        let line = match &event {
            RunEvent::RunStarted { run_id, .. } => format!("run_started {run_id}"),
            RunEvent::BatchStarted { batch_number, .. } => format!("batch_started {batch_number}"),
            RunEvent::UrlFinished { url, outcome, .. } => format!("url_finished {url} {outcome:?}"),
            RunEvent::BatchFinished {
                batch_number,
                status,
                ..
            } => {
                self.batches_finished.fetch_add(1, Ordering::SeqCst);
                format!("batch_finished {batch_number} {status}")
            }
            RunEvent::CancelRequested { run_id } => format!("cancel_requested {run_id}"),
            RunEvent::RunFinished { status, .. } => format!("run_finished {status}"),
        };
        self.events.lock().unwrap().push(line);
    }
}
