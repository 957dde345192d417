use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Retry schedule with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait before retrying after the given failed attempt (0-indexed).
    ///
    /// `base * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }

    /// A policy that retries without sleeping, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }
}

/// Consecutive-failure thresholds for source health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub degraded_after: u32,
    pub unhealthy_after: u32,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            degraded_after: 3,
            unhealthy_after: 7,
        }
    }
}

/// Title keywords checked before a candidate reaches the verifier.
///
/// Matching is case-insensitive substring search. An empty `required` list
/// accepts every title that has no excluded keyword.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleFilter {
    pub required: Vec<String>,
    pub excluded: Vec<String>,
}

impl TitleFilter {
    pub fn new<I, S>(required: I, excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            required: keyword_list(required),
            excluded: keyword_list(excluded),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.required.is_empty() || !self.excluded.is_empty()
    }

    /// Why `title` is turned away, or `None` when it passes.
    pub fn rejection(&self, title: &str) -> Option<String> {
        let title = title.to_lowercase();
        if let Some(k) = self.excluded.iter().find(|k| title.contains(k.as_str())) {
            return Some(format!("title contains excluded keyword '{k}'"));
        }
        if !self.required.is_empty() && !self.required.iter().any(|k| title.contains(k.as_str())) {
            return Some("title contains no required keyword".to_string());
        }
        None
    }
}

fn keyword_list<I, S>(keywords: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keywords
        .into_iter()
        .map(|k| k.as_ref().trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Tuning knobs of the crawl pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of sources per batch.
    pub chunk_size: usize,
    /// Concurrent URLs within one batch.
    pub url_concurrency: usize,
    /// Concurrent batches within one run.
    pub batch_concurrency: usize,
    /// Concurrent AI verification calls across all runs.
    pub ai_concurrency: usize,
    /// Minimum gap between two fetch starts against the same origin.
    pub politeness_interval: Duration,
    pub fetch_retry: RetryPolicy,
    pub verify_retry: RetryPolicy,
    pub persist_retry: RetryPolicy,
    pub health: HealthThresholds,
    /// Keyword gate in front of the verifier; disabled by default.
    pub title_filter: TitleFilter,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            url_concurrency: 5,
            batch_concurrency: 2,
            ai_concurrency: 2,
            politeness_interval: Duration::from_millis(1000),
            fetch_retry: RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(8)),
            verify_retry: RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(30)),
            persist_retry: RetryPolicy::new(2, Duration::from_millis(200), Duration::from_secs(1)),
            health: HealthThresholds::default(),
            title_filter: TitleFilter::default(),
        }
    }
}

impl PipelineConfig {
    /// Read configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// - `SUBCRAWL_CHUNK_SIZE` (default 5)
    /// - `SUBCRAWL_URL_CONCURRENCY` (default 5)
    /// - `SUBCRAWL_BATCH_CONCURRENCY` (default 2)
    /// - `SUBCRAWL_AI_CONCURRENCY` (default 2)
    /// - `SUBCRAWL_POLITENESS_MS` (default 1000)
    /// - `SUBCRAWL_FETCH_BASE_DELAY_MS` (default 500)
    /// - `SUBCRAWL_FETCH_MAX_DELAY_MS` (default 8000)
    /// - `SUBCRAWL_DEGRADED_AFTER` (default 3)
    /// - `SUBCRAWL_UNHEALTHY_AFTER` (default 7)
    /// - `SUBCRAWL_REQUIRED_KEYWORDS`, `SUBCRAWL_EXCLUDED_KEYWORDS`
    ///   (comma-separated, default empty)
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let chunk_size = positive_var("SUBCRAWL_CHUNK_SIZE", defaults.chunk_size)?;
        let url_concurrency = positive_var("SUBCRAWL_URL_CONCURRENCY", defaults.url_concurrency)?;
        let batch_concurrency =
            positive_var("SUBCRAWL_BATCH_CONCURRENCY", defaults.batch_concurrency)?;
        let ai_concurrency = positive_var("SUBCRAWL_AI_CONCURRENCY", defaults.ai_concurrency)?;
        let politeness_ms = env_var::<u64>("SUBCRAWL_POLITENESS_MS")?.unwrap_or(1000);
        let base_ms = env_var::<u64>("SUBCRAWL_FETCH_BASE_DELAY_MS")?.unwrap_or(500);
        let max_ms = env_var::<u64>("SUBCRAWL_FETCH_MAX_DELAY_MS")?.unwrap_or(8000);
        let degraded_after = positive_var("SUBCRAWL_DEGRADED_AFTER", 3u32)?;
        let unhealthy_after = positive_var("SUBCRAWL_UNHEALTHY_AFTER", 7u32)?;

        let required = std::env::var("SUBCRAWL_REQUIRED_KEYWORDS").unwrap_or_default();
        let excluded = std::env::var("SUBCRAWL_EXCLUDED_KEYWORDS").unwrap_or_default();
        let title_filter = TitleFilter::new(required.split(','), excluded.split(','));

        if unhealthy_after < degraded_after {
            return Err(AppError::Config(format!(
                "SUBCRAWL_UNHEALTHY_AFTER ({unhealthy_after}) must not be below SUBCRAWL_DEGRADED_AFTER ({degraded_after})"
            )));
        }

        Ok(Self {
            chunk_size,
            url_concurrency,
            batch_concurrency,
            ai_concurrency,
            politeness_interval: Duration::from_millis(politeness_ms),
            fetch_retry: RetryPolicy::new(
                3,
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
            ),
            health: HealthThresholds {
                degraded_after,
                unhealthy_after,
            },
            title_filter,
            ..defaults
        })
    }
}

fn env_var<T: FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match std::env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::Config(format!("Invalid {name} '{raw}'"))),
    }
}

fn positive_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr + PartialOrd + Default,
{
    match env_var::<T>(name)? {
        None => Ok(default),
        Some(v) if v > T::default() => Ok(v),
        Some(_) => Err(AppError::Config(format!("{name} must be at least 1"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(3));
    }

    #[test]
    fn test_max_attempts_is_at_least_one() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.chunk_size, 5);
        assert_eq!(config.fetch_retry.max_attempts, 3);
        assert_eq!(config.verify_retry.max_attempts, 3);
        assert_eq!(config.persist_retry.max_attempts, 2);
        assert_eq!(config.health, HealthThresholds::default());
        assert!(!config.title_filter.is_enabled());
    }

    #[test]
    fn test_title_filter() {
        let filter = TitleFilter::new(vec!["IoT", " 방지시설 "], vec!["채용", "결과"]);
        assert_eq!(filter.rejection("2025년 IoT 방지시설 설치 지원사업"), None);
        assert_eq!(filter.rejection("iot 측정기기 보급"), None);
        assert!(filter.rejection("IoT 지원사업 선정 결과 안내").unwrap().contains("결과"));
        assert!(filter.rejection("전기차 구매 보조금").is_some());

        let open = TitleFilter::new(vec![], vec!["채용", "입찰"]);
        assert_eq!(open.rejection("전기차 구매 보조금 지원"), None);
        assert!(open.rejection("기간제 직원 채용 공고").is_some());
        assert_eq!(TitleFilter::new(vec![""], vec![" "]), TitleFilter::default());
    }
}
