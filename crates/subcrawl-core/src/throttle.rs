//! Per-origin politeness for source fetching.
//!
//! Wraps any [`Fetcher`] so that two requests to the same origin never start
//! closer together than the configured interval, no matter how many batches
//! or workers fetch concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::error::AppError;
use crate::traits::Fetcher;

/// A [`Fetcher`] wrapper that enforces a per-origin start interval.
///
/// Each caller reserves the next free start slot for its origin while
/// holding the lock, then sleeps outside the lock until that slot. Slots are
/// handed out strictly `interval` apart, so concurrent callers queue up
/// instead of racing on a shared "last request" timestamp.
#[derive(Clone)]
pub struct ThrottledFetcher<F> {
    inner: F,
    interval: Duration,
    /// Start time reserved by the most recent request per origin.
    next_slot: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: Fetcher> ThrottledFetcher<F> {
    pub fn new(inner: F, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            next_slot: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the origin key from a URL (scheme://host:port).
    fn origin_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    async fn reserve(&self, origin: &str) -> Instant {
        let now = Instant::now();
        let mut slots = self.next_slot.lock().await;
        let slot = match slots.get(origin) {
            Some(&previous) => std::cmp::max(now, previous + self.interval),
            None => now,
        };
        slots.insert(origin.to_string(), slot);
        slot
    }
}

impl<F: Fetcher> Fetcher for ThrottledFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<String, AppError> {
        if let Some(origin) = Self::origin_key(url) {
            let slot = self.reserve(&origin).await;
            let wait = slot.saturating_duration_since(Instant::now());
            if !wait.is_zero() {
                tracing::debug!(%origin, wait_ms = wait.as_millis() as u64, "Politeness delay");
                tokio::time::sleep_until(slot).await;
            }
        }
        self.inner.fetch(url).await
    }

    fn preflight(&self) -> Result<(), AppError> {
        self.inner.preflight()
    }
}
