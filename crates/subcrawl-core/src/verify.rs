use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::config::RetryPolicy;
use crate::error::{AppError, VerificationErrorKind};
use crate::models::{Candidate, Verification};
use crate::traits::Verifier;

/// Verifier wrapper that bounds concurrent AI calls and retries rate limits.
///
/// The permit is held only for the call itself, never across a backoff
/// sleep, so a rate-limited worker does not starve the others.
#[derive(Clone)]
pub struct GatedVerifier<V> {
    inner: V,
    gate: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl<V: Verifier> GatedVerifier<V> {
    pub fn new(inner: V, max_concurrent: usize, retry: RetryPolicy) -> Self {
        Self {
            inner,
            gate: Arc::new(Semaphore::new(max_concurrent.max(1))),
            retry,
        }
    }

    pub async fn verify(&self, candidate: &Candidate) -> Result<Verification, AppError> {
        let mut attempt = 0;
        loop {
            let result = {
                let _permit = self
                    .gate
                    .acquire()
                    .await
                    .map_err(|e| AppError::Config(format!("AI gate closed: {e}")))?;
                self.inner.verify(candidate).await
            };

            match result {
                Ok(v) => return Ok(v.clamp_confidence()),
                Err(AppError::Verification {
                    kind: VerificationErrorKind::RateLimited,
                    message,
                }) if attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        url = %candidate.source_url,
                        %message,
                        delay_ms = delay.as_millis() as u64,
                        "AI verifier rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
