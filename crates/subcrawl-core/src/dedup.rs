use std::future::Future;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::RetryPolicy;
use crate::error::AppError;
use crate::models::{
    Announcement, AnnouncementWrite, Candidate, NewLogEntry, Verification, VerificationLogEntry,
    WriteDecision, compute_hash,
};
use crate::traits::AnnouncementStore;

/// Rounds of find/insert/update before giving up on a fingerprint that keeps
/// changing under concurrent writers.
const MAX_CONFLICT_ROUNDS: usize = 5;

/// Characters of candidate text kept in a log entry.
const SNIPPET_CHARS: usize = 500;

/// Lowercase, drop punctuation and collapse whitespace.
pub fn normalize_text(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Content fingerprint of an announcement.
///
/// Two candidates with the same region, title and primary date after
/// normalization share a fingerprint.
pub fn fingerprint(region: &str, title: &str, primary_date: Option<NaiveDate>) -> String {
    let date = primary_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    compute_hash(&format!(
        "{}\u{1f}{}\u{1f}{}",
        normalize_text(region),
        normalize_text(title),
        date
    ))
}

/// Run `op`, retrying persistence failures according to `policy`.
pub(crate) async fn retry_persistence<T, Op, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: Op,
) -> Result<T, AppError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(AppError::Persistence(message)) if attempt + 1 < policy.max_attempts => {
                tracing::warn!(%what, %message, "Persistence failed, retrying");
                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Result of writing one verified candidate.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub decision: WriteDecision,
    pub announcement: Option<Announcement>,
    pub log_entry: VerificationLogEntry,
}

/// Decides insert, update or skip for verified candidates and keeps the
/// verification log.
///
/// Check-then-act races between workers are settled by the store's unique
/// fingerprint constraint and a guarded update: a lost race sends the writer
/// back to re-read and compare again.
#[derive(Clone)]
pub struct StoreWriter<S> {
    store: S,
    retry: RetryPolicy,
}

impl<S: AnnouncementStore> StoreWriter<S> {
    pub fn new(store: S, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Write a candidate the verifier has answered for.
    ///
    /// Invalid candidates only get a log entry. Exactly one log entry is
    /// appended per call.
    pub async fn write(
        &self,
        run_id: Option<Uuid>,
        region_name: &str,
        candidate: &Candidate,
        verification: &Verification,
    ) -> Result<WriteOutcome, AppError> {
        let (decision, announcement) = if verification.is_valid {
            let fp = fingerprint(
                region_name,
                &candidate.title,
                verification.normalized_dates.primary_date(),
            );
            let write = AnnouncementWrite::from_verified(region_name, candidate, verification, fp);
            let (decision, announcement) = self.upsert(&write).await?;
            (decision, Some(announcement))
        } else {
            (WriteDecision::Rejected, None)
        };

        let log_entry = self
            .log(
                run_id,
                announcement.as_ref().map(|a| a.id),
                candidate,
                verification,
                decision,
            )
            .await?;

        Ok(WriteOutcome {
            decision,
            announcement,
            log_entry,
        })
    }

    /// Apply a fresh verification of an existing announcement.
    ///
    /// Same comparison as [`write`](Self::write), but targeted at one id and
    /// never moving the record to another fingerprint.
    pub async fn rewrite(
        &self,
        existing: &Announcement,
        verification: &Verification,
    ) -> Result<WriteOutcome, AppError> {
        let candidate = existing.to_candidate();
        let mut write = AnnouncementWrite::from_verified(
            &existing.region_name,
            &candidate,
            verification,
            existing.fingerprint.clone(),
        );
        // Keep dates the verifier no longer reports, rather than erasing them.
        if write.application_period.start.is_none() && write.application_period.end.is_none() {
            write.application_period = existing.application_period;
        }
        if write.budget_amount.is_none() {
            write.budget_amount = existing.budget_amount;
        }

        let mut current = existing.clone();
        let mut resolved = None;
        for _ in 0..MAX_CONFLICT_ROUNDS {
            if let Some(result) = self.compare_and_update(&current, &write).await? {
                resolved = Some(result);
                break;
            }
            current = retry_persistence(&self.retry, "get_announcement", || {
                self.store.get_announcement(existing.id)
            })
            .await?
            .ok_or_else(|| AppError::NotFound(format!("announcement {}", existing.id)))?;
        }
        let (decision, announcement) = resolved.ok_or_else(|| {
            AppError::Persistence(format!(
                "announcement {} kept changing under concurrent writers",
                existing.id
            ))
        })?;

        let log_entry = self
            .log(None, Some(announcement.id), &candidate, verification, decision)
            .await?;

        Ok(WriteOutcome {
            decision,
            announcement: Some(announcement),
            log_entry,
        })
    }

    async fn upsert(
        &self,
        write: &AnnouncementWrite,
    ) -> Result<(WriteDecision, Announcement), AppError> {
        for _ in 0..MAX_CONFLICT_ROUNDS {
            let existing = retry_persistence(&self.retry, "find_by_fingerprint", || {
                self.store.find_by_fingerprint(&write.fingerprint)
            })
            .await?;

            match existing {
                None => {
                    let inserted = retry_persistence(&self.retry, "insert_announcement", || {
                        self.store.insert_announcement(write)
                    })
                    .await;
                    match inserted {
                        Ok(announcement) => return Ok((WriteDecision::Inserted, announcement)),
                        Err(AppError::FingerprintConflict(fp)) => {
                            tracing::debug!(fingerprint = %fp, "Lost insert race, comparing again");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Some(existing) => {
                    if let Some(result) = self.compare_and_update(&existing, write).await? {
                        return Ok(result);
                    }
                }
            }
        }

        Err(AppError::Persistence(format!(
            "fingerprint {} kept changing under concurrent writers",
            write.fingerprint
        )))
    }

    /// Highest confidence wins; ties go to the new write unless nothing
    /// would change. `None` means the stored record moved and the caller
    /// must re-read.
    async fn compare_and_update(
        &self,
        existing: &Announcement,
        write: &AnnouncementWrite,
    ) -> Result<Option<(WriteDecision, Announcement)>, AppError> {
        if existing.ai_confidence > write.ai_confidence {
            return Ok(Some((WriteDecision::Skipped, existing.clone())));
        }
        if existing.matches_write(write) {
            return Ok(Some((WriteDecision::Unchanged, existing.clone())));
        }

        let updated = retry_persistence(&self.retry, "update_announcement", || {
            self.store.update_announcement(existing.id, write)
        })
        .await?;
        Ok(updated.map(|a| (WriteDecision::Updated, a)))
    }

    async fn log(
        &self,
        run_id: Option<Uuid>,
        announcement_id: Option<Uuid>,
        candidate: &Candidate,
        verification: &Verification,
        decision: WriteDecision,
    ) -> Result<VerificationLogEntry, AppError> {
        let entry = NewLogEntry {
            announcement_id,
            run_id,
            source_url: candidate.source_url.clone(),
            input_snippet: candidate.snippet(SNIPPET_CHARS),
            ai_result: serde_json::to_value(verification)?,
            confidence: verification.confidence,
            decision,
        };
        retry_persistence(&self.retry, "append_log", || self.store.append_log(&entry)).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{ApplicationPeriod, VerificationStatus};
    use crate::testutil::{candidate, verification};

    fn writer(store: &MemoryStore) -> StoreWriter<MemoryStore> {
        StoreWriter::new(store.clone(), RetryPolicy::immediate(2))
    }

    #[test]
    fn normalization_ignores_case_and_punctuation() {
        assert_eq!(normalize_text("  Clean-Air  SUBSIDY! "), "clean air subsidy");
        assert_eq!(normalize_text("2025년 전기차 보급사업"), "2025년 전기차 보급사업");
    }

    #[test]
    fn fingerprint_matches_normalized_inputs() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1);
        assert_eq!(
            fingerprint("Seoul", "EV Subsidy", date),
            fingerprint(" seoul ", "ev  subsidy!", date)
        );
        assert_ne!(
            fingerprint("Seoul", "EV Subsidy", date),
            fingerprint("Busan", "EV Subsidy", date)
        );
        assert_ne!(
            fingerprint("Seoul", "EV Subsidy", date),
            fingerprint("Seoul", "EV Subsidy", None)
        );
    }

    #[tokio::test]
    async fn higher_confidence_wins_and_logs_each_candidate() {
        let store = MemoryStore::new();
        let writer = writer(&store);
        let c = candidate("https://seoul.go.kr/1", "EV Subsidy");

        let first = writer
            .write(None, "Seoul", &c, &verification(true, 0.6))
            .await
            .unwrap();
        let second = writer
            .write(None, "Seoul", &c, &verification(true, 0.9))
            .await
            .unwrap();

        assert_eq!(first.decision, WriteDecision::Inserted);
        assert_eq!(second.decision, WriteDecision::Updated);
        let first_id = first.announcement.unwrap().id;
        assert_eq!(second.announcement.as_ref().unwrap().id, first_id);

        let all = store.all_announcements().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].ai_confidence, 0.9);
        assert_eq!(store.list_log(None, 100).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn lower_confidence_is_skipped_but_logged() {
        let store = MemoryStore::new();
        let writer = writer(&store);
        let c = candidate("https://seoul.go.kr/1", "EV Subsidy");

        writer
            .write(None, "Seoul", &c, &verification(true, 0.9))
            .await
            .unwrap();
        let mut lower = c.clone();
        lower.body_text = "different body".into();
        let skipped = writer
            .write(None, "Seoul", &lower, &verification(true, 0.5))
            .await
            .unwrap();

        assert_eq!(skipped.decision, WriteDecision::Skipped);
        let stored = &store.all_announcements().await[0];
        assert_eq!(stored.ai_confidence, 0.9);
        assert_ne!(stored.content, "different body");
        assert_eq!(skipped.log_entry.announcement_id, Some(stored.id));
    }

    #[tokio::test]
    async fn identical_write_is_unchanged() {
        let store = MemoryStore::new();
        let writer = writer(&store);
        let c = candidate("https://seoul.go.kr/1", "EV Subsidy");
        let v = verification(true, 0.8);

        writer.write(None, "Seoul", &c, &v).await.unwrap();
        let before = store.all_announcements().await[0].updated_at;
        let again = writer.write(None, "Seoul", &c, &v).await.unwrap();

        assert_eq!(again.decision, WriteDecision::Unchanged);
        assert_eq!(store.all_announcements().await[0].updated_at, before);
    }

    #[tokio::test]
    async fn invalid_candidate_is_logged_without_announcement() {
        let store = MemoryStore::new();
        let writer = writer(&store);
        let c = candidate("https://seoul.go.kr/1", "Office hours notice");

        let outcome = writer
            .write(None, "Seoul", &c, &verification(false, 0.95))
            .await
            .unwrap();

        assert_eq!(outcome.decision, WriteDecision::Rejected);
        assert!(outcome.announcement.is_none());
        assert!(store.all_announcements().await.is_empty());
        assert_eq!(outcome.log_entry.announcement_id, None);
    }

    #[tokio::test]
    async fn concurrent_writers_leave_one_announcement() {
        let store = MemoryStore::new();
        let writer = writer(&store);
        let c = candidate("https://seoul.go.kr/1", "EV Subsidy");

        let tasks: Vec<_> = [0.3, 0.7, 0.5, 0.9, 0.1]
            .into_iter()
            .map(|conf| {
                let writer = writer.clone();
                let c = c.clone();
                tokio::spawn(async move {
                    writer
                        .write(None, "Seoul", &c, &verification(true, conf))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let all = store.all_announcements().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].ai_confidence, 0.9);
        assert_eq!(store.list_log(None, 100).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn persistence_failure_is_retried_once() {
        let store = MemoryStore::new();
        let writer = writer(&store);
        store.fail_next_writes(1).await;

        let outcome = writer
            .write(
                None,
                "Seoul",
                &candidate("https://seoul.go.kr/1", "EV Subsidy"),
                &verification(true, 0.7),
            )
            .await
            .unwrap();
        assert_eq!(outcome.decision, WriteDecision::Inserted);

        store.fail_next_writes(2).await;
        let err = writer
            .write(
                None,
                "Seoul",
                &candidate("https://seoul.go.kr/2", "Solar Subsidy"),
                &verification(true, 0.7),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Persistence(_)));
    }

    #[tokio::test]
    async fn rewrite_keeps_id_and_fingerprint() {
        let store = MemoryStore::new();
        let writer = writer(&store);
        let c = candidate("https://seoul.go.kr/1", "EV Subsidy");
        let stored = writer
            .write(None, "Seoul", &c, &verification(true, 0.6))
            .await
            .unwrap()
            .announcement
            .unwrap();

        let mut v = verification(true, 0.8);
        v.normalized_dates = ApplicationPeriod {
            start: NaiveDate::from_ymd_opt(2030, 1, 1),
            end: None,
        };
        let outcome = writer.rewrite(&stored, &v).await.unwrap();

        let updated = outcome.announcement.unwrap();
        assert_eq!(outcome.decision, WriteDecision::Updated);
        assert_eq!(updated.id, stored.id);
        assert_eq!(updated.fingerprint, stored.fingerprint);
        assert_eq!(updated.verification_status, VerificationStatus::Verified);
        assert_eq!(updated.ai_confidence, 0.8);
    }
}
