use serde::Serialize;
use uuid::Uuid;

use crate::dedup::StoreWriter;
use crate::error::AppError;
use crate::models::{Announcement, WriteDecision};
use crate::traits::{AnnouncementStore, Verifier};
use crate::verify::GatedVerifier;

/// Result of reanalyzing one announcement.
#[derive(Debug, Clone, Serialize)]
pub struct ReanalysisOutcome {
    pub decision: WriteDecision,
    pub announcement: Announcement,
    pub log_entry_id: Uuid,
}

impl ReanalysisOutcome {
    /// True when the stored record was rewritten.
    pub fn changed(&self) -> bool {
        self.decision == WriteDecision::Updated
    }
}

/// Re-runs only the AI verifier over a stored announcement.
#[derive(Clone)]
pub struct Reanalyzer<V, S> {
    store: S,
    verifier: GatedVerifier<V>,
    writer: StoreWriter<S>,
}

impl<V: Verifier, S: AnnouncementStore> Reanalyzer<V, S> {
    pub fn new(store: S, verifier: GatedVerifier<V>, writer: StoreWriter<S>) -> Self {
        Self {
            store,
            verifier,
            writer,
        }
    }

    /// Verify the stored content again and apply the usual confidence rule.
    ///
    /// Every call appends a log entry, including when nothing changes.
    pub async fn reanalyze(&self, announcement_id: Uuid) -> Result<ReanalysisOutcome, AppError> {
        let existing = self
            .store
            .get_announcement(announcement_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("announcement {announcement_id}")))?;

        let verification = self.verifier.verify(&existing.to_candidate()).await?;
        let outcome = self.writer.rewrite(&existing, &verification).await?;

        tracing::info!(
            %announcement_id,
            decision = %outcome.decision,
            confidence = verification.confidence,
            "Announcement reanalyzed"
        );

        let announcement = outcome.announcement.unwrap_or(existing);
        Ok(ReanalysisOutcome {
            decision: outcome.decision,
            announcement,
            log_entry_id: outcome.log_entry.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::memory::MemoryStore;
    use crate::models::VerificationStatus;
    use crate::testutil::{MockVerifier, candidate, verification};

    async fn seeded(store: &MemoryStore, confidence: f64) -> Announcement {
        StoreWriter::new(store.clone(), RetryPolicy::immediate(2))
            .write(
                None,
                "Seoul",
                &candidate("https://seoul.go.kr/1", "EV Subsidy"),
                &verification(true, confidence),
            )
            .await
            .unwrap()
            .announcement
            .unwrap()
    }

    fn reanalyzer(
        store: &MemoryStore,
        verifier: MockVerifier,
    ) -> Reanalyzer<MockVerifier, MemoryStore> {
        Reanalyzer::new(
            store.clone(),
            GatedVerifier::new(verifier, 1, RetryPolicy::immediate(1)),
            StoreWriter::new(store.clone(), RetryPolicy::immediate(2)),
        )
    }

    #[tokio::test]
    async fn unchanged_response_is_idempotent_but_logged() {
        let store = MemoryStore::new();
        let stored = seeded(&store, 0.7).await;
        let r = reanalyzer(&store, MockVerifier::always(verification(true, 0.7)));

        let first = r.reanalyze(stored.id).await.unwrap();
        let second = r.reanalyze(stored.id).await.unwrap();

        assert_eq!(first.decision, WriteDecision::Unchanged);
        assert_eq!(second.decision, WriteDecision::Unchanged);
        assert!(!second.changed());
        assert_eq!(store.all_announcements().await[0], stored);

        // Seed entry plus one per reanalysis.
        let log = store.list_log(Some(stored.id), 100).await.unwrap();
        assert_eq!(log.len(), 3);
        assert_ne!(first.log_entry_id, second.log_entry_id);
    }

    #[tokio::test]
    async fn higher_confidence_updates_once() {
        let store = MemoryStore::new();
        let stored = seeded(&store, 0.6).await;
        let r = reanalyzer(&store, MockVerifier::always(verification(true, 0.9)));

        let first = r.reanalyze(stored.id).await.unwrap();
        let second = r.reanalyze(stored.id).await.unwrap();

        assert_eq!(first.decision, WriteDecision::Updated);
        assert_eq!(first.announcement.id, stored.id);
        assert_eq!(first.announcement.ai_confidence, 0.9);
        assert_eq!(second.decision, WriteDecision::Unchanged);
        assert_eq!(second.announcement.updated_at, first.announcement.updated_at);
    }

    #[tokio::test]
    async fn lower_confidence_is_skipped() {
        let store = MemoryStore::new();
        let stored = seeded(&store, 0.9).await;
        let r = reanalyzer(&store, MockVerifier::always(verification(false, 0.4)));

        let outcome = r.reanalyze(stored.id).await.unwrap();
        assert_eq!(outcome.decision, WriteDecision::Skipped);
        assert_eq!(
            outcome.announcement.verification_status,
            VerificationStatus::Verified
        );
    }

    #[tokio::test]
    async fn missing_announcement_is_not_found() {
        let store = MemoryStore::new();
        let r = reanalyzer(&store, MockVerifier::always(verification(true, 0.9)));
        let err = r.reanalyze(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
