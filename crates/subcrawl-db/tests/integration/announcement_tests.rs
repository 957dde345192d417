use chrono::NaiveDate;

use subcrawl_core::config::RetryPolicy;
use subcrawl_core::dedup::StoreWriter;
use subcrawl_core::error::AppError;
use subcrawl_core::models::{
    AnnouncementWrite, ApplicationPeriod, Candidate, NewLogEntry, Verification,
    VerificationStatus, WriteDecision,
};
use subcrawl_core::traits::AnnouncementStore;

use crate::common::setup_test_db;

fn write(fingerprint: &str, confidence: f64) -> AnnouncementWrite {
    AnnouncementWrite {
        region_name: "Seoul".into(),
        title: "전기차 구매 보조금".into(),
        content: "신청기간 2025.03.01 ~ 2025.03.31".into(),
        application_period: ApplicationPeriod {
            start: NaiveDate::from_ymd_opt(2025, 3, 1),
            end: NaiveDate::from_ymd_opt(2025, 3, 31),
        },
        budget_amount: Some(1_200_000_000),
        source_url: "https://seoul.go.kr/notice/1".into(),
        fingerprint: fingerprint.into(),
        verification_status: VerificationStatus::Verified,
        ai_confidence: confidence,
        raw_dates: vec!["2025.03.01".into(), "2025.03.31".into()],
        raw_budget_text: Some("예산: 총 12억 원".into()),
    }
}

fn candidate() -> Candidate {
    Candidate {
        source_url: "https://seoul.go.kr/notice/1".into(),
        title: "전기차 구매 보조금".into(),
        raw_dates: vec!["2025.03.01".into()],
        raw_budget_text: None,
        body_text: "전기차 구매 보조금 신청기간 2025.03.01".into(),
    }
}

fn verification(confidence: f64) -> Verification {
    Verification {
        is_valid: true,
        normalized_dates: ApplicationPeriod {
            start: NaiveDate::from_ymd_opt(2025, 3, 1),
            end: None,
        },
        normalized_budget: None,
        confidence,
        reasoning: format!("confidence {confidence}"),
        matched_criteria: vec!["application_period".into()],
    }
}

#[tokio::test]
async fn insert_round_trips_and_fingerprint_is_unique() {
    let (db, _container) = setup_test_db().await;

    let stored = db.insert_announcement(&write("fp-1", 0.7)).await.unwrap();
    assert_eq!(stored.fingerprint, "fp-1");
    assert_eq!(stored.budget_amount, Some(1_200_000_000));
    assert_eq!(stored.raw_dates.len(), 2);
    assert_eq!(
        stored.application_period.end,
        NaiveDate::from_ymd_opt(2025, 3, 31)
    );

    let found = db.find_by_fingerprint("fp-1").await.unwrap().unwrap();
    assert_eq!(found, stored);

    let err = db.insert_announcement(&write("fp-1", 0.9)).await.unwrap_err();
    assert!(matches!(err, AppError::FingerprintConflict(_)));
}

#[tokio::test]
async fn update_only_applies_when_confidence_is_not_lower() {
    let (db, _container) = setup_test_db().await;
    let stored = db.insert_announcement(&write("fp-1", 0.8)).await.unwrap();

    let lower = db
        .update_announcement(stored.id, &write("fp-1", 0.5))
        .await
        .unwrap();
    assert!(lower.is_none());

    let mut higher = write("fp-1", 0.95);
    higher.title = "전기차 구매 보조금 (수정)".into();
    let updated = db
        .update_announcement(stored.id, &higher)
        .await
        .unwrap()
        .expect("guard should hold");
    assert_eq!(updated.id, stored.id);
    assert_eq!(updated.title, "전기차 구매 보조금 (수정)");
    assert_eq!(updated.ai_confidence, 0.95);
    assert_eq!(updated.created_at, stored.created_at);
}

#[tokio::test]
async fn log_is_append_only_and_filterable() {
    let (db, _container) = setup_test_db().await;
    let stored = db.insert_announcement(&write("fp-1", 0.8)).await.unwrap();

    for (announcement_id, decision) in [
        (Some(stored.id), WriteDecision::Inserted),
        (None, WriteDecision::Rejected),
        (Some(stored.id), WriteDecision::Skipped),
    ] {
        db.append_log(&NewLogEntry {
            announcement_id,
            run_id: None,
            source_url: "https://seoul.go.kr/notice/1".into(),
            input_snippet: "snippet".into(),
            ai_result: serde_json::json!({"is_valid": true}),
            confidence: 0.8,
            decision,
        })
        .await
        .unwrap();
    }

    let all = db.list_log(None, 10).await.unwrap();
    assert_eq!(
        all.iter().map(|e| e.decision).collect::<Vec<_>>(),
        vec![
            WriteDecision::Inserted,
            WriteDecision::Rejected,
            WriteDecision::Skipped
        ]
    );

    let for_announcement = db.list_log(Some(stored.id), 10).await.unwrap();
    assert_eq!(for_announcement.len(), 2);
    assert_eq!(for_announcement[0].ai_result["is_valid"], true);

    // Past the limit the newest entries are returned, still oldest first.
    let newest = db.list_log(None, 2).await.unwrap();
    assert_eq!(
        newest.iter().map(|e| e.decision).collect::<Vec<_>>(),
        vec![WriteDecision::Rejected, WriteDecision::Skipped]
    );
    assert_eq!(newest[1].id, all[2].id);
    let latest_for_announcement = db.list_log(Some(stored.id), 1).await.unwrap();
    assert_eq!(latest_for_announcement[0].decision, WriteDecision::Skipped);
}

#[tokio::test]
async fn concurrent_writers_keep_the_highest_confidence() {
    let (db, _container) = setup_test_db().await;
    let writer = StoreWriter::new(db.clone(), RetryPolicy::immediate(2));

    let confidences = [0.4, 0.9, 0.6, 0.75, 0.5, 0.85];
    let handles: Vec<_> = confidences
        .iter()
        .map(|&confidence| {
            let writer = writer.clone();
            tokio::spawn(async move {
                writer
                    .write(None, "Seoul", &candidate(), &verification(confidence))
                    .await
            })
        })
        .collect();

    let mut inserted = 0;
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.decision == WriteDecision::Inserted {
            inserted += 1;
        }
    }
    assert_eq!(inserted, 1);

    let log = db.list_log(None, 100).await.unwrap();
    assert_eq!(log.len(), confidences.len());

    let id = log[0].announcement_id.expect("valid writes reference the announcement");
    let stored = db.get_announcement(id).await.unwrap().unwrap();
    assert_eq!(stored.ai_confidence, 0.9);
    assert!(log.iter().all(|e| e.announcement_id == Some(id)));
}
