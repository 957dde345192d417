use subcrawl_core::error::AppError;
use subcrawl_core::models::Scope;
use subcrawl_core::traits::SourceStore;

use crate::common::setup_test_db;

#[tokio::test]
async fn insert_and_list_sources_in_region_order() {
    let (db, _container) = setup_test_db().await;

    db.insert_source("Seoul", "https://seoul.go.kr/b").await.unwrap();
    db.insert_source("Busan", "https://busan.go.kr/a").await.unwrap();
    db.insert_source("Seoul", "https://seoul.go.kr/a").await.unwrap();

    let all = db.list_sources(&Scope::All, true).await.unwrap();
    let urls: Vec<&str> = all.iter().map(|s| s.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://busan.go.kr/a",
            "https://seoul.go.kr/a",
            "https://seoul.go.kr/b"
        ]
    );

    let seoul = db
        .list_sources(&Scope::regions(["Seoul"]), true)
        .await
        .unwrap();
    assert_eq!(seoul.len(), 2);
    assert!(seoul.iter().all(|s| s.region_name == "Seoul"));
}

#[tokio::test]
async fn duplicate_active_source_is_rejected() {
    let (db, _container) = setup_test_db().await;

    db.insert_source("Seoul", "https://seoul.go.kr/a").await.unwrap();
    let err = db
        .insert_source("Seoul", "https://seoul.go.kr/a")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DuplicateSource { .. }));

    // Same URL under another region is a distinct source.
    db.insert_source("Busan", "https://seoul.go.kr/a").await.unwrap();
}

#[tokio::test]
async fn deactivated_source_is_hidden_and_can_be_re_registered() {
    let (db, _container) = setup_test_db().await;

    let source = db.insert_source("Seoul", "https://seoul.go.kr/a").await.unwrap();
    let deactivated = db.deactivate_source(source.id).await.unwrap();
    assert!(!deactivated.is_active);

    assert!(db.list_sources(&Scope::All, true).await.unwrap().is_empty());
    assert_eq!(db.list_sources(&Scope::All, false).await.unwrap().len(), 1);

    db.insert_source("Seoul", "https://seoul.go.kr/a").await.unwrap();
    assert_eq!(db.list_sources(&Scope::All, true).await.unwrap().len(), 1);
}

#[tokio::test]
async fn deactivate_unknown_source_is_not_found() {
    let (db, _container) = setup_test_db().await;
    let err = db.deactivate_source(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
