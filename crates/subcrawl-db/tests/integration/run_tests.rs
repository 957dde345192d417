use chrono::Utc;
use uuid::Uuid;

use subcrawl_core::models::Scope;
use subcrawl_core::run::{
    BatchStatus, ErrorStage, Run, RunFilter, RunStatus, Totals, UrlError, partition,
};
use subcrawl_core::traits::{RunStore, SourceStore};

use crate::common::setup_test_db;

fn new_run(scope: Scope) -> Run {
    Run {
        id: Uuid::new_v4(),
        status: RunStatus::Pending,
        scope,
        started_at: Utc::now(),
        finished_at: None,
        totals: Totals::default(),
    }
}

#[tokio::test]
async fn create_run_with_batches_and_read_back() {
    let (db, _container) = setup_test_db().await;

    for i in 0..5 {
        db.insert_source("Seoul", &format!("https://seoul.go.kr/notice/{i}"))
            .await
            .unwrap();
    }
    let sources = db.list_sources(&Scope::All, true).await.unwrap();

    let run = new_run(Scope::regions(["Seoul"]));
    let batches = partition(run.id, &sources, 2);
    db.create_run(&run, &batches).await.unwrap();

    let stored = db.get_run(run.id).await.unwrap().expect("run should exist");
    assert_eq!(stored.status, RunStatus::Pending);
    assert_eq!(stored.scope, Scope::regions(["Seoul"]));

    let stored_batches = db.list_batches(run.id).await.unwrap();
    assert_eq!(stored_batches.len(), 3);
    assert_eq!(
        stored_batches.iter().map(|b| b.batch_number).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(stored_batches[0].items, batches[0].items);
    assert_eq!(stored_batches[2].items.len(), 1);
}

#[tokio::test]
async fn status_totals_and_batch_state_updates() {
    let (db, _container) = setup_test_db().await;
    let source = db.insert_source("Seoul", "https://seoul.go.kr/1").await.unwrap();

    let run = new_run(Scope::All);
    let mut batches = partition(run.id, &[source], 5);
    db.create_run(&run, &batches).await.unwrap();

    db.update_run_status(run.id, RunStatus::Running, None)
        .await
        .unwrap();

    let batch = &mut batches[0];
    batch.status = BatchStatus::Done;
    batch.started_at = Some(Utc::now());
    batch.finished_at = Some(Utc::now());
    batch.totals = Totals {
        discovered: 1,
        processed: 1,
        verified: 1,
        rejected: 0,
        errored: 0,
    };
    db.save_batch_state(batch).await.unwrap();
    db.update_run_totals(run.id, &batch.totals).await.unwrap();

    let finished_at = Utc::now();
    db.update_run_status(run.id, RunStatus::Completed, Some(finished_at))
        .await
        .unwrap();

    let stored = db.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
    assert!(stored.finished_at.is_some());
    assert_eq!(stored.totals.verified, 1);

    let stored_batch = &db.list_batches(run.id).await.unwrap()[0];
    assert_eq!(stored_batch.status, BatchStatus::Done);
    assert_eq!(stored_batch.totals, batch.totals);
}

#[tokio::test]
async fn list_runs_filters_and_orders_newest_first() {
    let (db, _container) = setup_test_db().await;

    let mut first = new_run(Scope::regions(["Seoul"]));
    first.started_at = Utc::now() - chrono::Duration::minutes(10);
    let second = new_run(Scope::regions(["Busan"]));
    let third = new_run(Scope::All);
    for run in [&first, &second, &third] {
        db.create_run(run, &[]).await.unwrap();
    }
    db.update_run_status(first.id, RunStatus::Cancelled, Some(Utc::now()))
        .await
        .unwrap();

    let all = db.list_runs(&RunFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all.last().unwrap().id, first.id);

    let cancelled = db
        .list_runs(&RunFilter {
            status: Some(RunStatus::Cancelled),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].id, first.id);

    // A region filter also matches runs over every region.
    let busan = db
        .list_runs(&RunFilter {
            region: Some("Busan".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    let ids: Vec<Uuid> = busan.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&second.id) && ids.contains(&third.id));

    let limited = db
        .list_runs(&RunFilter {
            limit: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn url_errors_are_listed_in_insertion_order() {
    let (db, _container) = setup_test_db().await;
    let source = db.insert_source("Seoul", "https://seoul.go.kr/1").await.unwrap();
    let run = new_run(Scope::All);
    let batches = partition(run.id, std::slice::from_ref(&source), 5);
    db.create_run(&run, &batches).await.unwrap();

    for (stage, message) in [(ErrorStage::Fetch, "HTTP 503"), (ErrorStage::Parse, "empty page")] {
        db.record_url_error(&UrlError {
            run_id: run.id,
            batch_id: batches[0].id,
            source_id: source.id,
            url: source.url.clone(),
            stage,
            message: message.into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    }

    let errors = db.list_url_errors(run.id).await.unwrap();
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].stage, ErrorStage::Fetch);
    assert_eq!(errors[1].message, "empty page");
    assert!(db.list_url_errors(Uuid::new_v4()).await.unwrap().is_empty());
}
