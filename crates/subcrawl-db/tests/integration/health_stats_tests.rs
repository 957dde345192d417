use std::time::Duration;

use subcrawl_core::config::HealthThresholds;
use subcrawl_core::health::HealthMonitor;
use subcrawl_core::models::HealthStatus;
use subcrawl_core::stats::{RegionCounters, StatsAggregator};
use subcrawl_core::traits::{HealthStore, SourceStore, StatsStore};

use crate::common::setup_test_db;

#[tokio::test]
async fn health_record_upserts_and_orders_by_failures() {
    let (db, _container) = setup_test_db().await;
    let a = db.insert_source("Seoul", "https://seoul.go.kr/1").await.unwrap();
    let b = db.insert_source("Seoul", "https://seoul.go.kr/2").await.unwrap();

    let monitor = HealthMonitor::new(db.clone(), HealthThresholds::default());
    monitor
        .record_success(a.id, Some(Duration::from_millis(120)))
        .await
        .unwrap();
    for _ in 0..3 {
        monitor.record_failure(b.id, "HTTP 503", None).await.unwrap();
    }

    let record_a = db.load_health(a.id).await.unwrap().unwrap();
    assert_eq!(record_a.status, HealthStatus::Healthy);
    assert_eq!(record_a.last_latency_ms, Some(120));
    assert!(record_a.last_success_at.is_some());

    let record_b = db.load_health(b.id).await.unwrap().unwrap();
    assert_eq!(record_b.consecutive_failures, 3);
    assert_eq!(record_b.total_failures, 3);
    assert_eq!(record_b.status, HealthStatus::Degraded);
    assert_eq!(record_b.last_error.as_deref(), Some("HTTP 503"));

    let listed = db.list_health().await.unwrap();
    assert_eq!(listed[0].source_id, b.id);

    monitor.record_success(b.id, None).await.unwrap();
    let recovered = db.load_health(b.id).await.unwrap().unwrap();
    assert_eq!(recovered.consecutive_failures, 0);
    assert_eq!(recovered.total_failures, 3);
    assert_eq!(recovered.status, HealthStatus::Healthy);
}

#[tokio::test]
async fn region_counters_accumulate_across_flushes() {
    let (db, _container) = setup_test_db().await;

    let delta = RegionCounters {
        runs: 1,
        processed: 4,
        verified: 2,
        rejected: 1,
        errored: 1,
        latency_ms_total: 400,
        latency_samples: 4,
    };
    db.add_region_counters("Seoul", &delta).await.unwrap();
    db.add_region_counters("Seoul", &delta).await.unwrap();
    db.add_region_counters("Busan", &RegionCounters { runs: 1, ..Default::default() })
        .await
        .unwrap();

    let seoul = db.list_region_counters(Some("Seoul")).await.unwrap();
    assert_eq!(seoul.len(), 1);
    assert_eq!(seoul[0].1.processed, 8);
    assert_eq!(seoul[0].1.latency_ms_total, 800);

    let stats = StatsAggregator::new(db.clone()).by_region(None).await.unwrap();
    assert_eq!(stats.len(), 2);
    // Busan has processed nothing, so it sorts first with a zero success rate.
    assert_eq!(stats[0].region_name, "Busan");
    assert_eq!(stats[0].success_rate, 0.0);
    assert_eq!(stats[1].success_rate, 0.75);
    assert_eq!(stats[1].avg_latency_ms, Some(100));
}
