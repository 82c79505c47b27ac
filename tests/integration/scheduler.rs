//! Scheduler tests: manual triggers, crash isolation and shutdown

use std::sync::Arc;
use std::sync::atomic::Ordering;

use urbanpulse::SampleKind;
use urbanpulse::actors::scheduler::Scheduler;
use urbanpulse::aggregator::Aggregator;
use urbanpulse::collector::SourceOutcome;
use urbanpulse::storage::StorageBackend;
use urbanpulse::storage::memory::MemoryBackend;
use wiremock::MockServer;

use crate::helpers::*;

#[tokio::test]
async fn test_manual_triggers_run_full_pipeline() {
    let server = MockServer::start().await;
    mount_all_sources(&server).await;

    let storage = Arc::new(MemoryBackend::new());
    let config = test_config(&server);
    let scheduler = Scheduler::start(
        collector(&server, storage.clone()),
        Arc::new(Aggregator::new(storage.clone())),
        &config,
    );

    let report = scheduler.collector.collect_now().await.unwrap();
    assert_eq!(report.stored(), 3);

    let report = scheduler.aggregator.aggregate_now(Some(20)).await.unwrap();
    assert_eq!(report.summaries_written(), 3);

    for kind in SampleKind::ALL {
        let summaries = storage.query_recent_summaries(kind, 10).await.unwrap();
        assert_eq!(summaries.len(), 1, "one {kind} summary expected");
    }

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_collector_survives_panicking_cycle() {
    let server = MockServer::start().await;
    mount_all_sources(&server).await;

    let storage = Arc::new(FlakyBackend::default());
    storage.panic_on_insert.store(true, Ordering::SeqCst);

    let config = test_config(&server);
    let scheduler = Scheduler::start(
        collector(&server, storage.clone()),
        Arc::new(Aggregator::new(storage.clone())),
        &config,
    );

    let report = scheduler.collector.collect_now().await.unwrap();
    assert_eq!(report.stored(), 0);
    for kind in SampleKind::ALL {
        assert!(
            matches!(report.outcome(kind), SourceOutcome::Failed(msg) if msg.contains("panicked")),
            "unexpected {kind} outcome: {:?}",
            report.outcome(kind)
        );
    }

    // the aggregator keeps working while inserts panic
    assert!(scheduler.aggregator.aggregate_now(Some(20)).await.is_ok());

    storage.panic_on_insert.store(false, Ordering::SeqCst);
    let report = scheduler.collector.collect_now().await.unwrap();
    assert_eq!(report.stored(), 3);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_source_does_not_lose_the_others() {
    let server = MockServer::start().await;
    mount_all_sources(&server).await;

    let storage = Arc::new(FlakyBackend::default());
    storage.panic_on_traffic_insert.store(true, Ordering::SeqCst);

    let report = collector(&server, storage.clone()).collect_cycle().await;

    assert!(
        matches!(&report.traffic, SourceOutcome::Failed(msg) if msg.contains("traffic insert exploded"))
    );
    assert!(report.weather.is_stored());
    assert!(report.air_quality.is_stored());

    for (kind, expected) in [
        (SampleKind::Traffic, 0),
        (SampleKind::Weather, 1),
        (SampleKind::AirQuality, 1),
    ] {
        let stored = storage.query_latest_samples(kind, 10).await.unwrap();
        assert_eq!(stored.len(), expected, "{kind} samples");
    }
}

#[tokio::test]
async fn test_aggregator_survives_panicking_cycle() {
    let server = MockServer::start().await;
    mount_all_sources(&server).await;

    let storage = Arc::new(FlakyBackend::default());
    storage.panic_on_begin.store(true, Ordering::SeqCst);

    let config = test_config(&server);
    let scheduler = Scheduler::start(
        collector(&server, storage.clone()),
        Arc::new(Aggregator::new(storage.clone())),
        &config,
    );

    assert!(scheduler.aggregator.aggregate_now(None).await.is_err());

    let report = scheduler.collector.collect_now().await.unwrap();
    assert_eq!(report.stored(), 3);

    storage.panic_on_begin.store(false, Ordering::SeqCst);
    let report = scheduler.aggregator.aggregate_now(None).await.unwrap();
    assert!(report.summaries_written() >= 3);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_triggers_fail_after_shutdown() {
    let server = MockServer::start().await;
    mount_all_sources(&server).await;

    let storage = Arc::new(MemoryBackend::new());
    let config = test_config(&server);
    let scheduler = Scheduler::start(
        collector(&server, storage.clone()),
        Arc::new(Aggregator::new(storage.clone())),
        &config,
    );

    scheduler.shutdown().await.unwrap();

    assert!(scheduler.collector.collect_now().await.is_err());
    assert!(scheduler.aggregator.aggregate_now(Some(20)).await.is_err());
}
