//! End-to-end tests: mocked APIs → collector → SQLite → aggregator
//!
//! These tests verify that:
//! - A collection cycle persists one sample per source
//! - Aggregation folds the cycle into hourly summaries
//! - Re-running aggregation does not duplicate or double count
//! - A failing source does not prevent the others from being stored
//! - Data survives reopening the database

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::tempdir;
use urbanpulse::SampleKind;
use urbanpulse::aggregator::Aggregator;
use urbanpulse::aqi::AqiCategory;
use urbanpulse::collector::SourceOutcome;
use urbanpulse::storage::StorageBackend;
use urbanpulse::storage::sqlite::SqliteBackend;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

#[tokio::test]
async fn test_collect_then_aggregate_into_sqlite() {
    let server = MockServer::start().await;
    mount_all_sources(&server).await;

    let temp_dir = tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(temp_dir.path().join("pulse.db")).await.unwrap());

    let collector = collector(&server, backend.clone());
    for _ in 0..2 {
        let report = collector.collect_cycle().await;
        assert_eq!(report.stored(), 3);
        assert_eq!(report.aqi_category(), Some(AqiCategory::Satisfactory));
    }

    let aggregator = Aggregator::new(backend.clone());
    let report = aggregator.aggregate_cycle(20).await.unwrap();
    assert_eq!(report.summaries_written(), 3);

    let traffic = backend
        .query_recent_summaries(SampleKind::Traffic, 10)
        .await
        .unwrap();
    assert_eq!(traffic.len(), 1);
    assert_eq!(traffic[0].logical_key, "12.9716,77.5946");
    assert_eq!(traffic[0].samples, 2);
    assert_eq!(traffic[0].metric("current_speed"), Some(20.0));

    let air = backend
        .query_recent_summaries(SampleKind::AirQuality, 10)
        .await
        .unwrap();
    assert_eq!(air[0].logical_key, "Bangalore");
    assert_eq!(air[0].metric("pm25"), Some(45.0));
    assert_eq!(air[0].metric("aqi"), Some(75.0));

    // a second cycle over the same samples rewrites the same rows
    aggregator.aggregate_cycle(20).await.unwrap();
    let again = backend
        .query_recent_summaries(SampleKind::Traffic, 10)
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].samples, 2);
    assert_eq!(again[0].metrics, traffic[0].metrics);
}

#[tokio::test]
async fn test_failing_source_is_isolated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/traffic"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_weather(&server, 30.0).await;
    mount_air(&server, 12.0).await;

    let temp_dir = tempdir().unwrap();
    let backend: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(temp_dir.path().join("pulse.db")).await.unwrap());

    let report = collector(&server, backend.clone()).collect_cycle().await;

    assert_eq!(report.stored(), 2);
    assert!(matches!(report.traffic, SourceOutcome::Failed(ref msg) if msg.contains("401")));
    assert_eq!(report.aqi_category(), Some(AqiCategory::Good));

    let traffic = backend
        .query_latest_samples(SampleKind::Traffic, 10)
        .await
        .unwrap();
    assert!(traffic.is_empty());
    let weather = backend
        .query_latest_samples(SampleKind::Weather, 10)
        .await
        .unwrap();
    assert_eq!(weather.len(), 1);
}

#[tokio::test]
async fn test_samples_and_summaries_survive_reopen() {
    let server = MockServer::start().await;
    mount_all_sources(&server).await;

    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("pulse.db");

    {
        let backend: Arc<dyn StorageBackend> =
            Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        collector(&server, backend.clone()).collect_cycle().await;
        Aggregator::new(backend.clone())
            .aggregate_cycle(20)
            .await
            .unwrap();
        backend.close().await.unwrap();
    }

    let backend = SqliteBackend::new(&db_path).await.unwrap();
    for kind in SampleKind::ALL {
        assert_eq!(backend.query_latest_samples(kind, 10).await.unwrap().len(), 1);
        assert_eq!(backend.query_recent_summaries(kind, 10).await.unwrap().len(), 1);
    }
}
