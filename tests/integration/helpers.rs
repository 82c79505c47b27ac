//! Helper functions for integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use urbanpulse::SampleKind;
use urbanpulse::collector::Collector;
use urbanpulse::config::{Config, LocationConfig, SourceConfig, SourcesConfig};
use urbanpulse::gateway::{ApiClient, RetryPolicy};
use urbanpulse::storage::memory::MemoryBackend;
use urbanpulse::storage::{
    HealthStatus, SampleRow, StorageBackend, StorageResult, StorageTransaction, SummaryRow,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn fast_client() -> ApiClient {
    ApiClient::new(
        Duration::from_secs(2),
        RetryPolicy {
            retries: 2,
            backoff_factor: 2.0,
            backoff_unit: Duration::from_millis(1),
        },
    )
    .unwrap()
}

pub fn sources(server: &MockServer) -> SourcesConfig {
    SourcesConfig {
        traffic: SourceConfig {
            url: Some(format!("{}/traffic", server.uri())),
            api_key: Some("test-tomtom".to_string()),
        },
        weather: SourceConfig {
            url: Some(format!("{}/weather", server.uri())),
            api_key: Some("test-openweather".to_string()),
        },
        air_quality: SourceConfig {
            url: Some(format!("{}/air", server.uri())),
            api_key: None,
        },
    }
}

/// Config whose tickers stay quiet after the startup cycle
pub fn test_config(server: &MockServer) -> Config {
    let mut config = Config {
        sources: sources(server),
        ..Config::default()
    };
    config.schedule.collection_interval_secs = 3600;
    config.schedule.aggregation_interval_secs = 3600;
    config
}

pub fn collector(server: &MockServer, storage: Arc<dyn StorageBackend>) -> Arc<Collector> {
    Arc::new(Collector::new(
        fast_client(),
        storage,
        LocationConfig::default(),
        sources(server),
    ))
}

pub async fn mount_traffic(server: &MockServer, current_speed: f64) {
    Mock::given(method("GET"))
        .and(path("/traffic"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "flowSegmentData": {
                "currentSpeed": current_speed,
                "freeFlowSpeed": 40.0,
                "confidence": 0.9,
                "roadClosure": false
            }
        })))
        .mount(server)
        .await;
}

pub async fn mount_weather(server: &MockServer, temperature: f64) {
    Mock::given(method("GET"))
        .and(path("/weather"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "main": { "temp": temperature, "humidity": 55 },
            "weather": [{ "main": "Haze" }]
        })))
        .mount(server)
        .await;
}

pub async fn mount_air(server: &MockServer, pm25: f64) {
    Mock::given(method("GET"))
        .and(path("/air"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "hourly": {
                "pm2_5": [pm25],
                "pm10": [80.0],
                "carbon_monoxide": [300.0],
                "nitrogen_dioxide": [20.0],
                "ozone": [15.0]
            }
        })))
        .mount(server)
        .await;
}

pub async fn mount_all_sources(server: &MockServer) {
    mount_traffic(server, 20.0).await;
    mount_weather(server, 27.0).await;
    mount_air(server, 45.0).await;
}

/// Memory storage that panics on demand
#[derive(Default)]
pub struct FlakyBackend {
    pub inner: MemoryBackend,
    pub panic_on_insert: AtomicBool,
    pub panic_on_traffic_insert: AtomicBool,
    pub panic_on_begin: AtomicBool,
}

#[async_trait]
impl StorageBackend for FlakyBackend {
    async fn insert_sample(&self, sample: SampleRow) -> StorageResult<()> {
        if self.panic_on_insert.load(Ordering::SeqCst) {
            panic!("insert exploded");
        }
        if sample.kind() == SampleKind::Traffic && self.panic_on_traffic_insert.load(Ordering::SeqCst)
        {
            panic!("traffic insert exploded");
        }
        self.inner.insert_sample(sample).await
    }

    async fn query_samples(
        &self,
        kind: SampleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SampleRow>> {
        self.inner.query_samples(kind, start, end).await
    }

    async fn query_latest_samples(
        &self,
        kind: SampleKind,
        limit: usize,
    ) -> StorageResult<Vec<SampleRow>> {
        self.inner.query_latest_samples(kind, limit).await
    }

    async fn query_recent_summaries(
        &self,
        kind: SampleKind,
        limit: usize,
    ) -> StorageResult<Vec<SummaryRow>> {
        self.inner.query_recent_summaries(kind, limit).await
    }

    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        if self.panic_on_begin.load(Ordering::SeqCst) {
            panic!("begin exploded");
        }
        self.inner.begin().await
    }

    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.cleanup_old_samples(before).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn get_stats(&self) -> StorageResult<String> {
        self.inner.get_stats().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}
