//! One collection cycle across the three data sources
//!
//! Traffic, weather and air quality are fetched and persisted independently.
//! A failure in one source is logged and recorded in the report; it never
//! stops the other two and never fails the cycle as a whole.
//!
//! ```text
//! collect_cycle ─┬─ TomTom flow segment ──→ TrafficReading    ─→ insert_sample
//!                ├─ OpenWeather current  ──→ WeatherReading    ─→ insert_sample
//!                └─ Open-Meteo hourly    ──→ AirQualityReading ─→ insert_sample
//! ```

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, instrument, warn};

use crate::actors::guarded;
use crate::aqi::{AqiCategory, compute_aqi};
use crate::config::{LocationConfig, SourcesConfig};
use crate::gateway::ApiClient;
use crate::storage::{SampleRow, StorageBackend};
use crate::{AirQualityReading, Reading, SampleKind, TrafficReading, WeatherReading};

pub const TOMTOM_FLOW_URL: &str =
    "https://api.tomtom.com/traffic/services/4/flowSegmentData/absolute/10/json";
pub const OPENWEATHER_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const OPEN_METEO_URL: &str = "https://air-quality-api.open-meteo.com/v1/air-quality";

const AIR_QUALITY_SERIES: &str = "pm10,pm2_5,carbon_monoxide,nitrogen_dioxide,ozone";

#[derive(Debug, Deserialize)]
struct FlowResponse {
    #[serde(rename = "flowSegmentData", default)]
    flow_segment_data: FlowSegmentData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlowSegmentData {
    current_speed: Option<f64>,
    free_flow_speed: Option<f64>,
    confidence: Option<f64>,
    road_closure: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    #[serde(default)]
    main: WeatherMain,
    #[serde(default)]
    weather: Vec<WeatherCondition>,
}

#[derive(Debug, Default, Deserialize)]
struct WeatherMain {
    temp: Option<f64>,
    humidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WeatherCondition {
    main: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    hourly: HourlySeries,
}

/// Hourly forecast series; entries and whole series may be missing
#[derive(Debug, Deserialize)]
struct HourlySeries {
    #[serde(default)]
    pm2_5: Vec<Option<f64>>,
    #[serde(default)]
    pm10: Vec<Option<f64>>,
    #[serde(default)]
    carbon_monoxide: Vec<Option<f64>>,
    #[serde(default)]
    nitrogen_dioxide: Vec<Option<f64>>,
    #[serde(default)]
    ozone: Vec<Option<f64>>,
}

impl HourlySeries {
    fn is_empty(&self) -> bool {
        [
            &self.pm2_5,
            &self.pm10,
            &self.carbon_monoxide,
            &self.nitrogen_dioxide,
            &self.ozone,
        ]
        .iter()
        .all(|series| series.is_empty())
    }
}

fn latest(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

/// What happened to one source during a cycle
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Stored(SampleRow),
    Failed(String),
}

impl SourceOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, SourceOutcome::Stored(_))
    }

    fn from_result(kind: SampleKind, result: Result<Result<SampleRow>>) -> Self {
        match result.and_then(|inner| inner) {
            Ok(row) => SourceOutcome::Stored(row),
            Err(e) => {
                error!(source = %kind, "collection failed: {e:#}");
                SourceOutcome::Failed(format!("{e:#}"))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectionReport {
    pub started_at: DateTime<Utc>,
    pub traffic: SourceOutcome,
    pub weather: SourceOutcome,
    pub air_quality: SourceOutcome,
}

impl CollectionReport {
    pub fn outcome(&self, kind: SampleKind) -> &SourceOutcome {
        match kind {
            SampleKind::Traffic => &self.traffic,
            SampleKind::Weather => &self.weather,
            SampleKind::AirQuality => &self.air_quality,
        }
    }

    /// Number of sources that produced a stored sample
    pub fn stored(&self) -> usize {
        SampleKind::ALL
            .iter()
            .filter(|kind| self.outcome(**kind).is_stored())
            .count()
    }

    /// Category of the stored air quality sample, if any
    pub fn aqi_category(&self) -> Option<AqiCategory> {
        match &self.air_quality {
            SourceOutcome::Stored(SampleRow {
                reading: Reading::AirQuality(air),
                ..
            }) => Some(AqiCategory::from_index(air.aqi)),
            _ => None,
        }
    }
}

/// Fetches the configured location from every source and persists samples
pub struct Collector {
    client: ApiClient,
    storage: Arc<dyn StorageBackend>,
    location: LocationConfig,
    sources: SourcesConfig,
}

impl Collector {
    pub fn new(
        client: ApiClient,
        storage: Arc<dyn StorageBackend>,
        location: LocationConfig,
        sources: SourcesConfig,
    ) -> Self {
        Self {
            client,
            storage,
            location,
            sources,
        }
    }

    /// Run one full collection cycle
    ///
    /// The three sources run concurrently. The returned report tells which
    /// of them stored a sample; this method itself never fails.
    #[instrument(skip(self), fields(city = %self.location.city))]
    pub async fn collect_cycle(&self) -> CollectionReport {
        let started_at = Utc::now();
        info!("collecting all data at {}", started_at.format("%Y-%m-%d %H:%M:%S UTC"));

        let (traffic, weather, air_quality) = tokio::join!(
            guarded("traffic collection", self.collect_traffic()),
            guarded("weather collection", self.collect_weather()),
            guarded("air quality collection", self.collect_air_quality()),
        );

        let report = CollectionReport {
            started_at,
            traffic: SourceOutcome::from_result(SampleKind::Traffic, traffic),
            weather: SourceOutcome::from_result(SampleKind::Weather, weather),
            air_quality: SourceOutcome::from_result(SampleKind::AirQuality, air_quality),
        };

        info!("collection cycle complete: {}/3 sources stored", report.stored());
        report
    }

    async fn collect_traffic(&self) -> Result<SampleRow> {
        let source = &self.sources.traffic;
        let key = source
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("no TomTom API key configured"))?;
        let url = source.url.as_deref().unwrap_or(TOMTOM_FLOW_URL);
        let LocationConfig {
            latitude,
            longitude,
            ..
        } = self.location;

        let payload = self
            .client
            .fetch(
                url,
                &[
                    ("point", format!("{latitude},{longitude}")),
                    ("unit", "KMPH".to_string()),
                    ("key", key),
                ],
            )
            .await
            .context("traffic fetch failed")?;

        let flow = serde_json::from_value::<FlowResponse>(payload)
            .context("unexpected traffic response")?
            .flow_segment_data;

        let reading = Reading::Traffic(TrafficReading {
            latitude,
            longitude,
            current_speed: flow.current_speed,
            free_flow_speed: flow.free_flow_speed,
            confidence: flow.confidence,
            road_closure: flow.road_closure,
        });

        let row = self.store(reading).await?;
        info!("traffic stored ({latitude}, {longitude})");
        Ok(row)
    }

    async fn collect_weather(&self) -> Result<SampleRow> {
        let source = &self.sources.weather;
        let key = source
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("no OpenWeather API key configured"))?;
        let url = source.url.as_deref().unwrap_or(OPENWEATHER_URL);
        let city = self.location.city.clone();

        let payload = self
            .client
            .fetch(
                url,
                &[
                    ("q", city.clone()),
                    ("units", "metric".to_string()),
                    ("appid", key),
                ],
            )
            .await
            .context("weather fetch failed")?;

        let weather = serde_json::from_value::<WeatherResponse>(payload)
            .context("unexpected weather response")?;

        let reading = Reading::Weather(WeatherReading {
            city,
            temperature: weather.main.temp,
            humidity: weather.main.humidity,
            condition: weather.weather.into_iter().next().and_then(|c| c.main),
        });

        let row = self.store(reading).await?;
        info!(
            "weather stored | {}: {:?}°C, {:?}%",
            self.location.city, weather.main.temp, weather.main.humidity
        );
        Ok(row)
    }

    async fn collect_air_quality(&self) -> Result<SampleRow> {
        let url = self
            .sources
            .air_quality
            .url
            .as_deref()
            .unwrap_or(OPEN_METEO_URL);
        let LocationConfig {
            latitude,
            longitude,
            ..
        } = self.location;

        let payload = self
            .client
            .fetch(
                url,
                &[
                    ("latitude", latitude.to_string()),
                    ("longitude", longitude.to_string()),
                    ("hourly", AIR_QUALITY_SERIES.to_string()),
                ],
            )
            .await
            .context("air quality fetch failed")?;

        let hourly = serde_json::from_value::<AirQualityResponse>(payload)
            .context("unexpected air quality response")?
            .hourly;

        if hourly.is_empty() {
            warn!("no hourly air quality data available");
            return Err(anyhow!("air quality response has no hourly series"));
        }

        let pm25 = latest(&hourly.pm2_5);
        let aqi = compute_aqi(pm25);

        let reading = Reading::AirQuality(AirQualityReading {
            city: self.location.city.clone(),
            pm25,
            pm10: latest(&hourly.pm10),
            co: latest(&hourly.carbon_monoxide),
            no2: latest(&hourly.nitrogen_dioxide),
            o3: latest(&hourly.ozone),
            aqi: aqi.index,
        });

        let row = self.store(reading).await?;
        info!(
            "air quality stored | {}: PM2.5={:?}, AQI={:?} ({})",
            self.location.city, pm25, aqi.index, aqi.category
        );
        Ok(row)
    }

    async fn store(&self, reading: Reading) -> Result<SampleRow> {
        let row = SampleRow::new(reading, Utc::now());
        self.storage
            .insert_sample(row.clone())
            .await
            .with_context(|| format!("failed to persist {} sample", row.kind()))?;
        Ok(row)
    }
}
