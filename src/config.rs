use std::path::PathBuf;

use anyhow::{Context, bail};
use serde::Deserialize;
use tracing::trace;

use crate::util::{self, parse_var};

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Raw samples older than this are deleted. Unset keeps them forever.
        #[serde(default)]
        retention_days: Option<u32>,
    },
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => *retention_days,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: None,
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./urbanpulse.db")
}

/// Where traffic, weather and air quality are sampled
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            latitude: 12.9716,
            longitude: 77.5946,
            city: "Bangalore".to_string(),
        }
    }
}

/// Endpoint override and credential for one external API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    /// Falls back to the public endpoint of the provider
    pub url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub traffic: SourceConfig,
    pub weather: SourceConfig,
    pub air_quality: SourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub timeout_secs: u64,
    /// Attempts spent on rate limiting and network failures
    pub retries: u32,
    /// Backoff before retry `n` (0-based) is `backoff_factor^n` seconds
    pub backoff_factor: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            retries: 3,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub collection_interval_secs: u64,
    pub aggregation_interval_secs: u64,
    pub aggregation_window_minutes: i64,
    /// Aggregate every hour since the last run instead of only the
    /// trailing window
    pub catch_up: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            collection_interval_secs: 410,
            aggregation_interval_secs: 2 * 60 * 60,
            aggregation_window_minutes: 20,
            catch_up: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub sources: SourcesConfig,
    pub gateway: GatewayConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load the configuration file if given, then apply environment overrides
    pub fn load(path: Option<&str>) -> anyhow::Result<Config> {
        let mut config = match path {
            Some(path) => read_config_file(path)?,
            None => Config::default(),
        };
        config.apply_overrides(util::env_var);
        config.validate()?;
        trace!("effective config: {config:?}");
        Ok(config)
    }

    /// Override values from key/value lookups (normally the environment)
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(latitude) = parse_var(&lookup, util::LATITUDE) {
            self.location.latitude = latitude;
        }
        if let Some(longitude) = parse_var(&lookup, util::LONGITUDE) {
            self.location.longitude = longitude;
        }
        if let Some(city) = lookup(util::CITY) {
            self.location.city = city;
        }
        if let Some(key) = lookup(util::TOMTOM_KEY) {
            self.sources.traffic.api_key = Some(key);
        }
        if let Some(key) = lookup(util::OPENWEATHER_KEY) {
            self.sources.weather.api_key = Some(key);
        }
        if let Some(url) = lookup(util::OPEN_METEO_URL) {
            self.sources.air_quality.url = Some(url);
        }
        if let Some(interval) = parse_var::<f64>(&lookup, util::COLLECTION_INTERVAL) {
            self.schedule.collection_interval_secs = interval.round() as u64;
        }
        if let Some(path) = lookup(util::DATABASE_PATH) {
            let retention_days = self.storage.retention_days();
            self.storage = StorageConfig::Sqlite {
                path: PathBuf::from(path),
                retention_days,
            };
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let schedule = &self.schedule;
        if schedule.collection_interval_secs == 0 {
            bail!("collection interval must be positive");
        }
        if schedule.aggregation_interval_secs == 0 {
            bail!("aggregation interval must be positive");
        }
        if schedule.aggregation_window_minutes <= 0 {
            bail!("aggregation window must be positive");
        }
        if self.gateway.retries == 0 {
            bail!("gateway needs at least one attempt");
        }
        if !self.gateway.backoff_factor.is_finite() || self.gateway.backoff_factor < 1.0 {
            bail!(
                "backoff factor must be a finite number >= 1, got {}",
                self.gateway.backoff_factor
            );
        }
        if !(-90.0..=90.0).contains(&self.location.latitude)
            || !(-180.0..=180.0).contains(&self.location.longitude)
        {
            bail!(
                "invalid coordinates: {},{}",
                self.location.latitude,
                self.location.longitude
            );
        }
        Ok(())
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
