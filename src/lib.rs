pub mod actors;
pub mod aggregator;
pub mod aqi;
pub mod collector;
pub mod config;
pub mod gateway;
pub mod storage;
pub mod util;

use serde::{Deserialize, Serialize};

/// The three kinds of data the pipeline collects.
///
/// Raw samples and hourly summaries of every kind share the same storage
/// tables and are told apart by this discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Traffic,
    Weather,
    AirQuality,
}

impl SampleKind {
    pub const ALL: [SampleKind; 3] = [
        SampleKind::Traffic,
        SampleKind::Weather,
        SampleKind::AirQuality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Traffic => "traffic",
            SampleKind::Weather => "weather",
            SampleKind::AirQuality => "air_quality",
        }
    }
}

impl std::fmt::Display for SampleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SampleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traffic" => Ok(SampleKind::Traffic),
            "weather" => Ok(SampleKind::Weather),
            "air_quality" => Ok(SampleKind::AirQuality),
            other => Err(format!("unknown sample kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficReading {
    pub latitude: f64,
    pub longitude: f64,
    /// km/h
    pub current_speed: Option<f64>,
    /// km/h
    pub free_flow_speed: Option<f64>,
    pub confidence: Option<f64>,
    pub road_closure: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherReading {
    pub city: String,
    /// Celsius
    pub temperature: Option<f64>,
    /// Percent
    pub humidity: Option<f64>,
    pub condition: Option<String>,
}

/// Pollutant concentrations in µg/m³ plus the index derived from PM2.5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirQualityReading {
    pub city: String,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub co: Option<f64>,
    pub no2: Option<f64>,
    pub o3: Option<f64>,
    pub aqi: Option<f64>,
}

/// One reading from one of the external APIs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reading {
    Traffic(TrafficReading),
    Weather(WeatherReading),
    AirQuality(AirQualityReading),
}

impl Reading {
    pub fn kind(&self) -> SampleKind {
        match self {
            Reading::Traffic(_) => SampleKind::Traffic,
            Reading::Weather(_) => SampleKind::Weather,
            Reading::AirQuality(_) => SampleKind::AirQuality,
        }
    }

    /// Identifier of the place the reading was taken at, unrounded.
    pub fn source_key(&self) -> String {
        match self {
            Reading::Traffic(t) => format!("{},{}", t.latitude, t.longitude),
            Reading::Weather(w) => w.city.clone(),
            Reading::AirQuality(a) => a.city.clone(),
        }
    }

    /// Key that hourly summaries are grouped by.
    ///
    /// Coordinates are rounded to 4 decimal places so jitter in the reported
    /// position does not split a location into several groups.
    pub fn logical_key(&self) -> String {
        match self {
            Reading::Traffic(t) => format!("{:.4},{:.4}", t.latitude, t.longitude),
            Reading::Weather(w) => w.city.clone(),
            Reading::AirQuality(a) => a.city.clone(),
        }
    }

    /// Numeric metrics that get averaged into hourly summaries
    pub fn metrics(&self) -> Vec<(&'static str, Option<f64>)> {
        match self {
            Reading::Traffic(t) => vec![
                ("current_speed", t.current_speed),
                ("free_flow_speed", t.free_flow_speed),
                ("confidence", t.confidence),
            ],
            Reading::Weather(w) => vec![
                ("temperature", w.temperature),
                ("humidity", w.humidity),
            ],
            Reading::AirQuality(a) => vec![
                ("pm25", a.pm25),
                ("pm10", a.pm10),
                ("co", a.co),
                ("no2", a.no2),
                ("o3", a.o3),
                ("aqi", a.aqi),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_logical_key_rounds_coordinates() {
        let reading = Reading::Traffic(TrafficReading {
            latitude: 12.971_649,
            longitude: 77.594_551,
            current_speed: Some(20.0),
            free_flow_speed: None,
            confidence: None,
            road_closure: Some(false),
        });

        assert_eq!(reading.logical_key(), "12.9716,77.5946");
        assert_eq!(reading.source_key(), "12.971649,77.594551");
        assert_eq!(reading.kind(), SampleKind::Traffic);
    }

    #[test]
    fn test_city_keys() {
        let reading = Reading::Weather(WeatherReading {
            city: "Bangalore".to_string(),
            temperature: Some(24.0),
            humidity: Some(60.0),
            condition: Some("Clouds".to_string()),
        });

        assert_eq!(reading.logical_key(), "Bangalore");
        assert_eq!(reading.metrics().len(), 2);
    }

    #[test]
    fn test_sample_kind_round_trips_through_str() {
        for kind in SampleKind::ALL {
            assert_eq!(kind.to_string().parse::<SampleKind>(), Ok(kind));
        }
        assert!("pollen".parse::<SampleKind>().is_err());
    }

    #[test]
    fn test_reading_serializes_with_kind_tag() {
        let reading = Reading::AirQuality(AirQualityReading {
            city: "Bangalore".to_string(),
            pm25: Some(42.0),
            pm10: None,
            co: None,
            no2: None,
            o3: None,
            aqi: Some(70.0),
        });

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["kind"], "air_quality");
        assert_eq!(json["pm25"], 42.0);
    }
}
