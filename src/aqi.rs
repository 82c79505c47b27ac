//! Air Quality Index from PM2.5 (CPCB scale)
//!
//! The index is a piecewise-linear transform of the PM2.5 concentration.
//! Brackets are contiguous: each one starts where the previous one ends, so
//! the two formulas meeting at a breakpoint yield the same index.

use serde::{Deserialize, Serialize};

/// (concentration low, concentration high, index low, index high), µg/m³
const BREAKPOINTS: [(f64, f64, f64, f64); 6] = [
    (0.0, 30.0, 0.0, 50.0),
    (30.0, 60.0, 50.0, 100.0),
    (60.0, 90.0, 100.0, 200.0),
    (90.0, 120.0, 200.0, 300.0),
    (120.0, 250.0, 300.0, 400.0),
    (250.0, 500.0, 400.0, 500.0),
];

const MAX_INDEX: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Satisfactory,
    Moderate,
    Poor,
    VeryPoor,
    Severe,
    NoData,
}

impl AqiCategory {
    /// Upper bounds are inclusive
    pub fn from_index(index: Option<f64>) -> Self {
        match index {
            None => AqiCategory::NoData,
            Some(i) if i <= 50.0 => AqiCategory::Good,
            Some(i) if i <= 100.0 => AqiCategory::Satisfactory,
            Some(i) if i <= 200.0 => AqiCategory::Moderate,
            Some(i) if i <= 300.0 => AqiCategory::Poor,
            Some(i) if i <= 400.0 => AqiCategory::VeryPoor,
            Some(_) => AqiCategory::Severe,
        }
    }
}

impl std::fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            AqiCategory::Good => "Good",
            AqiCategory::Satisfactory => "Satisfactory",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Poor => "Poor",
            AqiCategory::VeryPoor => "Very Poor",
            AqiCategory::Severe => "Severe",
            AqiCategory::NoData => "No Data",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aqi {
    pub index: Option<f64>,
    pub category: AqiCategory,
}

/// Compute the index and category for a PM2.5 reading.
///
/// An absent reading gives no index and [`AqiCategory::NoData`].
/// Concentrations above the last breakpoint clamp to 500. Negative or NaN
/// readings are not physical and are treated as absent.
pub fn compute_aqi(pm25: Option<f64>) -> Aqi {
    let index = pm25.and_then(index_for);
    Aqi {
        index,
        category: AqiCategory::from_index(index),
    }
}

fn index_for(pm25: f64) -> Option<f64> {
    if pm25.is_nan() || pm25 < 0.0 {
        return None;
    }

    let index = BREAKPOINTS
        .iter()
        .find(|(bp_low, bp_high, _, _)| *bp_low <= pm25 && pm25 <= *bp_high)
        .map(|(bp_low, bp_high, idx_low, idx_high)| {
            (idx_high - idx_low) / (bp_high - bp_low) * (pm25 - bp_low) + idx_low
        })
        .unwrap_or(MAX_INDEX);

    Some(round_one_decimal(index))
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
