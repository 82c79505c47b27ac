//! Row definitions for raw samples and hourly summaries
//!
//! ## Layout
//!
//! All three sample kinds share one `samples` table and one
//! `hourly_summaries` table, discriminated by a `kind` column:
//!
//! - `samples`: `kind`, `source_key` and `timestamp` are typed columns for
//!   range scans; the full [`Reading`] is kept as JSON.
//! - `hourly_summaries`: unique on `(kind, logical_key, hour_start)`; metric
//!   means are kept as a JSON object so every kind fits the same row shape.
//!
//! Adding a metric to a reading therefore needs no migration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Reading, SampleKind};

/// Mean of each metric over a group; `None` when no sample reported it
pub type MetricMeans = BTreeMap<String, Option<f64>>;

/// One raw reading as written by the collector. Never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    /// When the reading was captured (always UTC, millisecond precision)
    pub timestamp: DateTime<Utc>,

    pub reading: Reading,
}

impl SampleRow {
    /// Timestamps are truncated to milliseconds, the precision storage keeps
    pub fn new(reading: Reading, timestamp: DateTime<Utc>) -> Self {
        let timestamp = DateTime::from_timestamp_millis(timestamp.timestamp_millis())
            .unwrap_or(timestamp);
        Self { timestamp, reading }
    }

    pub fn kind(&self) -> SampleKind {
        self.reading.kind()
    }

    pub fn source_key(&self) -> String {
        self.reading.source_key()
    }
}

/// Hourly rollup of the samples sharing a logical key.
///
/// At most one row exists per `(kind, logical_key, hour_start)`; writing a
/// summary for an existing key overwrites means, count and `updated_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub kind: SampleKind,

    /// Rounded coordinate pair for traffic, city name otherwise
    pub logical_key: String,

    /// Start of the hour this summary covers
    pub hour_start: DateTime<Utc>,

    pub metrics: MetricMeans,

    /// Number of samples that contributed
    pub samples: u32,

    pub updated_at: DateTime<Utc>,
}

impl SummaryRow {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied().flatten()
    }
}
