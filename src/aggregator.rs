//! Hourly aggregation of raw samples
//!
//! An aggregation cycle reads the samples of a time window, groups them by
//! logical key, averages every metric and upserts one summary per
//! `(kind, logical_key, hour_start)`. Re-running a cycle over the same
//! samples overwrites the same rows, so repeated runs never double count.
//!
//! All three kinds are folded inside one storage transaction: either every
//! summary of the cycle is committed or none is.
//!
//! Two entry points exist:
//!
//! - [`Aggregator::aggregate_cycle`]: the trailing window (20 minutes by
//!   default), written to the hour bucket the window starts in.
//! - [`Aggregator::aggregate_pending`]: every whole hour between the last
//!   committed run and now, each written to its own bucket. This is what
//!   the scheduler uses, so samples between two widely spaced runs are not
//!   skipped.
//!
//! A trailing-window run writes a partial hour. It moves the catch-up
//! watermark back to its bucket so the next pending run restores the full
//! hour.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Timelike, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::SampleKind;
use crate::storage::{
    MetricMeans, SampleRow, StorageBackend, StorageResult, StorageTransaction, SummaryRow,
};

/// Closed interval `[start, end]` of sample timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// The `minutes` leading up to `end`
    pub fn trailing(end: DateTime<Utc>, minutes: i64) -> Self {
        Self {
            start: end - Duration::minutes(minutes),
            end,
        }
    }

    /// Bucket every summary of this window is written to
    pub fn hour_bucket(&self) -> DateTime<Utc> {
        truncate_to_hour(self.start)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }
}

pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// One window per hour from the hour containing `from` up to `now`
///
/// Each window spans its whole hour (the last one is cut at `now`). The
/// upper bound stops a millisecond short of the next hour so a sample on
/// the hour is counted exactly once; sample timestamps never carry more
/// than millisecond precision.
pub fn hourly_windows(from: DateTime<Utc>, now: DateTime<Utc>) -> Vec<(TimeWindow, DateTime<Utc>)> {
    let mut windows = Vec::new();
    let mut hour = truncate_to_hour(from);
    while hour <= now {
        let end = (hour + Duration::hours(1) - Duration::milliseconds(1)).min(now);
        windows.push((TimeWindow { start: hour, end }, hour));
        hour += Duration::hours(1);
    }
    windows
}

/// Group samples by logical key and average every metric
///
/// Absent metric values are skipped when averaging; a metric absent from
/// every sample of a group has no mean. The sample count includes every
/// sample of the group.
pub fn summarize(
    kind: SampleKind,
    samples: &[SampleRow],
    hour_start: DateTime<Utc>,
    updated_at: DateTime<Utc>,
) -> Vec<SummaryRow> {
    let mut groups: BTreeMap<String, Vec<&SampleRow>> = BTreeMap::new();
    for sample in samples.iter().filter(|s| s.kind() == kind) {
        groups
            .entry(sample.reading.logical_key())
            .or_default()
            .push(sample);
    }

    groups
        .into_iter()
        .map(|(logical_key, members)| {
            let mut sums: BTreeMap<&'static str, (f64, u32)> = BTreeMap::new();
            for sample in &members {
                for (name, value) in sample.reading.metrics() {
                    let entry = sums.entry(name).or_insert((0.0, 0));
                    if let Some(v) = value {
                        entry.0 += v;
                        entry.1 += 1;
                    }
                }
            }

            let metrics: MetricMeans = sums
                .into_iter()
                .map(|(name, (sum, n))| (name.to_string(), (n > 0).then(|| sum / n as f64)))
                .collect();

            SummaryRow {
                kind,
                logical_key,
                hour_start,
                metrics,
                samples: members.len() as u32,
                updated_at,
            }
        })
        .collect()
}

/// Result of aggregating one kind for one hour bucket
#[derive(Debug, Clone, PartialEq)]
pub struct TableOutcome {
    pub kind: SampleKind,
    pub hour_start: DateTime<Utc>,
    /// Summaries written; zero means the kind was skipped
    pub groups: usize,
    pub samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationReport {
    pub tables: Vec<TableOutcome>,
}

impl AggregationReport {
    pub fn summaries_written(&self) -> usize {
        self.tables.iter().map(|t| t.groups).sum()
    }
}

/// Folds raw samples into hourly summaries
///
/// Cycles are serialized: a cycle holds the internal lock from the first
/// read until commit or rollback, whether it was started by the scheduler
/// or triggered manually.
pub struct Aggregator {
    storage: Arc<dyn StorageBackend>,

    /// End of the last committed pending run, truncated to the hour
    watermark: Mutex<Option<DateTime<Utc>>>,
}

impl Aggregator {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            watermark: Mutex::new(None),
        }
    }

    /// Aggregate the trailing `window_minutes` up to now
    pub async fn aggregate_cycle(&self, window_minutes: i64) -> StorageResult<AggregationReport> {
        self.aggregate_cycle_at(Utc::now(), window_minutes).await
    }

    #[instrument(skip(self))]
    pub async fn aggregate_cycle_at(
        &self,
        now: DateTime<Utc>,
        window_minutes: i64,
    ) -> StorageResult<AggregationReport> {
        let mut watermark = self.watermark.lock().await;
        let window = TimeWindow::trailing(now, window_minutes);
        let bucket = window.hour_bucket();
        info!(
            "starting aggregation cycle for {} to {}",
            window.start, window.end
        );

        let report = self.run(&[(window, bucket)], now).await?;
        if watermark.is_some_and(|mark| bucket < mark) {
            debug!("moving catch-up watermark back to {bucket}");
            *watermark = Some(bucket);
        }
        Ok(report)
    }

    /// Re-aggregate every whole hour from the hour containing `from` to `now`
    ///
    /// Unlike [`Aggregator::aggregate_cycle_at`] every touched bucket is
    /// rebuilt from its full hour. The watermark is left alone.
    #[instrument(skip(self))]
    pub async fn refold_since(
        &self,
        now: DateTime<Utc>,
        from: DateTime<Utc>,
    ) -> StorageResult<AggregationReport> {
        let _guard = self.watermark.lock().await;
        let windows = hourly_windows(from, now);
        info!(
            "re-aggregating {} hour buckets from {}",
            windows.len(),
            truncate_to_hour(from)
        );
        self.run(&windows, now).await
    }

    /// Aggregate every hour since the last committed pending run
    ///
    /// Without a previous run, `lookback` before `now` is used as the
    /// starting point.
    #[instrument(skip(self))]
    pub async fn aggregate_pending(
        &self,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> StorageResult<AggregationReport> {
        let mut watermark = self.watermark.lock().await;
        let from = watermark.unwrap_or(now - lookback);
        let windows = hourly_windows(from, now);
        info!(
            "starting catch-up aggregation over {} hour buckets from {}",
            windows.len(),
            truncate_to_hour(from)
        );

        let report = self.run(&windows, now).await?;
        *watermark = Some(truncate_to_hour(now));
        Ok(report)
    }

    /// Delete raw samples older than `retention_days` before `now`
    ///
    /// Summaries are never pruned. Runs under the cycle lock so a cycle
    /// never sees half of a window deleted.
    pub async fn prune_samples(
        &self,
        now: DateTime<Utc>,
        retention_days: u32,
    ) -> StorageResult<usize> {
        let _guard = self.watermark.lock().await;
        let cutoff = now - Duration::days(i64::from(retention_days));
        let removed = self.storage.cleanup_old_samples(cutoff).await?;
        info!("pruned {removed} samples older than {cutoff}");
        Ok(removed)
    }

    async fn run(
        &self,
        windows: &[(TimeWindow, DateTime<Utc>)],
        now: DateTime<Utc>,
    ) -> StorageResult<AggregationReport> {
        let mut tx = self.storage.begin().await?;

        match fold(tx.as_mut(), windows, now).await {
            Ok(report) => {
                tx.commit().await?;
                info!(
                    "aggregation cycle completed: {} summaries written",
                    report.summaries_written()
                );
                Ok(report)
            }
            Err(e) => {
                error!("aggregation failed, rolling back: {e}");
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("rollback failed: {rollback_err}");
                }
                Err(e)
            }
        }
    }
}

async fn fold(
    tx: &mut dyn StorageTransaction,
    windows: &[(TimeWindow, DateTime<Utc>)],
    now: DateTime<Utc>,
) -> StorageResult<AggregationReport> {
    let mut report = AggregationReport::default();

    for (window, hour_start) in windows {
        for kind in SampleKind::ALL {
            let samples = tx.query_samples(kind, window.start, window.end).await?;
            debug!(%kind, "{} rows fetched for {}", samples.len(), hour_start);

            let summaries = summarize(kind, &samples, *hour_start, now);
            if summaries.is_empty() {
                warn!(%kind, "no recent data for {}; skipping", hour_start);
            }

            let groups = summaries.len();
            for summary in summaries {
                tx.upsert_summary(summary).await?;
            }

            report.tables.push(TableOutcome {
                kind,
                hour_start: *hour_start,
                groups,
                samples: samples.len(),
            });
        }
    }

    Ok(report)
}
