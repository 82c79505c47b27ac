//! In-memory storage backend (no persistence)
//!
//! Used when no database is configured and as the backend for tests.
//! All data is lost on restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend, StorageTransaction};
use super::error::StorageResult;
use super::schema::{SampleRow, SummaryRow};
use crate::SampleKind;

type SummaryKey = (SampleKind, String, DateTime<Utc>);

#[derive(Default)]
struct MemoryState {
    /// Samples per kind, in insertion order
    samples: HashMap<SampleKind, Vec<SampleRow>>,

    summaries: BTreeMap<SummaryKey, SummaryRow>,
}

impl MemoryState {
    fn samples_in(
        &self,
        kind: SampleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<SampleRow> {
        let mut rows: Vec<SampleRow> = self
            .samples
            .get(&kind)
            .map(|rows| {
                rows.iter()
                    .filter(|s| s.timestamp >= start && s.timestamp <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // stable, so insertion order breaks ties like the SQLite id does
        rows.sort_by_key(|s| s.timestamp);
        rows
    }
}

/// In-memory storage backend
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_sample(&self, sample: SampleRow) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.samples.entry(sample.kind()).or_default().push(sample);
        Ok(())
    }

    async fn query_samples(
        &self,
        kind: SampleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SampleRow>> {
        debug!("querying in-memory samples for {kind}");
        Ok(self.state.read().await.samples_in(kind, start, end))
    }

    async fn query_latest_samples(
        &self,
        kind: SampleKind,
        limit: usize,
    ) -> StorageResult<Vec<SampleRow>> {
        let state = self.state.read().await;
        let mut rows: Vec<SampleRow> = state.samples.get(&kind).cloned().unwrap_or_default();
        rows.sort_by_key(|s| s.timestamp);
        Ok(rows.into_iter().rev().take(limit).collect())
    }

    async fn query_recent_summaries(
        &self,
        kind: SampleKind,
        limit: usize,
    ) -> StorageResult<Vec<SummaryRow>> {
        let state = self.state.read().await;
        let mut rows: Vec<SummaryRow> = state
            .summaries
            .values()
            .filter(|s| s.kind == kind)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.hour_start
                .cmp(&a.hour_start)
                .then_with(|| a.logical_key.cmp(&b.logical_key))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: self.state.clone(),
            staged: Vec::new(),
        }))
    }

    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut state = self.state.write().await;
        let mut deleted = 0;
        for rows in state.samples.values_mut() {
            let len = rows.len();
            rows.retain(|s| s.timestamp >= before);
            deleted += len - rows.len();
        }
        debug!("deleted {deleted} in-memory samples older than {before}");
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        let total: usize = state.samples.values().map(Vec::len).sum();
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory storage operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("total_samples".to_string(), total.to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let state = self.state.read().await;
        let total: usize = state.samples.values().map(Vec::len).sum();
        Ok(format!(
            "In-Memory: {} samples, {} hourly summaries",
            total,
            state.summaries.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}

/// Stages upserts and applies them under one write lock on commit
pub struct MemoryTransaction {
    state: Arc<RwLock<MemoryState>>,
    staged: Vec<SummaryRow>,
}

#[async_trait]
impl StorageTransaction for MemoryTransaction {
    async fn query_samples(
        &mut self,
        kind: SampleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SampleRow>> {
        Ok(self.state.read().await.samples_in(kind, start, end))
    }

    async fn upsert_summary(&mut self, summary: SummaryRow) -> StorageResult<()> {
        self.staged.push(summary);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let MemoryTransaction { state, staged } = *self;
        let mut state = state.write().await;
        for summary in staged {
            let key = (
                summary.kind,
                summary.logical_key.clone(),
                summary.hour_start,
            );
            state.summaries.insert(key, summary);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        debug!("discarding {} staged summaries", self.staged.len());
        Ok(())
    }
}
