//! Storage backend trait definition
//!
//! This module defines the `StorageBackend` trait that the collector,
//! the aggregator and any read-side consumer talk to, plus the
//! `StorageTransaction` used for atomic aggregation cycles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{SampleRow, SummaryRow};
use crate::SampleKind;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// Implementations must be `Send + Sync`; a single backend is constructed
/// at startup and shared as `Arc<dyn StorageBackend>` between the
/// collection and aggregation loops.
///
/// ## Error Handling
///
/// Methods return `StorageResult<T>`. Implementations convert
/// backend-specific errors to `StorageError` variants.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append one raw sample
    async fn insert_sample(&self, sample: SampleRow) -> StorageResult<()>;

    /// Samples of one kind with `start <= timestamp <= end`, oldest first
    async fn query_samples(
        &self,
        kind: SampleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SampleRow>>;

    /// The `limit` most recent samples of one kind, newest first
    async fn query_latest_samples(
        &self,
        kind: SampleKind,
        limit: usize,
    ) -> StorageResult<Vec<SampleRow>>;

    /// The `limit` most recent summaries of one kind, ordered by hour
    /// bucket descending
    async fn query_recent_summaries(
        &self,
        kind: SampleKind,
        limit: usize,
    ) -> StorageResult<Vec<SummaryRow>>;

    /// Start a transaction
    ///
    /// Writes made through the transaction become visible only on
    /// [`StorageTransaction::commit`]. Dropping it without committing
    /// discards them.
    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>>;

    /// Delete raw samples older than the specified timestamp
    ///
    /// Summaries are never touched. Returns the number of samples deleted.
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human-readable statistics (e.g. "SQLite: 1200 samples, ...")
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

/// An open storage transaction
///
/// Used by the aggregator so that all sub-aggregations of one cycle land
/// together or not at all.
#[async_trait]
pub trait StorageTransaction: Send {
    /// Same semantics as [`StorageBackend::query_samples`], read inside the
    /// transaction
    async fn query_samples(
        &mut self,
        kind: SampleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SampleRow>>;

    /// Insert the summary, or overwrite the existing row with the same
    /// `(kind, logical_key, hour_start)`
    async fn upsert_summary(&mut self, summary: SummaryRow) -> StorageResult<()>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}
