//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers are not blocked while the aggregator writes
//! - **Connection pooling**: Collector inserts and aggregation share a pool
//! - **Migrations**: Automatic schema versioning with sqlx
//! - **Native upsert**: `INSERT .. ON CONFLICT .. DO UPDATE` on the summary key

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite, Transaction};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, StorageBackend, StorageTransaction};
use super::error::{StorageError, StorageResult};
use super::schema::{MetricMeans, SampleRow, SummaryRow};
use crate::{Reading, SampleKind};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite for concurrent reads (WAL mode, etc.)
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use urbanpulse::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./urbanpulse.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }
}

fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn millis_to_timestamp(millis: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        StorageError::SerializationError(format!("timestamp out of range: {millis}"))
    })
}

fn sample_from_row(row: &SqliteRow) -> StorageResult<SampleRow> {
    let timestamp = millis_to_timestamp(row.try_get("timestamp")?)?;
    let reading_json: String = row.try_get("reading")?;
    let reading: Reading = serde_json::from_str(&reading_json).map_err(|e| {
        StorageError::SerializationError(format!("failed to deserialize reading: {}", e))
    })?;

    Ok(SampleRow { timestamp, reading })
}

fn summary_from_row(row: &SqliteRow) -> StorageResult<SummaryRow> {
    let kind_str: String = row.try_get("kind")?;
    let kind = kind_str
        .parse::<SampleKind>()
        .map_err(StorageError::SerializationError)?;
    let metrics_json: String = row.try_get("metrics")?;
    let metrics: MetricMeans = serde_json::from_str(&metrics_json).map_err(|e| {
        StorageError::SerializationError(format!("failed to deserialize metrics: {}", e))
    })?;

    Ok(SummaryRow {
        kind,
        logical_key: row.try_get("logical_key")?,
        hour_start: millis_to_timestamp(row.try_get("hour_start")?)?,
        metrics,
        samples: row.try_get::<i64, _>("samples")? as u32,
        updated_at: millis_to_timestamp(row.try_get("updated_at")?)?,
    })
}

async fn select_samples<'e, E>(
    executor: E,
    kind: SampleKind,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> StorageResult<Vec<SampleRow>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT timestamp, reading
        FROM samples
        WHERE kind = ? AND timestamp >= ? AND timestamp <= ?
        ORDER BY timestamp ASC, id ASC
        "#,
    )
    .bind(kind.as_str())
    .bind(timestamp_to_millis(&start))
    .bind(timestamp_to_millis(&end))
    .fetch_all(executor)
    .await?;

    rows.iter().map(sample_from_row).collect()
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, sample), fields(kind = %sample.kind()))]
    async fn insert_sample(&self, sample: SampleRow) -> StorageResult<()> {
        let reading_json = serde_json::to_string(&sample.reading).map_err(|e| {
            StorageError::SerializationError(format!("failed to serialize reading: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO samples (kind, source_key, timestamp, reading)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(sample.kind().as_str())
        .bind(sample.source_key())
        .bind(timestamp_to_millis(&sample.timestamp))
        .bind(reading_json)
        .execute(&self.pool)
        .await?;

        debug!("sample stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_samples(
        &self,
        kind: SampleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SampleRow>> {
        let results = select_samples(&self.pool, kind, start, end).await?;
        debug!("query returned {} samples", results.len());
        Ok(results)
    }

    #[instrument(skip(self))]
    async fn query_latest_samples(
        &self,
        kind: SampleKind,
        limit: usize,
    ) -> StorageResult<Vec<SampleRow>> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, reading
            FROM samples
            WHERE kind = ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(kind.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(sample_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn query_recent_summaries(
        &self,
        kind: SampleKind,
        limit: usize,
    ) -> StorageResult<Vec<SummaryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT kind, logical_key, hour_start, metrics, samples, updated_at
            FROM hourly_summaries
            WHERE kind = ?
            ORDER BY hour_start DESC, logical_key ASC
            LIMIT ?
            "#,
        )
        .bind(kind.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn begin(&self) -> StorageResult<Box<dyn StorageTransaction>> {
        // take the write lock up front; a deferred transaction that read
        // before a concurrent insert committed cannot upgrade in WAL mode
        let tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;

        Ok(Box::new(SqliteTransaction { tx }))
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_samples(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        info!("cleaning up samples older than {}", before);

        let result = sqlx::query("DELETE FROM samples WHERE timestamp < ?")
            .bind(timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old samples", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let (samples,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM samples")
            .fetch_one(&self.pool)
            .await?;

        let (summaries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hourly_summaries")
            .fetch_one(&self.pool)
            .await?;

        let (oldest, newest): (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(timestamp), MAX(timestamp) FROM samples")
                .fetch_one(&self.pool)
                .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        let file_size_mb = file_size as f64 / 1_000_000.0;

        let time_range = match (oldest, newest) {
            (Some(old), Some(new)) => format!(
                "{} to {}",
                millis_to_timestamp(old)?.format("%Y-%m-%d"),
                millis_to_timestamp(new)?.format("%Y-%m-%d")
            ),
            _ => "no data".to_string(),
        };

        Ok(format!(
            "SQLite: {} samples, {} hourly summaries, {:.2} MB on disk, time range: {}",
            samples, summaries, file_size_mb, time_range
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}

/// Transaction on the SQLite pool
///
/// sqlx rolls the transaction back when it is dropped uncommitted.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl StorageTransaction for SqliteTransaction {
    async fn query_samples(
        &mut self,
        kind: SampleKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<SampleRow>> {
        select_samples(&mut *self.tx, kind, start, end).await
    }

    async fn upsert_summary(&mut self, summary: SummaryRow) -> StorageResult<()> {
        let metrics_json = serde_json::to_string(&summary.metrics).map_err(|e| {
            StorageError::SerializationError(format!("failed to serialize metrics: {}", e))
        })?;

        sqlx::query(
            r#"
            INSERT INTO hourly_summaries (
                kind, logical_key, hour_start, metrics, samples, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (kind, logical_key, hour_start) DO UPDATE SET
                metrics = excluded.metrics,
                samples = excluded.samples,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(summary.kind.as_str())
        .bind(&summary.logical_key)
        .bind(timestamp_to_millis(&summary.hour_start))
        .bind(metrics_json)
        .bind(summary.samples as i64)
        .bind(timestamp_to_millis(&summary.updated_at))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))
    }
}
