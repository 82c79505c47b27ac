//! Storage backends for raw samples and hourly summaries
//!
//! This module provides a trait-based abstraction over the database the
//! pipeline writes to. The collector only appends samples; the aggregator
//! reads a window of samples and upserts summaries inside a transaction.
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database with native upsert
//! - **In-Memory**: No persistence, for tests or when storage is disabled
//!
//! ## Usage
//!
//! ```no_run
//! use urbanpulse::storage::{StorageBackend, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./urbanpulse.db").await?;
//!     println!("{}", backend.get_stats().await?);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

pub use backend::{HealthStatus, StorageBackend, StorageTransaction};
pub use error::{StorageError, StorageResult};
pub use schema::{MetricMeans, SampleRow, SummaryRow};

use crate::config::StorageConfig;

/// Construct the backend selected by the configuration
pub async fn open(config: &StorageConfig) -> StorageResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::None => Ok(Arc::new(memory::MemoryBackend::new())),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path, .. } => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "built without the storage-sqlite feature".to_string(),
        )),
    }
}
