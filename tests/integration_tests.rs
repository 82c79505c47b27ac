//! Integration tests for the collection and aggregation pipeline

#[path = "integration/helpers.rs"]
mod helpers;

#[cfg(feature = "storage-sqlite")]
#[path = "integration/pipeline.rs"]
mod pipeline;

#[path = "integration/scheduler.rs"]
mod scheduler;
