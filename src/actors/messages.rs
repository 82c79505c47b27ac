//! Commands accepted by the scheduler actors
//!
//! Every command goes through the actor's mpsc channel, so a manual trigger
//! never overlaps with a scheduled cycle of the same actor. Replies travel
//! back on a oneshot channel.

use tokio::sync::oneshot;

use crate::aggregator::AggregationReport;
use crate::collector::CollectionReport;

#[derive(Debug)]
pub enum CollectorCommand {
    /// Run a collection cycle now, independent of the ticker
    CollectNow {
        respond_to: oneshot::Sender<anyhow::Result<CollectionReport>>,
    },

    /// Finish the cycle in flight, if any, and exit
    Shutdown,
}

#[derive(Debug)]
pub enum AggregatorCommand {
    /// Run an aggregation cycle now
    ///
    /// With `window_minutes` the trailing window of that length is
    /// aggregated; without it the actor runs its scheduled mode.
    AggregateNow {
        window_minutes: Option<i64>,
        respond_to: oneshot::Sender<anyhow::Result<AggregationReport>>,
    },

    /// Finish the cycle in flight, if any, and exit
    Shutdown,
}
