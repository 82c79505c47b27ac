use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use crate::aggregator::Aggregator;
use crate::collector::Collector;
use crate::config::Config;

use super::aggregator::{AggregatorHandle, AggregatorSettings};
use super::collector::CollectorHandle;

/// Handles to both recurring jobs of a running pipeline
#[derive(Clone)]
pub struct SchedulerHandle {
    pub collector: CollectorHandle,
    pub aggregator: AggregatorHandle,
}

pub struct Scheduler;

impl Scheduler {
    /// Spawn the collector and aggregator actors
    ///
    /// Both run their first cycle right away and then keep their own
    /// schedule; a crashing cycle in one never stops the other.
    pub fn start(
        collector: Arc<Collector>,
        aggregator: Arc<Aggregator>,
        config: &Config,
    ) -> SchedulerHandle {
        let collection_interval = Duration::from_secs(config.schedule.collection_interval_secs);
        let settings = AggregatorSettings::from_config(config);

        info!(
            "starting scheduler: collection every {:?}, aggregation every {:?}",
            collection_interval, settings.interval
        );

        SchedulerHandle {
            collector: CollectorHandle::spawn(collector, collection_interval),
            aggregator: AggregatorHandle::spawn(aggregator, settings),
        }
    }
}

impl SchedulerHandle {
    /// Stop both actors, waiting for in-flight cycles to finish
    pub async fn shutdown(&self) -> Result<()> {
        let (collector, aggregator) =
            tokio::join!(self.collector.shutdown(), self.aggregator.shutdown());

        if let Err(e) = &collector {
            error!("collector did not shut down cleanly: {e:#}");
        }
        if let Err(e) = &aggregator {
            error!("aggregator did not shut down cleanly: {e:#}");
        }
        collector.and(aggregator)
    }
}
