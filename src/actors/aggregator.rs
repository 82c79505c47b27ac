//! AggregatorActor - folds samples into hourly summaries on a fixed interval
//!
//! Besides the aggregation ticker the actor owns a daily retention ticker
//! when a retention period is configured. Both run on the same task, so
//! pruning never interleaves with a cycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::aggregator::{AggregationReport, Aggregator};
use crate::config::Config;

use super::guarded;
use super::messages::AggregatorCommand;

const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Scheduling knobs of the aggregator actor
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub interval: Duration,
    pub window_minutes: i64,
    /// Aggregate every hour since the last run instead of the trailing window
    pub catch_up: bool,
    pub retention_days: Option<u32>,
}

impl AggregatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.schedule.aggregation_interval_secs),
            window_minutes: config.schedule.aggregation_window_minutes,
            catch_up: config.schedule.catch_up,
            retention_days: config.storage.retention_days(),
        }
    }
}

pub struct AggregatorActor {
    aggregator: Arc<Aggregator>,

    command_rx: mpsc::Receiver<AggregatorCommand>,

    settings: AggregatorSettings,
}

impl AggregatorActor {
    pub fn new(
        aggregator: Arc<Aggregator>,
        command_rx: mpsc::Receiver<AggregatorCommand>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            aggregator,
            command_rx,
            settings,
        }
    }

    /// Run until a Shutdown command arrives or every handle is dropped
    #[instrument(skip(self), fields(interval = ?self.settings.interval))]
    pub async fn run(mut self) {
        debug!("starting aggregator actor");

        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut retention = interval(RETENTION_INTERVAL);
        retention.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.aggregate(None).await {
                        error!("aggregation cycle failed: {e:#}");
                    }
                }

                _ = retention.tick(), if self.settings.retention_days.is_some() => {
                    self.prune().await;
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(AggregatorCommand::AggregateNow { window_minutes, respond_to }) => {
                            debug!("received AggregateNow command");
                            let result = self.aggregate(window_minutes).await;
                            let _ = respond_to.send(result);
                        }

                        Some(AggregatorCommand::Shutdown) => {
                            debug!("received shutdown command");
                            break;
                        }

                        None => {
                            warn!("command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!("aggregator actor stopped");
    }

    async fn aggregate(&self, window_minutes: Option<i64>) -> Result<AggregationReport> {
        let aggregator = &self.aggregator;
        let settings = &self.settings;

        let cycle = async move {
            match window_minutes {
                // catch-up owns whole buckets, so a manual window must not
                // leave a partial hour behind
                Some(minutes) if settings.catch_up => {
                    let now = Utc::now();
                    aggregator
                        .refold_since(now, now - chrono::Duration::minutes(minutes))
                        .await
                }
                Some(minutes) => aggregator.aggregate_cycle(minutes).await,
                None if settings.catch_up => {
                    let lookback = chrono::Duration::seconds(settings.interval.as_secs() as i64);
                    aggregator.aggregate_pending(Utc::now(), lookback).await
                }
                None => aggregator.aggregate_cycle(settings.window_minutes).await,
            }
        };

        let report = guarded("aggregation cycle", cycle).await??;
        info!(
            "aggregation cycle finished, {} summaries written",
            report.summaries_written()
        );
        Ok(report)
    }

    async fn prune(&self) {
        let Some(days) = self.settings.retention_days else {
            return;
        };

        match guarded("retention cleanup", self.aggregator.prune_samples(Utc::now(), days)).await {
            Ok(Ok(removed)) => debug!("retention removed {removed} samples"),
            Ok(Err(e)) => error!("retention cleanup failed: {e}"),
            Err(e) => error!("retention cleanup crashed: {e:#}"),
        }
    }
}

/// Handle for controlling an AggregatorActor
#[derive(Clone)]
pub struct AggregatorHandle {
    sender: mpsc::Sender<AggregatorCommand>,
}

impl AggregatorHandle {
    pub fn spawn(aggregator: Arc<Aggregator>, settings: AggregatorSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = AggregatorActor::new(aggregator, cmd_rx, settings);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run an aggregation cycle now and wait for its report
    ///
    /// `None` runs the scheduled mode. `Some(minutes)` aggregates the
    /// trailing window; in catch-up mode every hour it touches is rebuilt
    /// in full.
    pub async fn aggregate_now(&self, window_minutes: Option<i64>) -> Result<AggregationReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(AggregatorCommand::AggregateNow {
                window_minutes,
                respond_to: tx,
            })
            .await
            .context("failed to send AggregateNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Stop the actor and wait until it has exited
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(AggregatorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        self.sender.closed().await;
        Ok(())
    }
}
