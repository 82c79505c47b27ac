//! CollectorActor - runs a collection cycle on a fixed interval
//!
//! ```text
//! Timer tick ─┐
//!             ├─→ Collector::collect_cycle → samples in storage
//! CollectNow ─┘
//! ```
//!
//! A panic inside a cycle is caught and logged; the next tick runs as usual.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::collector::{CollectionReport, Collector};

use super::guarded;
use super::messages::CollectorCommand;

pub struct CollectorActor {
    collector: Arc<Collector>,

    command_rx: mpsc::Receiver<CollectorCommand>,

    interval_duration: Duration,
}

impl CollectorActor {
    pub fn new(
        collector: Arc<Collector>,
        command_rx: mpsc::Receiver<CollectorCommand>,
        interval_duration: Duration,
    ) -> Self {
        Self {
            collector,
            command_rx,
            interval_duration,
        }
    }

    /// Run until a Shutdown command arrives or every handle is dropped
    ///
    /// The first tick fires immediately, so a cycle runs on startup.
    #[instrument(skip(self), fields(interval = ?self.interval_duration))]
    pub async fn run(mut self) {
        debug!("starting collector actor");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.collect().await {
                        Ok(report) => info!(
                            "collection cycle finished, {}/3 sources stored",
                            report.stored()
                        ),
                        Err(e) => error!("collection cycle crashed: {e:#}"),
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(CollectorCommand::CollectNow { respond_to }) => {
                            debug!("received CollectNow command");
                            let result = self.collect().await;
                            let _ = respond_to.send(result);
                        }

                        Some(CollectorCommand::Shutdown) => {
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

        debug!("collector actor stopped");
    }

    async fn collect(&self) -> Result<CollectionReport> {
        guarded("collection cycle", self.collector.collect_cycle()).await
    }
}

/// Handle for controlling a CollectorActor
#[derive(Clone)]
pub struct CollectorHandle {
    sender: mpsc::Sender<CollectorCommand>,
}

impl CollectorHandle {
    /// Spawn the actor as a tokio task
    pub fn spawn(collector: Arc<Collector>, interval_duration: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = CollectorActor::new(collector, cmd_rx, interval_duration);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    /// Run a collection cycle now and wait for its report
    pub async fn collect_now(&self) -> Result<CollectionReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::CollectNow { respond_to: tx })
            .await
            .context("failed to send CollectNow command")?;

        rx.await.context("failed to receive response")?
    }

    /// Stop the actor and wait until it has exited
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CollectorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        self.sender.closed().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocationConfig, SourceConfig, SourcesConfig};
    use crate::gateway::{ApiClient, RetryPolicy};
    use crate::storage::memory::MemoryBackend;

    fn unreachable_collector() -> Arc<Collector> {
        let client = ApiClient::new(
            Duration::from_secs(1),
            RetryPolicy {
                retries: 1,
                backoff_factor: 2.0,
                backoff_unit: Duration::from_millis(1),
            },
        )
        .unwrap();
        let source = SourceConfig {
            url: Some("http://127.0.0.1:9".to_string()),
            api_key: Some("key".to_string()),
        };
        let sources = SourcesConfig {
            traffic: source.clone(),
            weather: source.clone(),
            air_quality: source,
        };
        Arc::new(Collector::new(
            client,
            Arc::new(MemoryBackend::new()),
            LocationConfig::default(),
            sources,
        ))
    }

    #[tokio::test]
    async fn test_collect_now_reports_failed_sources() {
        let handle = CollectorHandle::spawn(unreachable_collector(), Duration::from_secs(3600));

        let report = handle.collect_now().await.unwrap();
        assert_eq!(report.stored(), 0);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_exits_when_handles_dropped() {
        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let actor = CollectorActor::new(unreachable_collector(), cmd_rx, Duration::from_millis(10));
        let task = tokio::spawn(actor.run());

        drop(cmd_tx);

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("actor should stop once every handle is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_commands_fail_after_shutdown() {
        let handle = CollectorHandle::spawn(unreachable_collector(), Duration::from_secs(3600));

        handle.shutdown().await.unwrap();

        assert!(handle.collect_now().await.is_err());
    }
}
