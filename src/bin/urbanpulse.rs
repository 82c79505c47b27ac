use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use urbanpulse::{
    actors::scheduler::Scheduler, aggregator::Aggregator, collector::Collector, config::Config,
    gateway::ApiClient, storage, util,
};

#[derive(Debug, Clone, Parser)]
#[command(about = "Collects traffic, weather and air quality samples and aggregates them hourly")]
struct Args {
    /// Config file (JSON); defaults plus environment variables when omitted
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let level = util::env_var(util::LOG_LEVEL)
        .and_then(|level| level.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::INFO);

    let filter = filter::Targets::new().with_target("urbanpulse", level);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = Config::load(args.file.as_deref())?;

    if config.sources.traffic.api_key.is_none() {
        warn!("no TomTom API key configured, traffic collection will fail");
    }
    if config.sources.weather.api_key.is_none() {
        warn!("no OpenWeather API key configured, weather collection will fail");
    }

    let storage = storage::open(&config.storage)
        .await
        .context("failed to open storage")?;
    info!("{}", storage.get_stats().await?);

    let client = ApiClient::from_config(&config.gateway)?;
    let collector = Arc::new(Collector::new(
        client,
        storage.clone(),
        config.location.clone(),
        config.sources.clone(),
    ));
    let aggregator = Arc::new(Aggregator::new(storage.clone()));

    let scheduler = Scheduler::start(collector, aggregator, &config);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    scheduler.shutdown().await?;
    storage.close().await?;

    Ok(())
}
