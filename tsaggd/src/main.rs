use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tsagg_config::CliArgs;
use tsagg_core::lock::RedisLockClient;
use tsagg_core::publish::AmqpPublisher;
use tsagg_core::store::MongoStore;
use tsagg_core::{Scheduler, SchedulerTuning};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    let config = tsagg_config::load(&cli).context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_filter.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(databases = ?config.store.databases, "configuration loaded");

    let store = match MongoStore::connect(&config.store.uri).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "fatal: could not connect to document store");
            std::process::exit(1);
        }
    };

    let lock = match RedisLockClient::connect(
        &config.lock.uri,
        Duration::from_secs(config.lock.ttl_secs),
        config.lock.retry_attempts,
        Duration::from_millis(config.lock.retry_backoff_ms),
    )
    .await
    {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "fatal: could not connect to lock service");
            std::process::exit(1);
        }
    };

    let publisher = match AmqpPublisher::connect(&config.broker.uri).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "fatal: could not connect to broker");
            std::process::exit(1);
        }
    };

    let tuning = SchedulerTuning {
        idle_sleep: Duration::from_secs(config.scheduler.idle_sleep_secs),
        meta_chunk_size: config.scheduler.meta_chunk_size,
    };

    let scheduler = Scheduler::new(&store, &lock, &publisher, config.broker.queue.clone(), tuning);

    info!("scheduler starting");
    tokio::select! {
        _ = scheduler.run(current_time) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received interrupt, shutting down");
        }
    }

    Ok(())
}

fn current_time() -> i64 {
    chrono::Utc::now().timestamp()
}
