use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use ptqs::config::Config;
use ptqs::store::connect_redis;
use ptqs::worker_processing::{run_claim_loop, run_retry_sweeper, HandlerRegistry};
use ptqs::Scheduler;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

const IDLE_DELAY: Duration = Duration::from_millis(100);
const SIMULATED_STEP: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();
  let config = Config::from_env()?;
  let store = connect_redis(&config.redis_url)
    .await
    .context("Failed to connect to Redis")?;
  let scheduler = Scheduler::new(Arc::new(store), config.scheduler.clone());

  let registry = HandlerRegistry::simulated(SIMULATED_STEP);
  let semaphore = Arc::new(Semaphore::new(config.worker_concurrency));
  info!(
    worker_id = %config.worker_id,
    concurrency = config.worker_concurrency,
    resources = ?registry.resource_types(),
    "worker starting"
  );

  tokio::spawn(run_retry_sweeper(scheduler.clone(), config.sweep_interval));

  let loops = registry.resource_types().into_iter().map(|resource_type| {
    tokio::spawn(run_claim_loop(
      scheduler.clone(),
      registry.clone(),
      resource_type,
      semaphore.clone(),
      IDLE_DELAY,
    ))
  });
  join_all(loops).await;
  Ok(())
}
