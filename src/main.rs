use std::sync::Arc;

use anyhow::{Context, Result};
use ptqs::{config::Config, routes::routes, store::connect_redis, Scheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;
use warp::Filter;

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

  let api = warp::path!("health")
    .map(|| "ok")
    .or(routes(scheduler))
    .with(warp::trace::request());

  info!(port = config.server_port, "scheduler API listening");
  warp::serve(api)
    .run(([0, 0, 0, 0], config.server_port))
    .await;
  Ok(())
}
