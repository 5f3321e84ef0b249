use serde::Deserialize;
use serde_json::json;
use warp::{Filter, Rejection, Reply};

use super::{reject, with_scheduler};
use crate::models::ResourceType;
use crate::scheduler::Scheduler;

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
  pub resource_type: Option<ResourceType>,
}

pub fn stats_routes(scheduler: Scheduler) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  let stats = warp::path!("stats")
    .and(warp::get())
    .and(warp::query::<StatsQuery>())
    .and(with_scheduler(scheduler.clone()))
    .and_then(handle_stats);

  let circuit = warp::path!("circuits" / ResourceType)
    .and(warp::get())
    .and(with_scheduler(scheduler.clone()))
    .and_then(handle_circuit);

  let sweep = warp::path!("sweep")
    .and(warp::post())
    .and(with_scheduler(scheduler))
    .and_then(handle_sweep);

  stats.or(circuit).or(sweep)
}

async fn handle_stats(query: StatsQuery, scheduler: Scheduler) -> Result<impl Reply, Rejection> {
  let stats = scheduler.queue_stats(query.resource_type).await.map_err(reject)?;
  Ok(warp::reply::json(&stats))
}

async fn handle_circuit(resource_type: ResourceType, scheduler: Scheduler) -> Result<impl Reply, Rejection> {
  let status = scheduler.circuit_status(resource_type).await.map_err(reject)?;
  Ok(warp::reply::json(&status))
}

async fn handle_sweep(scheduler: Scheduler) -> Result<impl Reply, Rejection> {
  let requeued = scheduler.sweep_retries().await.map_err(reject)?;
  Ok(warp::reply::json(&json!({ "requeued": requeued })))
}
