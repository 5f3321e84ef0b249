use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use super::{reject, with_scheduler, ApiError};
use crate::models::{Priority, ResourceType, Task};
use crate::scheduler::Scheduler;

static PARENT_ID: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^[\w.:\-]{1,128}$").expect("parent id pattern compiles"));

const MAX_RETRY_CEILING: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct NewTask {
  pub id: Option<Uuid>,
  pub resource_type: ResourceType,
  pub priority: Option<u8>,
  pub parent_id: String,
  #[serde(default)]
  pub params: serde_json::Value,
  pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
  pub task_id: Uuid,
  pub status: String,
  pub progress_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
  pub task_id: Uuid,
  pub cancelled: bool,
}

fn validate(new_task: &NewTask) -> Result<Priority, String> {
  if !PARENT_ID.is_match(&new_task.parent_id) {
    return Err("parent_id must be 1-128 characters of letters, digits, '_', '-', '.', ':'".into());
  }
  match &new_task.params {
    serde_json::Value::Object(_) | serde_json::Value::Null => {}
    _ => return Err("params must be a JSON object".into()),
  }
  if new_task.max_retries.is_some_and(|n| n > MAX_RETRY_CEILING) {
    return Err(format!("max_retries may not exceed {}", MAX_RETRY_CEILING));
  }
  match new_task.priority {
    Some(p) => Priority::try_from(p),
    None => Ok(Priority::default()),
  }
}

pub fn task_routes(scheduler: Scheduler) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  submit_route(scheduler.clone())
    .or(get_task_route(scheduler.clone()))
    .or(cancel_route(scheduler.clone()))
    .or(progress_route(scheduler))
}

pub fn submit_route(scheduler: Scheduler) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("tasks")
    .and(warp::post())
    .and(warp::body::json())
    .and(with_scheduler(scheduler))
    .and_then(handle_submit_task)
}

fn get_task_route(scheduler: Scheduler) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("tasks" / Uuid)
    .and(warp::get())
    .and(with_scheduler(scheduler))
    .and_then(handle_get_task)
}

fn cancel_route(scheduler: Scheduler) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("tasks" / Uuid / "cancel")
    .and(warp::post())
    .and(with_scheduler(scheduler))
    .and_then(handle_cancel_task)
}

fn progress_route(scheduler: Scheduler) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path!("progress" / String)
    .and(warp::get())
    .and(with_scheduler(scheduler))
    .and_then(handle_get_progress)
}

async fn handle_submit_task(new_task: NewTask, scheduler: Scheduler) -> Result<impl Reply, Rejection> {
  let priority = validate(&new_task).map_err(|e| {
    error!("Payload validation failed: {}", e);
    reject(ApiError::new(StatusCode::BAD_REQUEST, e))
  })?;

  let params = match new_task.params {
    serde_json::Value::Null => serde_json::json!({}),
    other => other,
  };
  let mut task = Task::new(new_task.resource_type, priority, new_task.parent_id, params, scheduler.now())
    .with_max_retries(new_task.max_retries.unwrap_or(scheduler.config().default_max_retries));
  if let Some(id) = new_task.id {
    task = task.with_id(id);
  }
  let task_id = task.id;
  let parent_id = task.parent_id.clone();

  let accepted = scheduler.submit(task).await.map_err(reject)?;
  if !accepted {
    return Err(reject(ApiError::new(
      StatusCode::SERVICE_UNAVAILABLE,
      format!("resource {} is unavailable, circuit open", new_task.resource_type),
    )));
  }

  info!("Task {} submitted successfully", task_id);
  let response = TaskResponse {
    task_id,
    status: "pending".into(),
    progress_url: format!("/sse?parent_id={}", parent_id),
  };
  Ok(warp::reply::with_status(warp::reply::json(&response), StatusCode::CREATED))
}

async fn handle_get_task(id: Uuid, scheduler: Scheduler) -> Result<impl Reply, Rejection> {
  match scheduler.get_task(id).await.map_err(reject)? {
    Some(task) => Ok(warp::reply::json(&task)),
    None => Err(reject(ApiError::not_found(format!("task {}", id)))),
  }
}

async fn handle_cancel_task(id: Uuid, scheduler: Scheduler) -> Result<impl Reply, Rejection> {
  if scheduler.get_task(id).await.map_err(reject)?.is_none() {
    return Err(reject(ApiError::not_found(format!("task {}", id))));
  }
  let cancelled = scheduler.cancel(id).await.map_err(reject)?;
  Ok(warp::reply::json(&CancelResponse { task_id: id, cancelled }))
}

async fn handle_get_progress(parent_id: String, scheduler: Scheduler) -> Result<impl Reply, Rejection> {
  match scheduler.get_progress(&parent_id).await.map_err(reject)? {
    Some(progress) => Ok(warp::reply::json(&progress)),
    None => Err(reject(ApiError::not_found(format!("progress for {}", parent_id)))),
  }
}
