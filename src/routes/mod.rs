use std::convert::Infallible;

use serde_json::json;
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::SchedulerError;
use crate::scheduler::Scheduler;

pub mod sse;
pub mod stats;
pub mod tasks;

#[derive(Debug)]
pub struct ApiError {
  pub status: StatusCode,
  pub message: String,
}

impl ApiError {
  pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
    Self { status, message: message.into() }
  }

  pub fn not_found(what: impl std::fmt::Display) -> Self {
    Self::new(StatusCode::NOT_FOUND, format!("{} not found", what))
  }
}

impl warp::reject::Reject for ApiError {}

impl From<SchedulerError> for ApiError {
  fn from(e: SchedulerError) -> Self {
    match e {
      SchedulerError::Store(_) => {
        error!("store unavailable: {}", e);
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "scheduler store unavailable")
      }
      SchedulerError::DuplicateTask(_) => ApiError::new(StatusCode::CONFLICT, e.to_string()),
      SchedulerError::Codec { .. } => {
        error!("corrupt record: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "corrupt scheduler record")
      }
    }
  }
}

pub(crate) fn reject(e: impl Into<ApiError>) -> Rejection {
  warp::reject::custom(e.into())
}

pub(crate) fn with_scheduler(scheduler: Scheduler) -> impl Filter<Extract = (Scheduler,), Error = Infallible> + Clone {
  warp::any().map(move || scheduler.clone())
}

pub fn routes(scheduler: Scheduler) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
  tasks::task_routes(scheduler.clone())
    .or(stats::stats_routes(scheduler.clone()))
    .or(sse::sse_route(scheduler))
    .recover(handle_rejection)
}

pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
  let (status, message) = if let Some(e) = err.find::<ApiError>() {
    (e.status, e.message.clone())
  } else if err.is_not_found() {
    (StatusCode::NOT_FOUND, "not found".to_string())
  } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
    (StatusCode::BAD_REQUEST, e.to_string())
  } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
    (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
  } else {
    error!("unhandled rejection: {:?}", err);
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
  };
  Ok(warp::reply::with_status(warp::reply::json(&json!({ "error": message })), status))
}
