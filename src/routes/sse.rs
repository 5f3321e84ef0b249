use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use serde_json::json;
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use super::{reject, with_scheduler, ApiError};
use crate::scheduler::Scheduler;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub fn sse_route(scheduler: Scheduler) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
  warp::path("sse")
    .and(warp::get())
    .and(warp::query::<HashMap<String, String>>())
    .and(with_scheduler(scheduler))
    .and_then(handle_sse)
}

/// Streams the parent's progress record whenever it changes, closing once
/// every task of the parent is terminal.
async fn handle_sse(query: HashMap<String, String>, scheduler: Scheduler) -> Result<impl Reply, Rejection> {
  let parent_id = query
    .get("parent_id")
    .ok_or_else(|| reject(ApiError::new(StatusCode::BAD_REQUEST, "Missing parent_id")))?
    .clone();

  let mut last_seen = None;
  let mut finished = false;
  let interval = IntervalStream::new(tokio::time::interval(POLL_INTERVAL));
  let stream = interval
    .then(move |_| {
      let scheduler = scheduler.clone();
      let parent_id = parent_id.clone();
      async move {
        match scheduler.get_progress(&parent_id).await {
          Ok(progress) => progress,
          Err(e) => {
            error!(parent_id = %parent_id, "Error fetching progress: {}", e);
            None
          }
        }
      }
    })
    .filter_map(move |progress| {
      // Inner None ends the stream on the tick after the finished event.
      if finished {
        return Some(None);
      }
      let progress = progress?;
      if last_seen.as_ref() == Some(&progress) {
        return None;
      }
      finished = progress.is_finished();
      last_seen = Some(progress.clone());
      let event = warp::sse::Event::default()
        .event(if finished { "finished" } else { "progress" })
        .data(
          json!({
            "parent_id": progress.parent_id,
            "total": progress.total_tasks,
            "running": progress.running_tasks,
            "completed": progress.completed_tasks,
            "failed": progress.failed_tasks,
            "cancelled": progress.cancelled_tasks,
          })
          .to_string(),
        );
      Some(Some(event))
    })
    .map_while(|event| event.map(Ok::<_, Infallible>));

  Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)))
}
