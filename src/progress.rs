use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::keys::Keyspace;
use crate::models::{ProgressRecord, TaskStatus};
use crate::store::OrderedStore;
use crate::task_store::TaskStore;

const TOTAL: &str = "total";
const RUNNING: &str = "running";
const COMPLETED: &str = "completed";
const FAILED: &str = "failed";
const CANCELLED: &str = "cancelled";
const UPDATED_AT: &str = "updated_at";

/// Per parent workflow aggregate counters.
///
/// Counters live in one hash and are moved with atomic increments; a second
/// hash maps task id to last known status. The view is a cache over the task
/// records: [`ProgressTracker::rebuild`] recomputes it from them.
#[derive(Clone)]
pub struct ProgressTracker {
  store: Arc<dyn OrderedStore>,
  keys: Keyspace,
  clock: Arc<dyn Clock>,
  ttl: Duration,
}

impl ProgressTracker {
  pub fn new(store: Arc<dyn OrderedStore>, keys: Keyspace, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
    Self { store, keys, clock, ttl }
  }

  /// Record that `task_id` moved from `from` (as read from its task record,
  /// `None` for a new task) to `to`.
  pub async fn record(&self, parent_id: &str, task_id: Uuid, from: Option<TaskStatus>, to: TaskStatus) -> Result<()> {
    let counts = self.keys.progress(parent_id);
    let tasks = self.keys.progress_tasks(parent_id);

    let created = self.store.hset(&tasks, &task_id.to_string(), to.as_str()).await?;
    if created {
      self.store.hincrby(&counts, TOTAL, 1).await?;
    }
    if from == Some(TaskStatus::Running) && to != TaskStatus::Running {
      self.store.hincrby(&counts, RUNNING, -1).await?;
    }
    let entered = match to {
      TaskStatus::Running => Some(RUNNING),
      TaskStatus::Completed => Some(COMPLETED),
      TaskStatus::Failed => Some(FAILED),
      TaskStatus::Cancelled => Some(CANCELLED),
      TaskStatus::Pending | TaskStatus::Retrying => None,
    };
    if let Some(field) = entered {
      if from != Some(to) {
        self.store.hincrby(&counts, field, 1).await?;
      }
    }
    self.store.hset(&counts, UPDATED_AT, &self.clock.now().to_rfc3339()).await?;
    self.store.expire(&counts, self.ttl).await?;
    self.store.expire(&tasks, self.ttl).await?;
    debug!(parent_id, task_id = %task_id, from = ?from, to = %to, "progress updated");
    Ok(())
  }

  pub async fn get(&self, parent_id: &str) -> Result<Option<ProgressRecord>> {
    let counts = self.store.hgetall(&self.keys.progress(parent_id)).await?;
    let tasks = self.store.hgetall(&self.keys.progress_tasks(parent_id)).await?;
    if counts.is_empty() && tasks.is_empty() {
      return Ok(None);
    }
    let count = |field: &str| {
      counts
        .get(field)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
        .max(0) as u64
    };
    Ok(Some(ProgressRecord {
      parent_id: parent_id.to_string(),
      total_tasks: count(TOTAL),
      completed_tasks: count(COMPLETED),
      failed_tasks: count(FAILED),
      running_tasks: count(RUNNING),
      cancelled_tasks: count(CANCELLED),
      tasks: parse_statuses(parent_id, &tasks),
      updated_at: counts
        .get(UPDATED_AT)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc)),
    }))
  }

  /// Recompute the counters from the task records. Tasks whose record has
  /// already expired keep their last known status.
  pub async fn rebuild(&self, parent_id: &str, task_store: &TaskStore) -> Result<Option<ProgressRecord>> {
    let tasks_key = self.keys.progress_tasks(parent_id);
    let known = parse_statuses(parent_id, &self.store.hgetall(&tasks_key).await?);
    if known.is_empty() {
      return Ok(None);
    }

    let mut record = ProgressRecord::empty(parent_id);
    for (id, last_known) in known {
      let status = match task_store.load(id).await? {
        Some(task) => task.status,
        None => last_known,
      };
      if status != last_known {
        self.store.hset(&tasks_key, &id.to_string(), status.as_str()).await?;
      }
      record.total_tasks += 1;
      match status {
        TaskStatus::Running => record.running_tasks += 1,
        TaskStatus::Completed => record.completed_tasks += 1,
        TaskStatus::Failed => record.failed_tasks += 1,
        TaskStatus::Cancelled => record.cancelled_tasks += 1,
        TaskStatus::Pending | TaskStatus::Retrying => {}
      }
      record.tasks.insert(id, status);
    }

    let now = self.clock.now();
    let counts = self.keys.progress(parent_id);
    for (field, value) in [
      (TOTAL, record.total_tasks),
      (RUNNING, record.running_tasks),
      (COMPLETED, record.completed_tasks),
      (FAILED, record.failed_tasks),
      (CANCELLED, record.cancelled_tasks),
    ] {
      self.store.hset(&counts, field, &value.to_string()).await?;
    }
    self.store.hset(&counts, UPDATED_AT, &now.to_rfc3339()).await?;
    self.store.expire(&counts, self.ttl).await?;
    self.store.expire(&tasks_key, self.ttl).await?;
    record.updated_at = Some(now);
    Ok(Some(record))
  }
}

fn parse_statuses(parent_id: &str, raw: &HashMap<String, String>) -> BTreeMap<Uuid, TaskStatus> {
  raw
    .iter()
    .filter_map(|(id, status)| match (id.parse::<Uuid>(), status.parse::<TaskStatus>()) {
      (Ok(id), Ok(status)) => Some((id, status)),
      _ => {
        warn!(parent_id, task_id = %id, status = %status, "skipping unreadable progress entry");
        None
      }
    })
    .collect()
}
