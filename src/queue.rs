use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::keys::Keyspace;
use crate::models::{Priority, QueueDepth, ResourceType, Task};
use crate::store::OrderedStore;

/// Sort key within one priority level: creation time in microseconds, which
/// keeps equal-priority tasks FIFO. Exact in an f64 until well past year 2200.
pub fn queue_score(created_at: DateTime<Utc>) -> f64 {
  created_at.timestamp_micros() as f64
}

/// An id taken off a queue, with enough to put it back where it was.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueEntry {
  pub priority: Priority,
  pub id: Uuid,
  pub score: f64,
}

/// One sorted set per (resource type, priority level).
#[derive(Clone)]
pub struct PriorityQueues {
  store: Arc<dyn OrderedStore>,
  keys: Keyspace,
}

impl PriorityQueues {
  pub fn new(store: Arc<dyn OrderedStore>, keys: Keyspace) -> Self {
    Self { store, keys }
  }

  pub async fn push(&self, task: &Task) -> Result<()> {
    let key = self.keys.queue(task.resource_type, task.priority);
    self.store.zadd(&key, &task.id.to_string(), queue_score(task.created_at)).await?;
    Ok(())
  }

  /// Pop the oldest id at the most urgent non-empty level. Each pop is a
  /// single atomic store command, so concurrent callers never share an id.
  pub async fn pop(&self, resource_type: ResourceType) -> Result<Option<QueueEntry>> {
    for priority in Priority::ALL {
      let key = self.keys.queue(resource_type, priority);
      while let Some((member, score)) = self.store.zpopmin(&key).await? {
        match member.parse::<Uuid>() {
          Ok(id) => return Ok(Some(QueueEntry { priority, id, score })),
          Err(_) => warn!(queue = %key, member = %member, "dropping malformed queue member"),
        }
      }
    }
    Ok(None)
  }

  /// Put a popped entry back at its original position.
  pub async fn restore(&self, resource_type: ResourceType, entry: &QueueEntry) -> Result<()> {
    let key = self.keys.queue(resource_type, entry.priority);
    self.store.zadd(&key, &entry.id.to_string(), entry.score).await?;
    Ok(())
  }

  /// Remove an id from every level of a resource type. Returns whether it
  /// was found anywhere.
  pub async fn remove(&self, resource_type: ResourceType, id: Uuid) -> Result<bool> {
    let member = id.to_string();
    let mut found = false;
    for priority in Priority::ALL {
      found |= self.store.zrem(&self.keys.queue(resource_type, priority), &member).await?;
    }
    Ok(found)
  }

  pub async fn depths(&self, resource_type: ResourceType) -> Result<Vec<QueueDepth>> {
    let mut depths = Vec::with_capacity(Priority::ALL.len());
    for priority in Priority::ALL {
      let depth = self.store.zcard(&self.keys.queue(resource_type, priority)).await?;
      depths.push(QueueDepth { resource_type, priority, depth });
    }
    Ok(depths)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryStore;
  use chrono::Duration;
  use serde_json::json;

  fn queues() -> PriorityQueues {
    PriorityQueues::new(Arc::new(MemoryStore::new()), Keyspace::new("t"))
  }

  fn task(priority: Priority, created_at: DateTime<Utc>) -> Task {
    Task::new(ResourceType::WebSearch, priority, "inv", json!({}), created_at)
  }

  #[tokio::test]
  async fn higher_priority_preempts_older_lower_priority() {
    let queues = queues();
    let t0 = Utc::now();
    let old_low = task(Priority::Low, t0);
    let new_high = task(Priority::High, t0 + Duration::seconds(10));
    queues.push(&old_low).await.unwrap();
    queues.push(&new_high).await.unwrap();

    let popped = |e: Option<QueueEntry>| e.map(|e| (e.priority, e.id));
    assert_eq!(popped(queues.pop(ResourceType::WebSearch).await.unwrap()), Some((Priority::High, new_high.id)));
    assert_eq!(popped(queues.pop(ResourceType::WebSearch).await.unwrap()), Some((Priority::Low, old_low.id)));
    assert_eq!(queues.pop(ResourceType::WebSearch).await.unwrap(), None);
  }

  #[tokio::test]
  async fn equal_priority_is_fifo() {
    let queues = queues();
    let t0 = Utc::now();
    let later = task(Priority::Normal, t0 + Duration::milliseconds(5));
    let earlier = task(Priority::Normal, t0);
    queues.push(&later).await.unwrap();
    queues.push(&earlier).await.unwrap();
    assert_eq!(queues.pop(ResourceType::WebSearch).await.unwrap().map(|e| e.id), Some(earlier.id));
  }

  #[tokio::test]
  async fn remove_is_idempotent() {
    let queues = queues();
    let t = task(Priority::Critical, Utc::now());
    queues.push(&t).await.unwrap();
    assert!(queues.remove(ResourceType::WebSearch, t.id).await.unwrap());
    assert!(!queues.remove(ResourceType::WebSearch, t.id).await.unwrap());
    let depths = queues.depths(ResourceType::WebSearch).await.unwrap();
    assert!(depths.iter().all(|d| d.depth == 0));
  }
}
