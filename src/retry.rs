use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::keys::Keyspace;
use crate::store::OrderedStore;

/// Delayed re-enqueue schedule: a single sorted set scored by ready-at time
/// in microseconds.
#[derive(Clone)]
pub struct RetrySchedule {
  store: Arc<dyn OrderedStore>,
  keys: Keyspace,
}

impl RetrySchedule {
  pub fn new(store: Arc<dyn OrderedStore>, keys: Keyspace) -> Self {
    Self { store, keys }
  }

  pub async fn schedule(&self, id: Uuid, ready_at: DateTime<Utc>) -> Result<()> {
    self.store.zadd(&self.keys.retry(), &id.to_string(), ready_at.timestamp_micros() as f64).await?;
    Ok(())
  }

  /// Entries whose ready-at is at or before `now`, earliest first.
  pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, DateTime<Utc>)>> {
    let key = self.keys.retry();
    let entries = self.store.zrangebyscore(&key, now.timestamp_micros() as f64).await?;
    let mut due = Vec::with_capacity(entries.len());
    for (member, score) in entries {
      match member.parse::<Uuid>() {
        Ok(id) => due.push((id, DateTime::from_timestamp_micros(score as i64).unwrap_or(now))),
        Err(_) => {
          warn!(member = %member, "dropping malformed retry entry");
          self.store.zrem(&key, &member).await?;
        }
      }
    }
    Ok(due)
  }

  pub async fn remove(&self, id: Uuid) -> Result<bool> {
    Ok(self.store.zrem(&self.keys.retry(), &id.to_string()).await?)
  }

  pub async fn len(&self) -> Result<u64> {
    Ok(self.store.zcard(&self.keys.retry()).await?)
  }
}
