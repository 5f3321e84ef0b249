use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::keys::Keyspace;
use crate::models::Task;
use crate::store::OrderedStore;

/// One JSON document per task. Every write refreshes the retention window.
#[derive(Clone)]
pub struct TaskStore {
  store: Arc<dyn OrderedStore>,
  keys: Keyspace,
  ttl: Duration,
}

impl TaskStore {
  pub fn new(store: Arc<dyn OrderedStore>, keys: Keyspace, ttl: Duration) -> Self {
    Self { store, keys, ttl }
  }

  pub async fn save(&self, task: &Task) -> Result<()> {
    let key = self.keys.task(task.id);
    let body = serde_json::to_string(task).map_err(|source| SchedulerError::Codec { key: key.clone(), source })?;
    self.store.set_ex(&key, &body, self.ttl).await?;
    Ok(())
  }

  pub async fn load(&self, id: Uuid) -> Result<Option<Task>> {
    let key = self.keys.task(id);
    match self.store.get(&key).await? {
      Some(body) => serde_json::from_str(&body)
        .map(Some)
        .map_err(|source| SchedulerError::Codec { key, source }),
      None => Ok(None),
    }
  }
}
