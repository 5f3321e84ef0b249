use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store unavailable: {0}")]
  Unavailable(String),

  #[error("unexpected store reply: {0}")]
  Protocol(String),
}

impl From<redis::RedisError> for StoreError {
  fn from(e: redis::RedisError) -> Self {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
      StoreError::Unavailable(e.to_string())
    } else {
      StoreError::Protocol(e.to_string())
    }
  }
}

/// Errors surfaced by the scheduler facade. Task failures are not errors:
/// they are captured on the task record and in progress counters.
#[derive(Debug, Error)]
pub enum SchedulerError {
  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("corrupt record {key}: {source}")]
  Codec {
    key: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("task {0} already exists")]
  DuplicateTask(Uuid),
}

impl SchedulerError {
  /// Whether the failure came from the shared store rather than from the task.
  pub fn is_infrastructure(&self) -> bool {
    matches!(self, SchedulerError::Store(_))
  }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
