use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// External-system category a task contends for. Tasks of one type share a
/// set of priority queues and one circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
  PropertyRecords,
  CompanyRegistry,
  CourtRecords,
  WebSearch,
  SocialMedia,
}

impl ResourceType {
  pub const ALL: [ResourceType; 5] = [
    ResourceType::PropertyRecords,
    ResourceType::CompanyRegistry,
    ResourceType::CourtRecords,
    ResourceType::WebSearch,
    ResourceType::SocialMedia,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceType::PropertyRecords => "property_records",
      ResourceType::CompanyRegistry => "company_registry",
      ResourceType::CourtRecords => "court_records",
      ResourceType::WebSearch => "web_search",
      ResourceType::SocialMedia => "social_media",
    }
  }
}

impl fmt::Display for ResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ResourceType::ALL
      .into_iter()
      .find(|r| r.as_str() == s)
      .ok_or_else(|| format!("unknown resource type '{}'", s))
  }
}

/// Urgency rank. Smaller rank is served first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
  Critical = 1,
  High = 2,
  #[default]
  Normal = 3,
  Low = 4,
  Background = 5,
}

impl Priority {
  /// Dequeue precedence, most urgent first.
  pub const ALL: [Priority; 5] = [
    Priority::Critical,
    Priority::High,
    Priority::Normal,
    Priority::Low,
    Priority::Background,
  ];

  pub fn rank(self) -> u8 {
    self as u8
  }
}

impl TryFrom<u8> for Priority {
  type Error = String;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    Priority::ALL
      .into_iter()
      .find(|p| p.rank() == value)
      .ok_or_else(|| format!("priority must be between 1 and 5, got {}", value))
  }
}

impl From<Priority> for u8 {
  fn from(p: Priority) -> u8 {
    p.rank()
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.rank())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Retrying,
  Cancelled,
}

impl TaskStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled)
  }

  /// Legal edges of the task lifecycle.
  pub fn can_transition_to(self, next: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
      (self, next),
      (Pending, Running)
        | (Running, Completed)
        | (Running, Failed)
        | (Running, Retrying)
        | (Retrying, Pending)
        | (Pending, Cancelled)
        | (Running, Cancelled)
        | (Retrying, Cancelled)
    )
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      TaskStatus::Pending => "pending",
      TaskStatus::Running => "running",
      TaskStatus::Completed => "completed",
      TaskStatus::Failed => "failed",
      TaskStatus::Retrying => "retrying",
      TaskStatus::Cancelled => "cancelled",
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for TaskStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pending" => Ok(TaskStatus::Pending),
      "running" => Ok(TaskStatus::Running),
      "completed" => Ok(TaskStatus::Completed),
      "failed" => Ok(TaskStatus::Failed),
      "retrying" => Ok(TaskStatus::Retrying),
      "cancelled" => Ok(TaskStatus::Cancelled),
      other => Err(format!("unknown task status '{}'", other)),
    }
  }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: Uuid,
  pub resource_type: ResourceType,
  pub priority: Priority,
  pub parent_id: String,
  pub params: serde_json::Value,
  pub status: TaskStatus,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub result: Option<serde_json::Value>,
  pub error: Option<String>,
  pub retry_count: u32,
  pub max_retries: u32,
}

impl Task {
  pub fn new(
    resource_type: ResourceType,
    priority: Priority,
    parent_id: impl Into<String>,
    params: serde_json::Value,
    created_at: DateTime<Utc>,
  ) -> Self {
    Self {
      id: Uuid::new_v4(),
      resource_type,
      priority,
      parent_id: parent_id.into(),
      params,
      status: TaskStatus::Pending,
      created_at,
      started_at: None,
      completed_at: None,
      result: None,
      error: None,
      retry_count: 0,
      max_retries: DEFAULT_MAX_RETRIES,
    }
  }

  pub fn with_id(mut self, id: Uuid) -> Self {
    self.id = id;
    self
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
  pub parent_id: String,
  pub total_tasks: u64,
  pub completed_tasks: u64,
  pub failed_tasks: u64,
  pub running_tasks: u64,
  pub cancelled_tasks: u64,
  pub tasks: BTreeMap<Uuid, TaskStatus>,
  pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
  pub fn empty(parent_id: impl Into<String>) -> Self {
    Self {
      parent_id: parent_id.into(),
      total_tasks: 0,
      completed_tasks: 0,
      failed_tasks: 0,
      running_tasks: 0,
      cancelled_tasks: 0,
      tasks: BTreeMap::new(),
      updated_at: None,
    }
  }

  /// Every recorded task has reached a terminal state.
  pub fn is_finished(&self) -> bool {
    self.total_tasks > 0 && self.tasks.values().all(|s| s.is_terminal())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitStatus {
  pub resource_type: ResourceType,
  pub open: bool,
  pub consecutive_failures: u32,
  pub threshold: u32,
  pub open_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueDepth {
  pub resource_type: ResourceType,
  pub priority: Priority,
  pub depth: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
  pub queues: Vec<QueueDepth>,
  pub retrying: u64,
  pub circuits: Vec<CircuitStatus>,
}

impl QueueStats {
  pub fn pending_for(&self, resource_type: ResourceType) -> u64 {
    self
      .queues
      .iter()
      .filter(|q| q.resource_type == resource_type)
      .map(|q| q.depth)
      .sum()
  }
}

/// What a `fail` report did to the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailOutcome {
  Retrying { retry_count: u32, ready_at: DateTime<Utc> },
  Failed { retry_count: u32 },
  /// The task was unknown or no longer running.
  Ignored,
}

impl FailOutcome {
  pub fn will_retry(&self) -> bool {
    matches!(self, FailOutcome::Retrying { .. })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn priority_serializes_as_rank() {
    let json = serde_json::to_string(&Priority::High).unwrap();
    assert_eq!(json, "2");
    let parsed: Priority = serde_json::from_str("5").unwrap();
    assert_eq!(parsed, Priority::Background);
    assert!(serde_json::from_str::<Priority>("9").is_err());
  }

  #[test]
  fn terminal_states_have_no_exits() {
    let all = [
      TaskStatus::Pending,
      TaskStatus::Running,
      TaskStatus::Completed,
      TaskStatus::Failed,
      TaskStatus::Retrying,
      TaskStatus::Cancelled,
    ];
    for from in all.into_iter().filter(|s| s.is_terminal()) {
      assert!(all.iter().all(|to| !from.can_transition_to(*to)), "{} has an exit", from);
    }
    assert!(TaskStatus::Retrying.can_transition_to(TaskStatus::Pending));
    assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
  }

  #[test]
  fn resource_type_round_trips_through_str() {
    for r in ResourceType::ALL {
      assert_eq!(r.as_str().parse::<ResourceType>().unwrap(), r);
    }
    assert!("nope".parse::<ResourceType>().is_err());
  }
}
