use uuid::Uuid;

use crate::models::{Priority, ResourceType};

/// Builds store keys under one namespace prefix.
#[derive(Debug, Clone)]
pub struct Keyspace {
  prefix: String,
}

impl Keyspace {
  pub fn new(prefix: impl Into<String>) -> Self {
    Self { prefix: prefix.into() }
  }

  pub fn task(&self, id: Uuid) -> String {
    format!("{}:task:{}", self.prefix, id)
  }

  pub fn queue(&self, resource_type: ResourceType, priority: Priority) -> String {
    format!("{}:queue:{}:{}", self.prefix, resource_type, priority.rank())
  }

  pub fn retry(&self) -> String {
    format!("{}:retry", self.prefix)
  }

  pub fn breaker_failures(&self, resource_type: ResourceType) -> String {
    format!("{}:breaker:{}:failures", self.prefix, resource_type)
  }

  pub fn breaker_open(&self, resource_type: ResourceType) -> String {
    format!("{}:breaker:{}:open", self.prefix, resource_type)
  }

  pub fn progress(&self, parent_id: &str) -> String {
    format!("{}:progress:{}", self.prefix, parent_id)
  }

  pub fn progress_tasks(&self, parent_id: &str) -> String {
    format!("{}:progress_tasks:{}", self.prefix, parent_id)
  }
}
