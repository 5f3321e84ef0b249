use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::models::{FailOutcome, ResourceType, Task};
use crate::scheduler::Scheduler;

/// A worker function for one resource type. It receives the task's opaque
/// params and returns an opaque result; any error becomes a `fail` report.
#[async_trait]
pub trait TaskHandler: Send + Sync {
  async fn handle(&self, task: &Task) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
  handlers: HashMap<ResourceType, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(mut self, resource_type: ResourceType, handler: Arc<dyn TaskHandler>) -> Self {
    self.handlers.insert(resource_type, handler);
    self
  }

  pub fn get(&self, resource_type: ResourceType) -> Option<Arc<dyn TaskHandler>> {
    self.handlers.get(&resource_type).cloned()
  }

  pub fn resource_types(&self) -> Vec<ResourceType> {
    let mut types: Vec<_> = self.handlers.keys().copied().collect();
    types.sort();
    types
  }

  /// Stand-in collectors for every resource type, used when no provider
  /// integrations are wired in.
  pub fn simulated(step_delay: Duration) -> Self {
    ResourceType::ALL.into_iter().fold(Self::new(), |registry, r| {
      registry.register(r, Arc::new(SimulatedCollector::for_resource(r, step_delay)))
    })
  }
}

/// Collector that validates its params and walks through a few timed steps.
pub struct SimulatedCollector {
  resource_type: ResourceType,
  required: &'static [&'static str],
  steps: &'static [u8],
  step_delay: Duration,
}

impl SimulatedCollector {
  pub fn for_resource(resource_type: ResourceType, step_delay: Duration) -> Self {
    let (required, steps): (&'static [&'static str], &'static [u8]) = match resource_type {
      ResourceType::PropertyRecords => (&["address"], &[25, 50, 75]),
      ResourceType::CompanyRegistry => (&["company_name"], &[50]),
      ResourceType::CourtRecords => (&["party_name", "jurisdiction"], &[20, 40, 60, 80]),
      ResourceType::WebSearch => (&["query"], &[50]),
      ResourceType::SocialMedia => (&["handle"], &[33, 66]),
    };
    Self { resource_type, required, steps, step_delay }
  }
}

#[async_trait]
impl TaskHandler for SimulatedCollector {
  async fn handle(&self, task: &Task) -> Result<Value> {
    for field in self.required {
      match task.params.get(*field) {
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        _ => return Err(anyhow!("missing or empty '{}' in {} task", field, self.resource_type)),
      }
    }
    for progress in self.steps {
      sleep(self.step_delay).await;
      info!(task_id = %task.id, resource_type = %self.resource_type, progress, "collection in progress");
    }
    sleep(self.step_delay).await;
    Ok(json!({
      "resource_type": self.resource_type,
      "records": self.steps.len(),
    }))
  }
}

/// Run one claimed task through its handler and report the outcome.
pub async fn process_claimed(scheduler: &Scheduler, handler: &dyn TaskHandler, task: Task) -> crate::error::Result<()> {
  match handler.handle(&task).await {
    Ok(result) => {
      scheduler.complete(task.id, result).await?;
    }
    Err(e) => {
      error!(task_id = %task.id, resource_type = %task.resource_type, "processing failed: {:#}", e);
      match scheduler.fail(task.id, &format!("{:#}", e)).await? {
        FailOutcome::Retrying { retry_count, ready_at } => {
          info!(task_id = %task.id, retry_count, ready_at = %ready_at, "will retry")
        }
        FailOutcome::Failed { retry_count } => {
          error!(task_id = %task.id, retry_count, "max attempts reached, task failed")
        }
        FailOutcome::Ignored => {}
      }
    }
  }
  Ok(())
}

/// Claim and process tasks for one resource type until the process exits.
/// At most `semaphore` permits run at once across all loops sharing it.
pub async fn run_claim_loop(
  scheduler: Scheduler,
  registry: HandlerRegistry,
  resource_type: ResourceType,
  semaphore: Arc<Semaphore>,
  idle_delay: Duration,
) {
  let Some(handler) = registry.get(resource_type) else {
    warn!(resource_type = %resource_type, "no handler registered, claim loop not started");
    return;
  };
  info!(resource_type = %resource_type, "claim loop started");
  loop {
    let permit = match semaphore.clone().acquire_owned().await {
      Ok(permit) => permit,
      Err(_) => return,
    };
    match scheduler.claim(resource_type).await {
      Ok(Some(task)) => {
        let scheduler = scheduler.clone();
        let handler = handler.clone();
        tokio::spawn(async move {
          let task_id = task.id;
          if let Err(e) = process_claimed(&scheduler, handler.as_ref(), task).await {
            error!(task_id = %task_id, "failed to report task outcome: {}", e);
          }
          drop(permit);
        });
      }
      Ok(None) => {
        drop(permit);
        sleep(idle_delay).await;
      }
      Err(e) => {
        drop(permit);
        error!(resource_type = %resource_type, "claim failed: {}", e);
        sleep(idle_delay).await;
      }
    }
  }
}

/// Periodically move due retries back onto their queues.
pub async fn run_retry_sweeper(scheduler: Scheduler, interval: Duration) {
  let mut ticker = tokio::time::interval(interval);
  loop {
    ticker.tick().await;
    if let Err(e) = scheduler.sweep_retries().await {
      error!("retry sweep failed: {}", e);
    }
  }
}
