use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::clock::{after, Clock, SystemClock};
use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::keys::Keyspace;
use crate::models::{CircuitStatus, FailOutcome, ProgressRecord, QueueStats, ResourceType, Task, TaskStatus};
use crate::progress::ProgressTracker;
use crate::queue::{PriorityQueues, QueueEntry};
use crate::retry::RetrySchedule;
use crate::store::OrderedStore;
use crate::task_store::TaskStore;

enum Requeue {
  Done,
  Held,
  Dropped,
}

/// Priority task scheduler over a shared ordered store.
///
/// Holds no state of its own beyond handles to the store, so any number of
/// instances (in one process or many) can serve the same queues. Each step of
/// an operation is one atomic store command; the only mutual exclusion relied
/// on is the atomic pop in [`Scheduler::claim`] and the atomic removal of a
/// retry entry in [`Scheduler::sweep_retries`].
#[derive(Clone)]
pub struct Scheduler {
  config: SchedulerConfig,
  clock: Arc<dyn Clock>,
  tasks: TaskStore,
  queues: PriorityQueues,
  retries: RetrySchedule,
  breaker: CircuitBreaker,
  progress: ProgressTracker,
}

impl Scheduler {
  pub fn new(store: Arc<dyn OrderedStore>, config: SchedulerConfig) -> Self {
    Self::with_clock(store, config, Arc::new(SystemClock))
  }

  pub fn with_clock(store: Arc<dyn OrderedStore>, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
    let keys = Keyspace::new(config.key_prefix.clone());
    Self {
      tasks: TaskStore::new(store.clone(), keys.clone(), config.task_ttl),
      queues: PriorityQueues::new(store.clone(), keys.clone()),
      retries: RetrySchedule::new(store.clone(), keys.clone()),
      breaker: CircuitBreaker::new(
        store.clone(),
        keys.clone(),
        clock.clone(),
        config.breaker_threshold,
        config.breaker_cooldown,
      ),
      progress: ProgressTracker::new(store, keys, clock.clone(), config.progress_ttl),
      config,
      clock,
    }
  }

  pub fn config(&self) -> &SchedulerConfig {
    &self.config
  }

  pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
    self.clock.now()
  }

  /// Accept a new task. Returns `false` without storing anything when the
  /// breaker for its resource type is open.
  ///
  /// Resubmitting the id of a task that is still `Pending` re-enqueues it, so a
  /// submit interrupted between storing the record and queueing it can be
  /// retried by the caller. Any other existing record is a duplicate.
  pub async fn submit(&self, mut task: Task) -> Result<bool> {
    if self.breaker.is_open(task.resource_type).await? {
      warn!(task_id = %task.id, resource_type = %task.resource_type, "submission rejected, circuit open");
      return Ok(false);
    }
    match self.tasks.load(task.id).await? {
      Some(existing) if existing.status == TaskStatus::Pending => {
        self.enqueue(&existing).await?;
        info!(task_id = %existing.id, "pending task re-enqueued on resubmit");
        return Ok(true);
      }
      Some(_) => return Err(SchedulerError::DuplicateTask(task.id)),
      None => {}
    }
    task.status = TaskStatus::Pending;
    self.tasks.save(&task).await?;
    self.enqueue(&task).await?;
    info!(
      task_id = %task.id,
      resource_type = %task.resource_type,
      priority = task.priority.rank(),
      parent_id = %task.parent_id,
      "task submitted"
    );
    Ok(true)
  }

  async fn enqueue(&self, task: &Task) -> Result<()> {
    self.queues.push(task).await?;
    self.progress.record(&task.parent_id, task.id, None, TaskStatus::Pending).await
  }

  /// Hand the oldest task at the most urgent non-empty priority level to the
  /// caller, marked `Running`.
  pub async fn claim(&self, resource_type: ResourceType) -> Result<Option<Task>> {
    if self.breaker.is_open(resource_type).await? {
      debug!(resource_type = %resource_type, "claim skipped, circuit open");
      return Ok(None);
    }
    while let Some(entry) = self.queues.pop(resource_type).await? {
      // The pop made this caller the sole owner of the id; hand it back if
      // the record cannot be moved to Running.
      match self.start(&entry).await {
        Ok(Some((task, from))) => {
          self.progress.record(&task.parent_id, task.id, Some(from), TaskStatus::Running).await?;
          info!(task_id = %task.id, resource_type = %resource_type, priority = entry.priority.rank(), "task claimed");
          return Ok(Some(task));
        }
        Ok(None) => continue,
        Err(e) => {
          if let Err(restore) = self.queues.restore(resource_type, &entry).await {
            warn!(task_id = %entry.id, error = %restore, "could not return task to its queue");
          }
          return Err(e);
        }
      }
    }
    Ok(None)
  }

  async fn start(&self, entry: &QueueEntry) -> Result<Option<(Task, TaskStatus)>> {
    let id = entry.id;
    let Some(mut task) = self.tasks.load(id).await? else {
      warn!(task_id = %id, "queued task has no record, skipping");
      return Ok(None);
    };
    if !task.status.can_transition_to(TaskStatus::Running) {
      debug!(task_id = %id, status = %task.status, "queued task no longer pending, skipping");
      return Ok(None);
    }
    let from = task.status;
    task.status = TaskStatus::Running;
    task.started_at = Some(self.clock.now());
    self.tasks.save(&task).await?;
    Ok(Some((task, from)))
  }

  /// Record a successful run and reset the resource's breaker. Reports for
  /// tasks that are unknown or no longer running are ignored.
  pub async fn complete(&self, id: Uuid, result: Value) -> Result<bool> {
    let Some(mut task) = self.tasks.load(id).await? else {
      warn!(task_id = %id, "completion for unknown task");
      return Ok(false);
    };
    if !task.status.can_transition_to(TaskStatus::Completed) {
      info!(task_id = %id, status = %task.status, "ignoring completion for task that is not running");
      return Ok(false);
    }
    task.status = TaskStatus::Completed;
    task.completed_at = Some(self.clock.now());
    task.result = Some(result);
    self.tasks.save(&task).await?;
    self.progress.record(&task.parent_id, id, Some(TaskStatus::Running), TaskStatus::Completed).await?;
    self.breaker.record_success(task.resource_type).await?;
    info!(task_id = %id, resource_type = %task.resource_type, "task completed");
    Ok(true)
  }

  /// Record a failed run: schedule a retry with backoff while attempts
  /// remain, otherwise finalize as `Failed`.
  pub async fn fail(&self, id: Uuid, error: &str) -> Result<FailOutcome> {
    let Some(mut task) = self.tasks.load(id).await? else {
      warn!(task_id = %id, "failure report for unknown task");
      return Ok(FailOutcome::Ignored);
    };
    if task.status != TaskStatus::Running {
      info!(task_id = %id, status = %task.status, "ignoring failure for task that is not running");
      return Ok(FailOutcome::Ignored);
    }

    let now = self.clock.now();
    task.retry_count += 1;
    task.error = Some(error.to_string());
    self.breaker.record_failure(task.resource_type).await?;

    if task.retry_count <= task.max_retries {
      let delay = self.config.retry_delay(task.retry_count);
      let ready_at = after(now, delay);
      task.status = TaskStatus::Retrying;
      self.tasks.save(&task).await?;
      self.retries.schedule(id, ready_at).await?;
      self.progress.record(&task.parent_id, id, Some(TaskStatus::Running), TaskStatus::Retrying).await?;
      warn!(
        task_id = %id,
        retry_count = task.retry_count,
        max_retries = task.max_retries,
        delay_secs = delay.as_secs(),
        error,
        "task failed, retry scheduled"
      );
      return Ok(FailOutcome::Retrying { retry_count: task.retry_count, ready_at });
    }

    task.status = TaskStatus::Failed;
    task.completed_at = Some(now);
    self.tasks.save(&task).await?;
    self.progress.record(&task.parent_id, id, Some(TaskStatus::Running), TaskStatus::Failed).await?;
    warn!(task_id = %id, retry_count = task.retry_count, error, "task failed permanently");
    Ok(FailOutcome::Failed { retry_count: task.retry_count })
  }

  /// Mark a task cancelled and take it out of the queues and retry schedule.
  /// A worker already running it is not interrupted; its later report is a
  /// no-op.
  pub async fn cancel(&self, id: Uuid) -> Result<bool> {
    let Some(mut task) = self.tasks.load(id).await? else {
      return Ok(false);
    };
    if !task.status.can_transition_to(TaskStatus::Cancelled) {
      return Ok(false);
    }
    let from = task.status;
    task.status = TaskStatus::Cancelled;
    task.completed_at = Some(self.clock.now());
    self.tasks.save(&task).await?;
    self.queues.remove(task.resource_type, id).await?;
    self.retries.remove(id).await?;
    self.progress.record(&task.parent_id, id, Some(from), TaskStatus::Cancelled).await?;
    info!(task_id = %id, previous = %from, "task cancelled");
    Ok(true)
  }

  pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>> {
    self.tasks.load(id).await
  }

  pub async fn get_progress(&self, parent_id: &str) -> Result<Option<ProgressRecord>> {
    self.progress.get(parent_id).await
  }

  /// Recompute a parent's progress from its task records.
  pub async fn rebuild_progress(&self, parent_id: &str) -> Result<Option<ProgressRecord>> {
    self.progress.rebuild(parent_id, &self.tasks).await
  }

  /// Move every retry whose backoff has elapsed back onto its priority queue.
  /// Tasks whose breaker is open stay scheduled for a later sweep. Safe to run
  /// concurrently on several instances: removing the retry entry is the
  /// atomic hand-off, and only the sweep that removed it re-enqueues the task.
  pub async fn sweep_retries(&self) -> Result<usize> {
    let now = self.clock.now();
    let mut requeued = 0;
    for (id, ready_at) in self.retries.due(now).await? {
      if !self.retries.remove(id).await? {
        debug!(task_id = %id, "retry taken by another sweep");
        continue;
      }
      match self.requeue_retry(id).await {
        Ok(Requeue::Done) => requeued += 1,
        Ok(Requeue::Dropped) => {}
        Ok(Requeue::Held) => self.retries.schedule(id, ready_at).await?,
        Err(e) => {
          if let Err(restore) = self.retries.schedule(id, ready_at).await {
            warn!(task_id = %id, error = %restore, "could not restore retry entry");
          }
          return Err(e);
        }
      }
    }
    if requeued > 0 {
      info!(requeued, "retry sweep complete");
    }
    Ok(requeued)
  }

  /// Re-enqueue a task whose retry entry this caller has just removed. A
  /// `Pending` record here means an earlier sweep stored it but never reached
  /// the queue.
  async fn requeue_retry(&self, id: Uuid) -> Result<Requeue> {
    let Some(mut task) = self.tasks.load(id).await? else {
      return Ok(Requeue::Dropped);
    };
    if !matches!(task.status, TaskStatus::Retrying | TaskStatus::Pending) {
      return Ok(Requeue::Dropped);
    }
    if self.breaker.is_open(task.resource_type).await? {
      debug!(task_id = %id, resource_type = %task.resource_type, "retry held back, circuit open");
      return Ok(Requeue::Held);
    }
    if task.status == TaskStatus::Retrying {
      task.status = TaskStatus::Pending;
      self.tasks.save(&task).await?;
    }
    self.queues.push(&task).await?;
    self.progress.record(&task.parent_id, id, Some(TaskStatus::Retrying), TaskStatus::Pending).await?;
    debug!(task_id = %id, retry_count = task.retry_count, "retry re-enqueued");
    Ok(Requeue::Done)
  }

  pub async fn queue_stats(&self, resource_type: Option<ResourceType>) -> Result<QueueStats> {
    let resources: Vec<ResourceType> = match resource_type {
      Some(r) => vec![r],
      None => ResourceType::ALL.to_vec(),
    };
    let mut queues = Vec::new();
    let mut circuits = Vec::with_capacity(resources.len());
    for r in resources {
      queues.extend(self.queues.depths(r).await?);
      circuits.push(self.breaker.status(r).await?);
    }
    Ok(QueueStats {
      queues,
      retrying: self.retries.len().await?,
      circuits,
    })
  }

  pub async fn circuit_status(&self, resource_type: ResourceType) -> Result<CircuitStatus> {
    self.breaker.status(resource_type).await
  }
}
