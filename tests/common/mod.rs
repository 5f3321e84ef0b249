#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ptqs::clock::{Clock, ManualClock};
use ptqs::config::SchedulerConfig;
use ptqs::models::{Priority, ResourceType, Task};
use ptqs::store::{MemoryStore, OrderedStore, StoreResult};
use ptqs::Scheduler;
use serde_json::json;
use tokio::sync::Notify;

pub struct Harness {
  pub scheduler: Scheduler,
  pub clock: Arc<ManualClock>,
  pub store: Arc<MemoryStore>,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_config(SchedulerConfig::default())
  }

  pub fn with_config(config: SchedulerConfig) -> Self {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    let scheduler = Scheduler::with_clock(store.clone(), config, clock.clone());
    Self { scheduler, clock, store }
  }

  /// A task created "now", after which the clock ticks one millisecond so
  /// successive tasks get distinct creation times.
  pub fn task(&self, resource_type: ResourceType, priority: Priority, parent_id: &str) -> Task {
    let task = Task::new(resource_type, priority, parent_id, json!({"query": "acme"}), self.clock.now());
    self.clock.advance(Duration::from_millis(1));
    task
  }

  /// A second scheduler instance over the same store and clock.
  pub fn peer(&self, store: Arc<dyn OrderedStore>) -> Scheduler {
    Scheduler::with_clock(store, SchedulerConfig::default(), self.clock.clone())
  }
}

/// Wraps a store and, once armed, parks the next task-record read until
/// released, so a test can interleave another instance at that point.
pub struct GatedStore {
  inner: Arc<MemoryStore>,
  armed: AtomicBool,
  pub reached: Notify,
  pub release: Notify,
}

impl GatedStore {
  pub fn new(inner: Arc<MemoryStore>) -> Self {
    Self { inner, armed: AtomicBool::new(false), reached: Notify::new(), release: Notify::new() }
  }

  pub fn arm(&self) {
    self.armed.store(true, Ordering::SeqCst);
  }
}

#[async_trait]
impl OrderedStore for GatedStore {
  async fn get(&self, key: &str) -> StoreResult<Option<String>> {
    if key.contains(":task:") && self.armed.swap(false, Ordering::SeqCst) {
      self.reached.notify_one();
      self.release.notified().await;
    }
    self.inner.get(key).await
  }

  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
    self.inner.set_ex(key, value, ttl).await
  }

  async fn del(&self, key: &str) -> StoreResult<()> {
    self.inner.del(key).await
  }

  async fn incr(&self, key: &str) -> StoreResult<i64> {
    self.inner.incr(key).await
  }

  async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
    self.inner.expire(key, ttl).await
  }

  async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
    self.inner.zadd(key, member, score).await
  }

  async fn zpopmin(&self, key: &str) -> StoreResult<Option<(String, f64)>> {
    self.inner.zpopmin(key).await
  }

  async fn zrangebyscore(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>> {
    self.inner.zrangebyscore(key, max).await
  }

  async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
    self.inner.zrem(key, member).await
  }

  async fn zcard(&self, key: &str) -> StoreResult<u64> {
    self.inner.zcard(key).await
  }

  async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
    self.inner.hset(key, field, value).await
  }

  async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
    self.inner.hgetall(key).await
  }

  async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
    self.inner.hincrby(key, field, delta).await
  }
}
