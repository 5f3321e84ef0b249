//! Shared ordered store abstraction.
//!
//! All scheduler state lives behind [`OrderedStore`] so that any number of
//! scheduler processes can share one logical queue. Every method maps to a
//! single atomic command on the backing store; multi-step sequences are
//! composed by callers and are never transactional.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::{connect_redis, RedisStore};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrderedStore: Send + Sync {
  async fn get(&self, key: &str) -> StoreResult<Option<String>>;

  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

  async fn del(&self, key: &str) -> StoreResult<()>;

  /// Atomically increment an integer key, creating it at zero.
  async fn incr(&self, key: &str) -> StoreResult<i64>;

  async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()>;

  /// Add or re-score a sorted-set member.
  async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

  /// Atomically remove and return the lowest-scored member.
  async fn zpopmin(&self, key: &str) -> StoreResult<Option<(String, f64)>>;

  /// Members with score <= `max`, lowest first.
  async fn zrangebyscore(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>>;

  /// Returns whether the member was present.
  async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

  async fn zcard(&self, key: &str) -> StoreResult<u64>;

  /// Returns true when the field did not exist before.
  async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool>;

  async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

  async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;
}
