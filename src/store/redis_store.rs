use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::info;

use super::{OrderedStore, StoreResult};
use crate::error::StoreError;

static MAX_RETRIES: usize = 5;
static DELAY: u64 = 100;

/// [`OrderedStore`] backed by a Redis server. The multiplexed connection is
/// cheap to clone, so each command runs on its own clone.
#[derive(Clone)]
pub struct RedisStore {
  conn: MultiplexedConnection,
}

impl RedisStore {
  pub fn new(conn: MultiplexedConnection) -> Self {
    Self { conn }
  }

  async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> StoreResult<T> {
    let mut conn = self.conn.clone();
    let value: T = cmd.query_async(&mut conn).await?;
    Ok(value)
  }
}

pub async fn connect_redis(redis_url: &str) -> Result<RedisStore, StoreError> {
  let client = redis::Client::open(redis_url)?;
  let conn = Retry::spawn(ExponentialBackoff::from_millis(DELAY).take(MAX_RETRIES), || {
    client.get_multiplexed_async_connection()
  })
    .await?;
  info!("Redis connection established");
  Ok(RedisStore::new(conn))
}

fn ttl_secs(ttl: Duration) -> u64 {
  ttl.as_secs().max(1)
}

#[async_trait]
impl OrderedStore for RedisStore {
  async fn get(&self, key: &str) -> StoreResult<Option<String>> {
    self.query(redis::cmd("GET").arg(key)).await
  }

  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
    self.query(redis::cmd("SET").arg(key).arg(value).arg("EX").arg(ttl_secs(ttl))).await
  }

  async fn del(&self, key: &str) -> StoreResult<()> {
    self.query(redis::cmd("DEL").arg(key)).await
  }

  async fn incr(&self, key: &str) -> StoreResult<i64> {
    self.query(redis::cmd("INCR").arg(key)).await
  }

  async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
    self.query(redis::cmd("EXPIRE").arg(key).arg(ttl_secs(ttl))).await
  }

  async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
    self.query(redis::cmd("ZADD").arg(key).arg(score).arg(member)).await
  }

  async fn zpopmin(&self, key: &str) -> StoreResult<Option<(String, f64)>> {
    let popped: Vec<(String, f64)> = self.query(redis::cmd("ZPOPMIN").arg(key)).await?;
    Ok(popped.into_iter().next())
  }

  async fn zrangebyscore(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>> {
    self
      .query(redis::cmd("ZRANGEBYSCORE").arg(key).arg("-inf").arg(max).arg("WITHSCORES"))
      .await
  }

  async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
    let removed: i64 = self.query(redis::cmd("ZREM").arg(key).arg(member)).await?;
    Ok(removed > 0)
  }

  async fn zcard(&self, key: &str) -> StoreResult<u64> {
    self.query(redis::cmd("ZCARD").arg(key)).await
  }

  async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
    let created: i64 = self.query(redis::cmd("HSET").arg(key).arg(field).arg(value)).await?;
    Ok(created > 0)
  }

  async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
    self.query(redis::cmd("HGETALL").arg(key)).await
  }

  async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
    self.query(redis::cmd("HINCRBY").arg(key).arg(field).arg(delta)).await
  }
}
