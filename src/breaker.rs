use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::clock::{after, Clock};
use crate::error::Result;
use crate::keys::Keyspace;
use crate::models::{CircuitStatus, ResourceType};
use crate::store::OrderedStore;

/// Per resource type consecutive-failure breaker.
///
/// The failure counter is a plain atomic counter. The open flag is a key
/// holding `open_until` with a TTL equal to the cooldown, so it clears itself
/// in the store; the timestamp is still compared against the clock on read.
/// There is no half-open state: once `open_until` passes the resource is
/// eligible again and the next failure re-opens it while the count stays at
/// or above the threshold.
#[derive(Clone)]
pub struct CircuitBreaker {
  store: Arc<dyn OrderedStore>,
  keys: Keyspace,
  clock: Arc<dyn Clock>,
  threshold: u32,
  cooldown: Duration,
}

impl CircuitBreaker {
  pub fn new(
    store: Arc<dyn OrderedStore>,
    keys: Keyspace,
    clock: Arc<dyn Clock>,
    threshold: u32,
    cooldown: Duration,
  ) -> Self {
    Self { store, keys, clock, threshold, cooldown }
  }

  /// `Some(open_until)` while the breaker is open.
  pub async fn open_until(&self, resource_type: ResourceType) -> Result<Option<DateTime<Utc>>> {
    let key = self.keys.breaker_open(resource_type);
    let Some(raw) = self.store.get(&key).await? else {
      return Ok(None);
    };
    let until = match DateTime::parse_from_rfc3339(&raw) {
      Ok(t) => t.with_timezone(&Utc),
      Err(e) => {
        warn!(resource_type = %resource_type, error = %e, "ignoring unreadable breaker flag");
        return Ok(None);
      }
    };
    Ok((until > self.clock.now()).then_some(until))
  }

  pub async fn is_open(&self, resource_type: ResourceType) -> Result<bool> {
    Ok(self.open_until(resource_type).await?.is_some())
  }

  /// Count one failure. Returns the new consecutive count and, when this
  /// failure opened the breaker, the time it stays open until.
  pub async fn record_failure(&self, resource_type: ResourceType) -> Result<(u32, Option<DateTime<Utc>>)> {
    let failures = self.store.incr(&self.keys.breaker_failures(resource_type)).await?.max(0) as u32;
    if failures < self.threshold {
      return Ok((failures, None));
    }
    let until = after(self.clock.now(), self.cooldown);
    self
      .store
      .set_ex(&self.keys.breaker_open(resource_type), &until.to_rfc3339(), self.cooldown)
      .await?;
    warn!(
      resource_type = %resource_type,
      failures,
      open_until = %until,
      "circuit breaker opened"
    );
    Ok((failures, Some(until)))
  }

  pub async fn record_success(&self, resource_type: ResourceType) -> Result<()> {
    self.store.del(&self.keys.breaker_failures(resource_type)).await?;
    self.store.del(&self.keys.breaker_open(resource_type)).await?;
    Ok(())
  }

  pub async fn status(&self, resource_type: ResourceType) -> Result<CircuitStatus> {
    let failures = self
      .store
      .get(&self.keys.breaker_failures(resource_type))
      .await?
      .and_then(|v| v.parse::<u32>().ok())
      .unwrap_or(0);
    let open_until = self.open_until(resource_type).await?;
    Ok(CircuitStatus {
      resource_type,
      open: open_until.is_some(),
      consecutive_failures: failures,
      threshold: self.threshold,
      open_until,
    })
  }
}
