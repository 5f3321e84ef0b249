use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
  fn now(&self) -> DateTime<Utc>;
}

/// `t + d`, saturating instead of overflowing.
pub fn after(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(d)
    .ok()
    .and_then(|delta| t.checked_add_signed(delta))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// A clock that only moves when told to. Used to drive backoff and breaker
/// cooldowns in tests without sleeping.
#[derive(Debug)]
pub struct ManualClock {
  base: DateTime<Utc>,
  elapsed_us: AtomicI64,
}

impl ManualClock {
  pub fn new(base: DateTime<Utc>) -> Self {
    Self {
      base,
      elapsed_us: AtomicI64::new(0),
    }
  }

  pub fn advance(&self, by: Duration) {
    self.elapsed_us.fetch_add(by.as_micros() as i64, Ordering::SeqCst);
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    self.base + chrono::Duration::microseconds(self.elapsed_us.load(Ordering::SeqCst))
  }
}
