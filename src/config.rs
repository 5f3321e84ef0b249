use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::models::DEFAULT_MAX_RETRIES;

/// Delays applied after the 1st, 2nd, 3rd and 4th failure of a task.
pub const DEFAULT_BACKOFF: [Duration; 4] = [
  Duration::from_secs(0),
  Duration::from_secs(30),
  Duration::from_secs(5 * 60),
  Duration::from_secs(30 * 60),
];

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  pub key_prefix: String,
  pub breaker_threshold: u32,
  pub breaker_cooldown: Duration,
  pub backoff: Vec<Duration>,
  /// Delay for any attempt past the end of `backoff`.
  pub backoff_fallback: Duration,
  pub task_ttl: Duration,
  pub progress_ttl: Duration,
  /// Retry budget for submissions that do not name one.
  pub default_max_retries: u32,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      key_prefix: "ptqs".into(),
      breaker_threshold: 5,
      breaker_cooldown: Duration::from_secs(300),
      backoff: DEFAULT_BACKOFF.to_vec(),
      backoff_fallback: Duration::from_secs(60 * 60),
      task_ttl: Duration::from_secs(7 * 24 * 60 * 60),
      progress_ttl: Duration::from_secs(30 * 24 * 60 * 60),
      default_max_retries: DEFAULT_MAX_RETRIES,
    }
  }
}

impl SchedulerConfig {
  pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.key_prefix = prefix.into();
    self
  }

  pub fn with_breaker(mut self, threshold: u32, cooldown: Duration) -> Self {
    self.breaker_threshold = threshold;
    self.breaker_cooldown = cooldown;
    self
  }

  pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
    self.default_max_retries = max_retries;
    self
  }

  pub fn with_backoff(mut self, table: Vec<Duration>, fallback: Duration) -> Self {
    self.backoff = table;
    self.backoff_fallback = fallback;
    self
  }

  /// Backoff before retry number `retry_count` (1-based).
  pub fn retry_delay(&self, retry_count: u32) -> Duration {
    retry_count
      .checked_sub(1)
      .and_then(|i| self.backoff.get(i as usize).copied())
      .unwrap_or(self.backoff_fallback)
  }
}

#[derive(Debug, Clone)]
pub struct Config {
  pub redis_url: String,
  pub server_port: u16,
  pub worker_id: String,
  pub worker_concurrency: usize,
  pub sweep_interval: Duration,
  pub scheduler: SchedulerConfig,
}

fn var_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
  T::Err: std::error::Error + Send + Sync + 'static,
{
  match env::var(name) {
    Ok(raw) => raw.parse().with_context(|| format!("invalid value for {}: '{}'", name, raw)),
    Err(_) => Ok(default),
  }
}

impl Config {
  pub fn from_env() -> Result<Self> {
    let defaults = SchedulerConfig::default();
    let scheduler = SchedulerConfig {
      key_prefix: env::var("PTQS_KEY_PREFIX").unwrap_or(defaults.key_prefix.clone()),
      breaker_threshold: var_or("BREAKER_THRESHOLD", defaults.breaker_threshold)?,
      breaker_cooldown: Duration::from_secs(var_or(
        "BREAKER_COOLDOWN_SECS",
        defaults.breaker_cooldown.as_secs(),
      )?),
      default_max_retries: var_or("DEFAULT_MAX_RETRIES", defaults.default_max_retries)?,
      ..defaults
    };
    Ok(Self {
      redis_url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
      server_port: var_or("SERVER_PORT", 8080)?,
      worker_id: env::var("WORKER_ID").unwrap_or_else(|_| format!("worker-{}", std::process::id())),
      worker_concurrency: var_or("WORKER_CONCURRENCY", 4)?,
      sweep_interval: Duration::from_secs(var_or("SWEEP_INTERVAL_SECS", 10)?),
      scheduler,
    })
  }
}
