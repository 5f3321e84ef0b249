use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{OrderedStore, StoreResult};
use crate::error::StoreError;

#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
  fn eq(&self, other: &Self) -> bool {
    self.cmp(other) == Ordering::Equal
  }
}

impl Eq for Score {}

impl PartialOrd for Score {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl Ord for Score {
  fn cmp(&self, other: &Self) -> Ordering {
    self.0.total_cmp(&other.0)
  }
}

#[derive(Debug, Default)]
struct SortedSet {
  ordered: BTreeSet<(Score, String)>,
  scores: HashMap<String, f64>,
}

impl SortedSet {
  fn insert(&mut self, member: &str, score: f64) {
    if let Some(old) = self.scores.insert(member.to_string(), score) {
      self.ordered.remove(&(Score(old), member.to_string()));
    }
    self.ordered.insert((Score(score), member.to_string()));
  }

  fn remove(&mut self, member: &str) -> bool {
    match self.scores.remove(member) {
      Some(old) => self.ordered.remove(&(Score(old), member.to_string())),
      None => false,
    }
  }

  fn pop_first(&mut self) -> Option<(String, f64)> {
    let (score, member) = self.ordered.pop_first()?;
    self.scores.remove(&member);
    Some((member, score.0))
  }
}

#[derive(Debug)]
enum Value {
  Str(String),
  Sorted(SortedSet),
  Hash(HashMap<String, String>),
}

#[derive(Debug)]
struct Entry {
  value: Value,
  expires_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct Inner {
  entries: HashMap<String, Entry>,
}

fn wrong_type(key: &str) -> StoreError {
  StoreError::Protocol(format!("WRONGTYPE operation against key '{}'", key))
}

impl Inner {
  fn live(&mut self, key: &str) -> Option<&mut Entry> {
    let expired = matches!(
      self.entries.get(key),
      Some(Entry { expires_at: Some(at), .. }) if *at <= Instant::now()
    );
    if expired {
      self.entries.remove(key);
    }
    self.entries.get_mut(key)
  }

  fn sorted(&mut self, key: &str) -> StoreResult<Option<&mut SortedSet>> {
    match self.live(key) {
      None => Ok(None),
      Some(Entry { value: Value::Sorted(z), .. }) => Ok(Some(z)),
      Some(_) => Err(wrong_type(key)),
    }
  }

  fn sorted_or_create(&mut self, key: &str) -> StoreResult<&mut SortedSet> {
    if self.live(key).is_none() {
      self.entries.insert(
        key.to_string(),
        Entry { value: Value::Sorted(SortedSet::default()), expires_at: None },
      );
    }
    self.sorted(key)?.ok_or_else(|| wrong_type(key))
  }

  fn hash(&mut self, key: &str) -> StoreResult<Option<&mut HashMap<String, String>>> {
    match self.live(key) {
      None => Ok(None),
      Some(Entry { value: Value::Hash(h), .. }) => Ok(Some(h)),
      Some(_) => Err(wrong_type(key)),
    }
  }

  fn hash_or_create(&mut self, key: &str) -> StoreResult<&mut HashMap<String, String>> {
    if self.live(key).is_none() {
      self.entries.insert(
        key.to_string(),
        Entry { value: Value::Hash(HashMap::new()), expires_at: None },
      );
    }
    self.hash(key)?.ok_or_else(|| wrong_type(key))
  }

  fn drop_if_empty(&mut self, key: &str) {
    let empty = match self.entries.get(key) {
      Some(Entry { value: Value::Sorted(z), .. }) => z.scores.is_empty(),
      Some(Entry { value: Value::Hash(h), .. }) => h.is_empty(),
      _ => false,
    };
    if empty {
      self.entries.remove(key);
    }
  }
}

/// In-process [`OrderedStore`] with the same atomicity as the networked
/// store: every call holds the lock for exactly one command.
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
  offline: AtomicBool,
  failing: RwLock<Option<String>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Simulate losing the connection to the store.
  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, AtomicOrdering::SeqCst);
  }

  /// Fail every command whose key contains `fragment`, leaving the rest of
  /// the keyspace reachable. `None` clears it.
  pub fn fail_keys_containing(&self, fragment: Option<&str>) {
    if let Ok(mut failing) = self.failing.write() {
      *failing = fragment.map(str::to_string);
    }
  }

  fn check(&self, key: &str) -> StoreResult<()> {
    if self.offline.load(AtomicOrdering::SeqCst) {
      return Err(StoreError::Unavailable("memory store is offline".into()));
    }
    let failing = self.failing.read().map(|f| f.clone()).unwrap_or_default();
    if failing.is_some_and(|fragment| key.contains(&fragment)) {
      return Err(StoreError::Unavailable(format!("key '{}' is unreachable", key)));
    }
    Ok(())
  }
}

#[async_trait]
impl OrderedStore for MemoryStore {
  async fn get(&self, key: &str) -> StoreResult<Option<String>> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    match inner.live(key) {
      None => Ok(None),
      Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
      Some(_) => Err(wrong_type(key)),
    }
  }

  async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    inner.entries.insert(
      key.to_string(),
      Entry { value: Value::Str(value.to_string()), expires_at: Some(Instant::now() + ttl) },
    );
    Ok(())
  }

  async fn del(&self, key: &str) -> StoreResult<()> {
    self.check(key)?;
    self.inner.lock().await.entries.remove(key);
    Ok(())
  }

  async fn incr(&self, key: &str) -> StoreResult<i64> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    match inner.live(key) {
      None => {
        inner.entries.insert(key.to_string(), Entry { value: Value::Str("1".into()), expires_at: None });
        Ok(1)
      }
      Some(Entry { value: Value::Str(s), .. }) => {
        let next = s
          .parse::<i64>()
          .map_err(|_| StoreError::Protocol(format!("value at '{}' is not an integer", key)))?
          + 1;
        *s = next.to_string();
        Ok(next)
      }
      Some(_) => Err(wrong_type(key)),
    }
  }

  async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<()> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    if let Some(entry) = inner.live(key) {
      entry.expires_at = Some(Instant::now() + ttl);
    }
    Ok(())
  }

  async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    inner.sorted_or_create(key)?.insert(member, score);
    Ok(())
  }

  async fn zpopmin(&self, key: &str) -> StoreResult<Option<(String, f64)>> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    let popped = match inner.sorted(key)? {
      Some(z) => z.pop_first(),
      None => None,
    };
    inner.drop_if_empty(key);
    Ok(popped)
  }

  async fn zrangebyscore(&self, key: &str, max: f64) -> StoreResult<Vec<(String, f64)>> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    Ok(match inner.sorted(key)? {
      Some(z) => z
        .ordered
        .iter()
        .take_while(|(score, _)| score.0 <= max)
        .map(|(score, member)| (member.clone(), score.0))
        .collect(),
      None => Vec::new(),
    })
  }

  async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    let removed = match inner.sorted(key)? {
      Some(z) => z.remove(member),
      None => false,
    };
    inner.drop_if_empty(key);
    Ok(removed)
  }

  async fn zcard(&self, key: &str) -> StoreResult<u64> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    Ok(inner.sorted(key)?.map(|z| z.scores.len() as u64).unwrap_or(0))
  }

  async fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    let created = inner
      .hash_or_create(key)?
      .insert(field.to_string(), value.to_string())
      .is_none();
    Ok(created)
  }

  async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    Ok(inner.hash(key)?.cloned().unwrap_or_default())
  }

  async fn hincrby(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
    self.check(key)?;
    let mut inner = self.inner.lock().await;
    let hash = inner.hash_or_create(key)?;
    let current = match hash.get(field) {
      Some(v) => v
        .parse::<i64>()
        .map_err(|_| StoreError::Protocol(format!("hash field '{}' is not an integer", field)))?,
      None => 0,
    };
    let next = current + delta;
    hash.insert(field.to_string(), next.to_string());
    Ok(next)
  }
}
