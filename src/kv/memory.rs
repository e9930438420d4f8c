use async_trait::async_trait;
use moka::future::Cache;
use moka::ops::compute::Op;
use moka::Expiry;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::info;

use super::{KvStore, StoreError};

#[derive(Clone, Debug)]
enum Value {
    Text(String),
    Int(i64),
    Hash(BTreeMap<String, String>),
    Set(BTreeSet<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "string",
            Value::Int(_) => "integer",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
        }
    }
}

#[derive(Clone, Debug)]
struct StoreEntry {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoreEntry {
    fn new(value: Value, ttl: Option<Duration>, now: Instant) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now + ttl),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Each entry carries its own deadline so moka evicts it at the right time.
struct EntryExpiry;

impl Expiry<String, StoreEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoreEntry,
        created_at: Instant,
    ) -> Option<Duration> {
        value.expires_at.map(|at| at.saturating_duration_since(created_at))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoreEntry,
        updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.expires_at.map(|at| at.saturating_duration_since(updated_at))
    }
}

enum Change {
    Keep,
    Put(StoreEntry),
    Remove,
}

/// In-process [`KvStore`] backed by a moka cache.
///
/// Good for a single instance and for tests; a multi-instance deployment
/// plugs a networked store in behind the same trait.
#[derive(Clone)]
pub struct MemoryKvStore {
    cache: Cache<String, StoreEntry>,
}

impl MemoryKvStore {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryExpiry)
            .build();
        info!("In-memory key/TTL store initialized (capacity {})", max_capacity);
        Self { cache }
    }

    async fn live(&self, key: &str) -> Option<StoreEntry> {
        let now = Instant::now();
        self.cache.get(key).await.filter(|entry| entry.is_live(now))
    }

    /// Atomic read-modify-write of a single key.
    async fn modify<T, F>(&self, key: &str, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: FnOnce(Option<StoreEntry>, Instant) -> Result<(Change, T), StoreError> + Send,
    {
        let now = Instant::now();
        let mut outcome: Option<Result<T, StoreError>> = None;
        let slot = &mut outcome;
        self.cache
            .entry_by_ref(key)
            .and_compute_with(move |current| {
                let current = current
                    .map(|entry| entry.into_value())
                    .filter(|entry| entry.is_live(now));
                let op = match f(current, now) {
                    Ok((change, value)) => {
                        *slot = Some(Ok(value));
                        match change {
                            Change::Keep => Op::Nop,
                            Change::Put(entry) => Op::Put(entry),
                            Change::Remove => Op::Remove,
                        }
                    }
                    Err(e) => {
                        *slot = Some(Err(e));
                        Op::Nop
                    }
                };
                std::future::ready(op)
            })
            .await;
        outcome.unwrap_or_else(|| {
            Err(StoreError::Unavailable(format!(
                "compute on key '{}' did not run",
                key
            )))
        })
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

fn wrong_type(key: &str, expected: &'static str, found: &Value) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.live(key).await {
            None => Ok(None),
            Some(StoreEntry { value: Value::Text(text), .. }) => Ok(Some(text)),
            Some(StoreEntry { value: Value::Int(n), .. }) => Ok(Some(n.to_string())),
            Some(entry) => Err(wrong_type(key, "string", &entry.value)),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let entry = StoreEntry::new(Value::Text(value), ttl, Instant::now());
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        self.modify(key, move |current, now| match current {
            Some(_) => Ok((Change::Keep, false)),
            None => Ok((Change::Put(StoreEntry::new(Value::Text(value), ttl, now)), true)),
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<bool, StoreError> {
        self.modify(key, |current, _| Ok((Change::Remove, current.is_some())))
            .await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.modify(key, move |current, now| match current {
            Some(mut entry) => {
                entry.expires_at = Some(now + ttl);
                Ok((Change::Put(entry), true))
            }
            None => Ok((Change::Keep, false)),
        })
        .await
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64, StoreError> {
        let owned_key = key.to_string();
        self.modify(key, move |current, now| {
            let (base, expires_at) = match current {
                None => (0, None),
                Some(StoreEntry { value: Value::Int(n), expires_at }) => (n, expires_at),
                Some(StoreEntry { value: Value::Text(text), expires_at }) => {
                    let n = text.parse::<i64>().map_err(|_| StoreError::WrongType {
                        key: owned_key.clone(),
                        expected: "integer",
                        found: "string",
                    })?;
                    (n, expires_at)
                }
                Some(entry) => return Err(wrong_type(&owned_key, "integer", &entry.value)),
            };
            let next = base + delta;
            let expires_at = ttl.map(|ttl| now + ttl).or(expires_at);
            let entry = StoreEntry { value: Value::Int(next), expires_at };
            Ok((Change::Put(entry), next))
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        let owned_key = key.to_string();
        let field = field.to_string();
        self.modify(key, move |current, _| match current {
            None => {
                let mut hash = BTreeMap::new();
                hash.insert(field, value);
                let entry = StoreEntry { value: Value::Hash(hash), expires_at: None };
                Ok((Change::Put(entry), ()))
            }
            Some(StoreEntry { value: Value::Hash(mut hash), expires_at }) => {
                hash.insert(field, value);
                let entry = StoreEntry { value: Value::Hash(hash), expires_at };
                Ok((Change::Put(entry), ()))
            }
            Some(entry) => Err(wrong_type(&owned_key, "hash", &entry.value)),
        })
        .await
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError> {
        let owned_key = key.to_string();
        let field = field.to_string();
        self.modify(key, move |current, _| match current {
            None => Ok((Change::Keep, false)),
            Some(StoreEntry { value: Value::Hash(mut hash), expires_at }) => {
                let removed = hash.remove(&field).is_some();
                if hash.is_empty() {
                    Ok((Change::Remove, removed))
                } else {
                    let entry = StoreEntry { value: Value::Hash(hash), expires_at };
                    Ok((Change::Put(entry), removed))
                }
            }
            Some(entry) => Err(wrong_type(&owned_key, "hash", &entry.value)),
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError> {
        match self.live(key).await {
            None => Ok(BTreeMap::new()),
            Some(StoreEntry { value: Value::Hash(hash), .. }) => Ok(hash),
            Some(entry) => Err(wrong_type(key, "hash", &entry.value)),
        }
    }

    async fn hlen(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.hgetall(key).await?.len())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let owned_key = key.to_string();
        let member = member.to_string();
        self.modify(key, move |current, _| match current {
            None => {
                let mut set = BTreeSet::new();
                set.insert(member);
                let entry = StoreEntry { value: Value::Set(set), expires_at: None };
                Ok((Change::Put(entry), true))
            }
            Some(StoreEntry { value: Value::Set(mut set), expires_at }) => {
                let added = set.insert(member);
                let entry = StoreEntry { value: Value::Set(set), expires_at };
                Ok((Change::Put(entry), added))
            }
            Some(entry) => Err(wrong_type(&owned_key, "set", &entry.value)),
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let owned_key = key.to_string();
        let member = member.to_string();
        self.modify(key, move |current, _| match current {
            None => Ok((Change::Keep, false)),
            Some(StoreEntry { value: Value::Set(mut set), expires_at }) => {
                let removed = set.remove(&member);
                if set.is_empty() {
                    Ok((Change::Remove, removed))
                } else {
                    let entry = StoreEntry { value: Value::Set(set), expires_at };
                    Ok((Change::Put(entry), removed))
                }
            }
            Some(entry) => Err(wrong_type(&owned_key, "set", &entry.value)),
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
        match self.live(key).await {
            None => Ok(BTreeSet::new()),
            Some(StoreEntry { value: Value::Set(set), .. }) => Ok(set),
            Some(entry) => Err(wrong_type(key, "set", &entry.value)),
        }
    }
}
