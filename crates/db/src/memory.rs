//! In-process store.
//!
//! Implements [`KvStore`] over a single map guarded by one lock, so a batch
//! is atomic with respect to every other call. Used for embedded deployments
//! and as the test double for the services.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::store::{
    Batch, Command, GeoMatch, GeoPoint, GeoUnit, KvStore, ScoredMember, StoreError, StoreResult,
};

#[derive(Debug, Clone)]
enum Value {
    Int(i64),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
    ZSet(HashMap<String, f64>),
    Geo(BTreeMap<String, GeoPoint>),
}

impl Value {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "string",
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
            Self::ZSet(_) | Self::Geo(_) => "zset",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Int(_) => false,
            Self::Hash(h) => h.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::ZSet(z) => z.is_empty(),
            Self::Geo(g) => g.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    const fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

type Keyspace = HashMap<String, Entry>;

/// In-memory [`KvStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    keyspace: Arc<RwLock<Keyspace>>,
    failing_execs: Arc<AtomicUsize>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to [`KvStore::exec`] fail with
    /// [`StoreError::Unavailable`] without applying anything.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn fail_next_execs(&self, count: usize) {
        self.failing_execs.store(count, Ordering::SeqCst);
    }

    /// Names of all live keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let keyspace = self.keyspace.read().await;
        let mut keys: Vec<String> = keyspace
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remaining time to live of a key, if it has one.
    pub async fn ttl(&self, key: &str) -> Option<std::time::Duration> {
        let now = Instant::now();
        let keyspace = self.keyspace.read().await;
        keyspace
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_execs
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn live<'a>(keyspace: &'a Keyspace, key: &str) -> Option<&'a Value> {
    let now = Instant::now();
    keyspace
        .get(key)
        .filter(|e| e.is_live(now))
        .map(|e| &e.value)
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

fn read_set<'a>(keyspace: &'a Keyspace, key: &str) -> StoreResult<Option<&'a BTreeSet<String>>> {
    match live(keyspace, key) {
        None => Ok(None),
        Some(Value::Set(s)) => Ok(Some(s)),
        Some(_) => Err(wrong_type(key, "set")),
    }
}

/// Members of a sorted set (or geo index) ordered by score, then member.
fn sorted_zset(keyspace: &Keyspace, key: &str) -> StoreResult<Vec<ScoredMember>> {
    let mut members: Vec<ScoredMember> = match live(keyspace, key) {
        None => return Ok(Vec::new()),
        Some(Value::ZSet(z)) => z
            .iter()
            .map(|(m, s)| ScoredMember::new(m.clone(), *s))
            .collect(),
        // Geo members carry no user-visible score here; order by name.
        Some(Value::Geo(g)) => g.keys().map(|m| ScoredMember::new(m.clone(), 0.0)).collect(),
        Some(_) => return Err(wrong_type(key, "zset")),
    };
    members.sort_by(|a, b| {
        a.score
            .total_cmp(&b.score)
            .then_with(|| a.member.cmp(&b.member))
    });
    Ok(members)
}

/// Resolve Redis-style inclusive rank bounds against a length.
fn rank_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Drop a key if it expired, so writes start from a clean slate.
fn purge_if_expired(keyspace: &mut Keyspace, key: &str) {
    let now = Instant::now();
    if keyspace.get(key).is_some_and(|e| !e.is_live(now)) {
        keyspace.remove(key);
    }
}

/// Type requirement of a command against the existing value.
fn check(keyspace: &Keyspace, command: &Command) -> StoreResult<()> {
    let key = command.key();
    let Some(existing) = live(keyspace, key) else {
        return Ok(());
    };
    let ok = match command {
        Command::HSet { .. } | Command::HDel { .. } | Command::HIncrBy { .. } => {
            matches!(existing, Value::Hash(_))
        }
        Command::SAdd { .. } | Command::SRem { .. } => matches!(existing, Value::Set(_)),
        Command::ZAdd { .. } | Command::ZIncrBy { .. } => matches!(existing, Value::ZSet(_)),
        Command::ZRem { .. } => matches!(existing, Value::ZSet(_) | Value::Geo(_)),
        Command::GeoAdd { .. } => matches!(existing, Value::Geo(_)),
        Command::Del { .. } | Command::Expire { .. } => true,
    };
    if ok {
        Ok(())
    } else {
        Err(wrong_type(key, existing.type_name()))
    }
}

/// Apply a command that already passed [`check`].
fn apply(keyspace: &mut Keyspace, command: Command) {
    let key = command.key().to_string();
    purge_if_expired(keyspace, &key);

    match command {
        Command::HSet { fields, .. } => {
            if let Value::Hash(h) = &mut keyspace
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())))
                .value
            {
                h.extend(fields);
            }
        }
        Command::HDel { fields, .. } => {
            if let Some(Entry {
                value: Value::Hash(h),
                ..
            }) = keyspace.get_mut(&key)
            {
                for field in &fields {
                    h.remove(field);
                }
            }
        }
        Command::HIncrBy { field, delta, .. } => {
            if let Value::Hash(h) = &mut keyspace
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())))
                .value
            {
                let current = h
                    .get(&field)
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(0);
                h.insert(field, (current + delta).to_string());
            }
        }
        Command::Del { .. } => {
            keyspace.remove(&key);
        }
        Command::SAdd { member, .. } => {
            if let Value::Set(s) = &mut keyspace
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())))
                .value
            {
                s.insert(member);
            }
        }
        Command::SRem { member, .. } => {
            if let Some(Entry {
                value: Value::Set(s),
                ..
            }) = keyspace.get_mut(&key)
            {
                s.remove(&member);
            }
        }
        Command::ZAdd { member, score, .. } => {
            if let Value::ZSet(z) = &mut keyspace
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::ZSet(HashMap::new())))
                .value
            {
                z.insert(member, score);
            }
        }
        Command::ZIncrBy { member, delta, .. } => {
            if let Value::ZSet(z) = &mut keyspace
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::ZSet(HashMap::new())))
                .value
            {
                *z.entry(member).or_insert(0.0) += delta;
            }
        }
        Command::ZRem { member, .. } => match keyspace.get_mut(&key).map(|e| &mut e.value) {
            Some(Value::ZSet(z)) => {
                z.remove(&member);
            }
            Some(Value::Geo(g)) => {
                g.remove(&member);
            }
            _ => {}
        },
        Command::GeoAdd { member, point, .. } => {
            if let Value::Geo(g) = &mut keyspace
                .entry(key.clone())
                .or_insert_with(|| Entry::new(Value::Geo(BTreeMap::new())))
                .value
            {
                g.insert(member, point);
            }
        }
        Command::Expire { ttl, .. } => {
            if let Some(entry) = keyspace.get_mut(&key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
    }

    // Like Redis, an emptied collection stops existing.
    if keyspace.get(&key).is_some_and(|e| e.value.is_empty()) {
        keyspace.remove(&key);
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut keyspace = self.keyspace.write().await;
        purge_if_expired(&mut keyspace, key);
        let entry = keyspace
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Int(0)));
        match &mut entry.value {
            Value::Int(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => Err(wrong_type(key, "string")),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let keyspace = self.keyspace.read().await;
        Ok(live(&keyspace, key).is_some())
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        let keyspace = self.keyspace.read().await;
        match live(&keyspace, key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let keyspace = self.keyspace.read().await;
        match live(&keyspace, key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(h.get(field).cloned()),
            Some(_) => Err(wrong_type(key, "hash")),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.write().await;
        purge_if_expired(&mut keyspace, key);
        let entry = keyspace
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(BTreeSet::new())));
        match &mut entry.value {
            Value::Set(s) => Ok(s.insert(member.to_string())),
            _ => Err(wrong_type(key, "set")),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.write().await;
        purge_if_expired(&mut keyspace, key);
        let removed = match keyspace.get_mut(key).map(|e| &mut e.value) {
            None => false,
            Some(Value::Set(s)) => s.remove(member),
            Some(_) => return Err(wrong_type(key, "set")),
        };
        if keyspace.get(key).is_some_and(|e| e.value.is_empty()) {
            keyspace.remove(key);
        }
        Ok(removed)
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let keyspace = self.keyspace.read().await;
        Ok(read_set(&keyspace, key)?.is_some_and(|s| s.contains(member)))
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let keyspace = self.keyspace.read().await;
        Ok(read_set(&keyspace, key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sinter(&self, keys: &[String]) -> StoreResult<Vec<String>> {
        let keyspace = self.keyspace.read().await;
        let mut sets = Vec::with_capacity(keys.len());
        for key in keys {
            match read_set(&keyspace, key)? {
                Some(s) => sets.push(s),
                None => return Ok(Vec::new()),
            }
        }
        sets.sort_by_key(|s| s.len());
        let Some((smallest, rest)) = sets.split_first() else {
            return Ok(Vec::new());
        };
        Ok(smallest
            .iter()
            .filter(|m| rest.iter().all(|s| s.contains(*m)))
            .cloned()
            .collect())
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        let mut keyspace = self.keyspace.write().await;
        purge_if_expired(&mut keyspace, key);
        let entry = keyspace
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::ZSet(HashMap::new())));
        match &mut entry.value {
            Value::ZSet(z) => {
                let score = z.entry(member.to_string()).or_insert(0.0);
                *score += delta;
                Ok(*score)
            }
            _ => Err(wrong_type(key, "zset")),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let keyspace = self.keyspace.read().await;
        match live(&keyspace, key) {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(z.get(member).copied()),
            Some(Value::Geo(g)) => Ok(g.get(member).map(|_| 0.0)),
            Some(_) => Err(wrong_type(key, "zset")),
        }
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let keyspace = self.keyspace.read().await;
        match live(&keyspace, key) {
            None => Ok(0),
            Some(Value::ZSet(z)) => Ok(z.len() as u64),
            Some(Value::Geo(g)) => Ok(g.len() as u64),
            Some(_) => Err(wrong_type(key, "zset")),
        }
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<ScoredMember>> {
        let keyspace = self.keyspace.read().await;
        let members = sorted_zset(&keyspace, key)?;
        Ok(match rank_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> StoreResult<Vec<ScoredMember>> {
        let keyspace = self.keyspace.read().await;
        let mut members = sorted_zset(&keyspace, key)?;
        members.reverse();
        Ok(match rank_bounds(members.len(), start, stop) {
            Some((from, to)) => members[from..=to].to_vec(),
            None => Vec::new(),
        })
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<ScoredMember>> {
        let keyspace = self.keyspace.read().await;
        Ok(sorted_zset(&keyspace, key)?
            .into_iter()
            .filter(|m| m.score >= min && m.score <= max)
            .collect())
    }

    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius: f64,
        unit: GeoUnit,
    ) -> StoreResult<Vec<GeoMatch>> {
        let keyspace = self.keyspace.read().await;
        let points = match live(&keyspace, key) {
            None => return Ok(Vec::new()),
            Some(Value::Geo(g)) => g,
            Some(_) => return Err(wrong_type(key, "geo")),
        };

        let radius_m = radius * unit.meters();
        let mut hits: Vec<(String, f64)> = points
            .iter()
            .map(|(member, point)| (member.clone(), center.distance_m(point)))
            .filter(|(_, d)| *d <= radius_m)
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        Ok(hits
            .into_iter()
            .map(|(member, d)| GeoMatch {
                member,
                distance: d / unit.meters(),
            })
            .collect())
    }

    async fn exec(&self, batch: Batch) -> StoreResult<()> {
        if self.take_injected_failure() {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }

        let mut keyspace = self.keyspace.write().await;
        // Type-check the whole batch first so a failing command leaves no
        // partial writes behind.
        for command in batch.commands() {
            check(&keyspace, command)?;
        }
        let count = batch.len();
        for command in batch.into_commands() {
            apply(&mut keyspace, command);
        }
        debug!(commands = count, "Applied batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_sadd_reports_new_members() {
        let store = MemoryStore::new();
        assert!(store.sadd("s", "a").await.unwrap());
        assert!(!store.sadd("s", "a").await.unwrap());
        assert!(store.srem("s", "a").await.unwrap());
        assert!(!store.srem("s", "a").await.unwrap());
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_exec_is_all_or_nothing_on_type_error() {
        let store = MemoryStore::new();
        store.sadd("set", "x").await.unwrap();

        let mut batch = Batch::new();
        batch.hset("h", [("f", "v")]).zadd("set", "m", 1.0);
        let err = store.exec(batch).await.unwrap_err();

        assert!(matches!(err, StoreError::WrongType { .. }));
        assert!(!store.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_injected_failure_applies_nothing() {
        let store = MemoryStore::new();
        store.fail_next_execs(1);

        let mut batch = Batch::new();
        batch.sadd("s", "a");
        assert!(matches!(
            store.exec(batch.clone()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(!store.exists("s").await.unwrap());

        store.exec(batch).await.unwrap();
        assert!(store.sismember("s", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_zrange_orders_ties_by_member() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch
            .zadd("z", "b", 1.0)
            .zadd("z", "a", 1.0)
            .zadd("z", "c", 0.5);
        store.exec(batch).await.unwrap();

        let asc: Vec<String> = store
            .zrange("z", 0, -1)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.member)
            .collect();
        assert_eq!(asc, vec!["c", "a", "b"]);

        let desc = store.zrevrange("z", 0, 0).await.unwrap();
        assert_eq!(desc, vec![ScoredMember::new("b", 1.0)]);

        assert!(store.zrange("z", 5, 10).await.unwrap().is_empty());
        assert_eq!(store.zrange("z", -2, -1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_hincrby_and_emptied_keys() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.hincrby("h", "n", 2).hincrby("h", "n", -3);
        store.exec(batch).await.unwrap();
        assert_eq!(store.hget("h", "n").await.unwrap().as_deref(), Some("-1"));

        let mut batch = Batch::new();
        batch.hdel("h", ["n"]);
        store.exec(batch).await.unwrap();
        assert!(!store.exists("h").await.unwrap());
    }

    #[tokio::test]
    async fn test_sinter_with_missing_key_is_empty() {
        let store = MemoryStore::new();
        store.sadd("a", "1").await.unwrap();
        store.sadd("a", "2").await.unwrap();
        store.sadd("b", "2").await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(store.sinter(&keys).await.unwrap(), vec!["2"]);

        let keys = vec!["a".to_string(), "missing".to_string()];
        assert!(store.sinter(&keys).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_sets_ttl() {
        let store = MemoryStore::new();
        store.sadd("likers", "v").await.unwrap();

        let mut batch = Batch::new();
        batch.expire("likers", Duration::from_secs(60));
        store.exec(batch).await.unwrap();

        let ttl = store.ttl("likers").await.unwrap();
        assert!(ttl <= Duration::from_secs(60));
        assert!(ttl > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_geo_radius_zero_hits_exact_point_only() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch
            .geoadd("g", "a", GeoPoint::new(10.0, 106.0))
            .geoadd("g", "b", GeoPoint::new(10.0001, 106.0));
        store.exec(batch).await.unwrap();

        let hits = store
            .geo_radius("g", GeoPoint::new(10.0, 106.0), 0.0, GeoUnit::Meters)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].member, "a");

        let mut batch = Batch::new();
        batch.zrem("g", "a");
        store.exec(batch).await.unwrap();
        assert_eq!(store.zcard("g").await.unwrap(), 1);
    }
}
