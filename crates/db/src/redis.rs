//! Redis-backed store.
//!
//! Batches are sent as a single `MULTI`/`EXEC` transaction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::Client;
use fred::error::{Error as RedisError, ErrorKind as RedisErrorKind};
use fred::interfaces::{
    ClientLike, GeoInterface, HashesInterface, KeysInterface, SetsInterface, SortedSetsInterface,
    TransactionInterface,
};
use fred::types::config::Config as RedisConfig;
use fred::types::geo::{GeoPosition, GeoUnit as RedisGeoUnit, GeoValue};
use fred::types::{SortOrder, Value};
use tracing::{debug, info};

use crate::store::{
    Batch, Command, GeoMatch, GeoPoint, GeoUnit, KvStore, ScoredMember, StoreError, StoreResult,
};

fn map_err(err: RedisError) -> StoreError {
    if err.details().starts_with("WRONGTYPE") {
        return StoreError::WrongType {
            key: String::new(),
            expected: "matching type",
        };
    }
    match err.kind() {
        RedisErrorKind::Parse => StoreError::Decode(err.to_string()),
        _ => StoreError::Unavailable(err.to_string()),
    }
}

const fn redis_unit(unit: GeoUnit) -> RedisGeoUnit {
    match unit {
        GeoUnit::Meters => RedisGeoUnit::Meters,
        GeoUnit::Kilometers => RedisGeoUnit::Kilometers,
        GeoUnit::Miles => RedisGeoUnit::Miles,
        GeoUnit::Feet => RedisGeoUnit::Feet,
    }
}

const fn position(point: GeoPoint) -> GeoPosition {
    GeoPosition {
        longitude: point.lng,
        latitude: point.lat,
    }
}

/// Stored positions are geohash-quantized, so a zero radius would miss the
/// exact point it was queried at.
const MIN_RADIUS_METERS: f64 = 0.5;

/// Decode a `GEORADIUS ... WITHDIST` reply of `[member, distance]` pairs.
fn geo_matches(reply: Value) -> StoreResult<Vec<GeoMatch>> {
    let decode = |msg: &str| StoreError::Decode(msg.to_string());
    let Value::Array(hits) = reply else {
        return match reply {
            Value::Null => Ok(Vec::new()),
            _ => Err(decode("geo reply is not an array")),
        };
    };

    hits.into_iter()
        .map(|hit| {
            let Value::Array(pair) = hit else {
                return Err(decode("geo hit is not a pair"));
            };
            let mut pair = pair.into_iter();
            let member = pair
                .next()
                .and_then(|v| v.as_string())
                .ok_or_else(|| decode("geo member is not a string"))?;
            let distance = pair
                .next()
                .and_then(|v| v.as_f64())
                .ok_or_else(|| decode("geo distance is not a number"))?;
            Ok(GeoMatch { member, distance })
        })
        .collect()
}

fn scored(pairs: Vec<(String, f64)>) -> Vec<ScoredMember> {
    pairs
        .into_iter()
        .map(|(member, score)| ScoredMember { member, score })
        .collect()
}

/// [`KvStore`] over a shared `fred` client.
#[derive(Clone)]
pub struct RedisStore {
    client: Arc<Client>,
}

impl RedisStore {
    /// Wrap an initialized client.
    #[must_use]
    pub const fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let config = RedisConfig::from_url(url).map_err(map_err)?;
        let client = Client::new(config, None, None, None);
        client.init().await.map_err(map_err)?;
        info!("Redis store connected");
        Ok(Self::new(Arc::new(client)))
    }

    /// Underlying client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn incr(&self, key: &str) -> StoreResult<i64> {
        self.client.incr(key).await.map_err(map_err)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let count: i64 = self.client.exists(key).await.map_err(map_err)?;
        Ok(count > 0)
    }

    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.client.hgetall(key).await.map_err(map_err)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.client.hget(key, field).await.map_err(map_err)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        let added: i64 = self.client.sadd(key, member).await.map_err(map_err)?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let removed: i64 = self.client.srem(key, member).await.map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.client.sismember(key, member).await.map_err(map_err)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.client.smembers(key).await.map_err(map_err)
    }

    async fn sinter(&self, keys: &[String]) -> StoreResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.client.sinter(keys.to_vec()).await.map_err(map_err)
    }

    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64> {
        self.client.zincrby(key, delta, member).await.map_err(map_err)
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.client.zscore(key, member).await.map_err(map_err)
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        self.client.zcard(key).await.map_err(map_err)
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<ScoredMember>> {
        let pairs: Vec<(String, f64)> = self
            .client
            .zrange(key, start, stop, None, false, None, true)
            .await
            .map_err(map_err)?;
        Ok(scored(pairs))
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> StoreResult<Vec<ScoredMember>> {
        let pairs: Vec<(String, f64)> = self
            .client
            .zrevrange(key, start, stop, true)
            .await
            .map_err(map_err)?;
        Ok(scored(pairs))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> StoreResult<Vec<ScoredMember>> {
        let pairs: Vec<(String, f64)> = self
            .client
            .zrangebyscore(key, min, max, true, None)
            .await
            .map_err(map_err)?;
        Ok(scored(pairs))
    }

    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius: f64,
        unit: GeoUnit,
    ) -> StoreResult<Vec<GeoMatch>> {
        let radius = radius.max(MIN_RADIUS_METERS / unit.meters());
        let reply: Value = self
            .client
            .georadius(
                key,
                position(center),
                radius,
                redis_unit(unit),
                false,
                true,
                false,
                None,
                Some(SortOrder::Asc),
                None,
                None,
            )
            .await
            .map_err(map_err)?;
        geo_matches(reply)
    }

    async fn exec(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len();
        let trx = self.client.multi();
        for command in batch.into_commands() {
            match command {
                Command::HSet { key, fields } => {
                    let fields: HashMap<String, String> = fields.into_iter().collect();
                    trx.hset::<(), _, _>(key, fields).await
                }
                Command::HDel { key, fields } => trx.hdel::<(), _, _>(key, fields).await,
                Command::HIncrBy { key, field, delta } => {
                    trx.hincrby::<(), _, _>(key, field, delta).await
                }
                Command::Del { key } => trx.del::<(), _>(key).await,
                Command::SAdd { key, member } => trx.sadd::<(), _, _>(key, member).await,
                Command::SRem { key, member } => trx.srem::<(), _, _>(key, member).await,
                Command::ZAdd { key, member, score } => {
                    trx.zadd::<(), _, _>(key, None, None, false, false, (score, member))
                        .await
                }
                Command::ZRem { key, member } => trx.zrem::<(), _, _>(key, member).await,
                Command::ZIncrBy { key, member, delta } => {
                    trx.zincrby::<(), _, _>(key, delta, member).await
                }
                Command::GeoAdd { key, member, point } => {
                    let value = GeoValue {
                        coordinates: position(point),
                        member: member.into(),
                    };
                    trx.geoadd::<(), _, _>(key, None, false, value).await
                }
                Command::Expire { key, ttl } => {
                    let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
                    trx.expire::<(), _>(key, secs, None).await
                }
            }
            .map_err(map_err)?;
        }

        let _: Value = trx.exec(true).await.map_err(map_err)?;
        debug!(commands = count, "Committed transaction");
        Ok(())
    }
}
