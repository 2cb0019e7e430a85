//! Backing store abstraction.
//!
//! Every component talks to the store through [`KvStore`]. Reads and the two
//! gate primitives ([`KvStore::sadd`] / [`KvStore::srem`]) execute on their
//! own; every other mutation is staged into a [`Batch`] and committed with
//! [`KvStore::exec`], which applies all commands atomically.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use icom_common::AppError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store result type.
pub type StoreResult<T> = Result<T, StoreError>;

/// Backing store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport or server failure.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A key holds a different data type than the command expects.
    #[error("Wrong type for key {key}: expected {expected}")]
    WrongType {
        /// Offending key.
        key: String,
        /// Expected data type.
        expected: &'static str,
    },

    /// A reply could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// A sorted-set member with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMember {
    /// Member name.
    pub member: String,
    /// Score.
    pub score: f64,
}

impl ScoredMember {
    /// Create a scored member.
    #[must_use]
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude.
    pub lat: f64,
    /// Longitude.
    pub lng: f64,
}

/// Lowest latitude the geo index accepts.
pub const GEO_LAT_MIN: f64 = -85.051_128_78;
/// Highest latitude the geo index accepts.
pub const GEO_LAT_MAX: f64 = 85.051_128_78;

/// Mean earth radius used for distances, in meters.
const EARTH_RADIUS_M: f64 = 6_372_797.560_856;

impl GeoPoint {
    /// Create a point.
    #[must_use]
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether the point lies inside the indexable range.
    #[must_use]
    pub fn is_indexable(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (GEO_LAT_MIN..=GEO_LAT_MAX).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Great-circle distance to `other`, in meters.
    #[must_use]
    pub fn distance_m(&self, other: &Self) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let d_lat = (other.lat - self.lat).to_radians();
        let d_lng = (other.lng - self.lng).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Distance unit of a radius query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeoUnit {
    /// Meters.
    #[serde(rename = "m")]
    Meters,
    /// Kilometers.
    #[default]
    #[serde(rename = "km")]
    Kilometers,
    /// Miles.
    #[serde(rename = "mi")]
    Miles,
    /// Feet.
    #[serde(rename = "ft")]
    Feet,
}

impl GeoUnit {
    /// Meters per one of this unit.
    #[must_use]
    pub const fn meters(self) -> f64 {
        match self {
            Self::Meters => 1.0,
            Self::Kilometers => 1000.0,
            Self::Miles => 1609.34,
            Self::Feet => 0.3048,
        }
    }

    /// Unit abbreviation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Meters => "m",
            Self::Kilometers => "km",
            Self::Miles => "mi",
            Self::Feet => "ft",
        }
    }
}

impl fmt::Display for GeoUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GeoUnit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "km" => Ok(Self::Kilometers),
            "m" => Ok(Self::Meters),
            "mi" => Ok(Self::Miles),
            "ft" => Ok(Self::Feet),
            other => Err(AppError::Validation(format!("Unknown distance unit: {other}"))),
        }
    }
}

/// A radius query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMatch {
    /// Member name.
    pub member: String,
    /// Distance from the query center, in the query unit.
    pub distance: f64,
}

/// A staged store mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set hash fields.
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Remove hash fields.
    HDel { key: String, fields: Vec<String> },
    /// Add to an integer hash field.
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// Delete a key of any type.
    Del { key: String },
    /// Add a set member.
    SAdd { key: String, member: String },
    /// Remove a set member.
    SRem { key: String, member: String },
    /// Set a sorted-set member's score.
    ZAdd {
        key: String,
        member: String,
        score: f64,
    },
    /// Remove a sorted-set (or geo) member.
    ZRem { key: String, member: String },
    /// Add to a sorted-set member's score.
    ZIncrBy {
        key: String,
        member: String,
        delta: f64,
    },
    /// Set a member's position in a geo index.
    GeoAdd {
        key: String,
        member: String,
        point: GeoPoint,
    },
    /// Set a key's time to live.
    Expire { key: String, ttl: Duration },
}

impl Command {
    /// Key the command writes to.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::HSet { key, .. }
            | Self::HDel { key, .. }
            | Self::HIncrBy { key, .. }
            | Self::Del { key }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::ZAdd { key, .. }
            | Self::ZRem { key, .. }
            | Self::ZIncrBy { key, .. }
            | Self::GeoAdd { key, .. }
            | Self::Expire { key, .. } => key,
        }
    }
}

/// An ordered list of mutations committed atomically by [`KvStore::exec`].
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    /// Create an empty batch.
    pub const fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    /// Whether nothing has been staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of staged commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Staged commands, in order.
    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consume the batch.
    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Append a raw command.
    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Append every command of another batch.
    pub fn extend(&mut self, other: Self) -> &mut Self {
        self.commands.extend(other.commands);
        self
    }

    /// Stage `HSET key field value [field value ...]`.
    pub fn hset<I, F, V>(&mut self, key: impl Into<String>, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        let fields: Vec<(String, String)> = fields
            .into_iter()
            .map(|(f, v)| (f.into(), v.into()))
            .collect();
        if fields.is_empty() {
            return self;
        }
        self.push(Command::HSet {
            key: key.into(),
            fields,
        })
    }

    /// Stage `HDEL`.
    pub fn hdel<I, F>(&mut self, key: impl Into<String>, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return self;
        }
        self.push(Command::HDel {
            key: key.into(),
            fields,
        })
    }

    /// Stage `HINCRBY`.
    pub fn hincrby(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        delta: i64,
    ) -> &mut Self {
        self.push(Command::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        })
    }

    /// Stage `DEL`.
    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.push(Command::Del { key: key.into() })
    }

    /// Stage `SADD`.
    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SAdd {
            key: key.into(),
            member: member.into(),
        })
    }

    /// Stage `SREM`.
    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::SRem {
            key: key.into(),
            member: member.into(),
        })
    }

    /// Stage `ZADD`.
    pub fn zadd(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        score: f64,
    ) -> &mut Self {
        self.push(Command::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        })
    }

    /// Stage `ZREM`.
    pub fn zrem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.push(Command::ZRem {
            key: key.into(),
            member: member.into(),
        })
    }

    /// Stage `ZINCRBY`.
    pub fn zincrby(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        delta: f64,
    ) -> &mut Self {
        self.push(Command::ZIncrBy {
            key: key.into(),
            member: member.into(),
            delta,
        })
    }

    /// Stage `GEOADD`.
    pub fn geoadd(
        &mut self,
        key: impl Into<String>,
        member: impl Into<String>,
        point: GeoPoint,
    ) -> &mut Self {
        self.push(Command::GeoAdd {
            key: key.into(),
            member: member.into(),
            point,
        })
    }

    /// Stage `EXPIRE`.
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> &mut Self {
        self.push(Command::Expire {
            key: key.into(),
            ttl,
        })
    }
}

/// Primitive key-value store the engine is built on.
///
/// Sorted-set ranges follow Redis semantics: ascending ranges order equal
/// scores by member ascending, descending ranges by member descending, and
/// negative indices count from the end.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Atomically increment an integer key, returning the new value.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Whether a key exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// All fields of a hash (empty when the key is absent).
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// A single hash field.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// Add a set member, returning whether it was newly added.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Remove a set member, returning whether it was present.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Whether a set contains a member.
    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// All members of a set.
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Intersection of several sets.
    async fn sinter(&self, keys: &[String]) -> StoreResult<Vec<String>>;

    /// Add to a sorted-set member's score, creating it when absent.
    async fn zincrby(&self, key: &str, member: &str, delta: f64) -> StoreResult<f64>;

    /// Score of a sorted-set member.
    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Cardinality of a sorted set.
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Members by rank, ascending, with scores.
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<ScoredMember>>;

    /// Members by rank, descending, with scores.
    async fn zrevrange(&self, key: &str, start: i64, stop: i64)
    -> StoreResult<Vec<ScoredMember>>;

    /// Members with `min <= score <= max`, ascending, with scores.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64)
    -> StoreResult<Vec<ScoredMember>>;

    /// Members of a geo index within `radius` of `center`, nearest first.
    async fn geo_radius(
        &self,
        key: &str,
        center: GeoPoint,
        radius: f64,
        unit: GeoUnit,
    ) -> StoreResult<Vec<GeoMatch>>;

    /// Apply every command of the batch atomically.
    async fn exec(&self, batch: Batch) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_skips_empty_field_lists() {
        let mut batch = Batch::new();
        batch
            .hset("h", Vec::<(String, String)>::new())
            .hdel("h", Vec::<String>::new());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_batch_preserves_order() {
        let mut batch = Batch::new();
        batch.sadd("a", "1").zadd("b", "1", 2.0).del("c");
        let keys: Vec<&str> = batch.commands().iter().map(Command::key).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_geo_unit_parsing() {
        assert_eq!("".parse::<GeoUnit>().unwrap(), GeoUnit::Kilometers);
        assert_eq!("mi".parse::<GeoUnit>().unwrap(), GeoUnit::Miles);
        assert!(matches!(
            "parsec".parse::<GeoUnit>(),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_distance_zero_and_known_pair() {
        let hanoi = GeoPoint::new(21.0285, 105.8542);
        assert_eq!(hanoi.distance_m(&hanoi), 0.0);

        let hcmc = GeoPoint::new(10.8231, 106.6297);
        let km = hanoi.distance_m(&hcmc) / GeoUnit::Kilometers.meters();
        assert!((1130.0..1160.0).contains(&km), "got {km}");
    }

    #[test]
    fn test_indexable_range() {
        assert!(GeoPoint::new(85.0, 180.0).is_indexable());
        assert!(!GeoPoint::new(86.0, 0.0).is_indexable());
        assert!(!GeoPoint::new(0.0, f64::NAN).is_indexable());
    }
}
