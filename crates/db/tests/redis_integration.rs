//! Redis store integration tests.
//!
//! These tests require a running Redis instance that may be wiped.
//! Run with: `cargo test --test redis_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_REDIS_HOST` (default: localhost)
//!   `TEST_REDIS_PORT` (default: 6380)
//!   `TEST_REDIS_DB` (default: 15)

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use icom_db::test_utils::TestRedis;
use icom_db::{Batch, GeoPoint, GeoUnit, KvStore, ScoredMember};

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_redis_connection() {
    let redis = TestRedis::new().await;
    assert!(redis.is_ok(), "Failed to connect: {:?}", redis.err());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_batch_commits_every_command() {
    let store = TestRedis::new().await.unwrap().store;

    let mut batch = Batch::new();
    batch
        .hset("icom:c1", [("name", "Chợ Lớn")])
        .hincrby("icom:c1", "totalMembers", 1)
        .sadd("icom:c1:idx:industry:food", "s1")
        .zadd("icom:c1:members", "s1", 5.0)
        .zincrby("icom:c1:meta:industries", "food", 1.0);
    store.exec(batch).await.unwrap();

    assert_eq!(
        store.hget("icom:c1", "totalMembers").await.unwrap().as_deref(),
        Some("1")
    );
    assert!(store.sismember("icom:c1:idx:industry:food", "s1").await.unwrap());
    assert_eq!(
        store.zrange("icom:c1:members", 0, -1).await.unwrap(),
        vec![ScoredMember::new("s1", 5.0)]
    );
    assert_eq!(
        store.zscore("icom:c1:meta:industries", "food").await.unwrap(),
        Some(1.0)
    );
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_set_gates_report_changes() {
    let store = TestRedis::new().await.unwrap().store;

    assert!(store.sadd("shop:s1:likers", "v1").await.unwrap());
    assert!(!store.sadd("shop:s1:likers", "v1").await.unwrap());
    assert!(store.srem("shop:s1:likers", "v1").await.unwrap());
    assert!(!store.srem("shop:s1:likers", "v1").await.unwrap());
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_sorted_set_ranges() {
    let store = TestRedis::new().await.unwrap().store;

    let mut batch = Batch::new();
    batch
        .zadd("z", "b", 2.0)
        .zadd("z", "a", 2.0)
        .zadd("z", "c", 1.0);
    store.exec(batch).await.unwrap();

    let top = store.zrevrange("z", 0, 0).await.unwrap();
    assert_eq!(top, vec![ScoredMember::new("b", 2.0)]);

    let tied = store.zrange_by_score("z", 2.0, 2.0).await.unwrap();
    let names: Vec<_> = tied.into_iter().map(|m| m.member).collect();
    assert_eq!(names, vec!["a", "b"]);
}

#[tokio::test]
#[ignore = "requires running Redis instance"]
async fn test_geo_radius_and_expire() {
    let store = TestRedis::new().await.unwrap().store;

    let mut batch = Batch::new();
    batch
        .geoadd("icom:c1:geo", "s1", GeoPoint::new(10.7769, 106.7009))
        .geoadd("icom:c1:geo", "s2", GeoPoint::new(10.8231, 106.6297))
        .sadd("shop:s1:likers", "v1")
        .expire("shop:s1:likers", Duration::from_secs(60));
    store.exec(batch).await.unwrap();

    let hits = store
        .geo_radius(
            "icom:c1:geo",
            GeoPoint::new(10.7769, 106.7009),
            1.0,
            GeoUnit::Kilometers,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].member, "s1");

    let hits = store
        .geo_radius(
            "icom:c1:geo",
            GeoPoint::new(10.7769, 106.7009),
            20.0,
            GeoUnit::Kilometers,
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].distance <= hits[1].distance);

    let exact = store
        .geo_radius(
            "icom:c1:geo",
            GeoPoint::new(10.7769, 106.7009),
            0.0,
            GeoUnit::Meters,
        )
        .await
        .unwrap();
    let names: Vec<_> = exact.into_iter().map(|m| m.member).collect();
    assert_eq!(names, vec!["s1"]);
}
