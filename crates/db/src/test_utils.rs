//! Test utilities for store operations.
//!
//! Provides helpers for connecting to a disposable Redis instance.

use fred::interfaces::ClientLike;
use tracing::info;

use crate::redis::RedisStore;
use crate::store::{StoreError, StoreResult};

/// Test Redis configuration.
#[derive(Debug, Clone)]
pub struct TestRedisConfig {
    /// Redis host.
    pub host: String,
    /// Redis port.
    pub port: u16,
    /// Logical database index.
    pub database: u8,
}

impl Default for TestRedisConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TEST_REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TEST_REDIS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(6380),
            database: std::env::var("TEST_REDIS_DB")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or(15),
        }
    }
}

impl TestRedisConfig {
    /// Get the Redis URL.
    #[must_use]
    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/{}", self.host, self.port, self.database)
    }
}

/// A connected test store that starts from an empty keyspace.
pub struct TestRedis {
    /// Store connection.
    pub store: RedisStore,
    /// Connection configuration.
    pub config: TestRedisConfig,
}

impl TestRedis {
    /// Connect with the default configuration and wipe the instance.
    ///
    /// Only point this at a throwaway Redis.
    pub async fn new() -> StoreResult<Self> {
        Self::with_config(TestRedisConfig::default()).await
    }

    /// Connect with a custom configuration and wipe the instance.
    pub async fn with_config(config: TestRedisConfig) -> StoreResult<Self> {
        let store = RedisStore::connect(&config.redis_url()).await?;
        store
            .client()
            .flushall::<()>(false)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!(url = %config.redis_url(), "Test Redis ready");
        Ok(Self { store, config })
    }
}
