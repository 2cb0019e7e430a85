//! Storage layer for icom-rs.
//!
//! - [`store`]: the [`KvStore`] trait and atomic [`Batch`]
//! - [`redis`] / [`memory`]: the two store implementations
//! - [`keys`]: key schema shared by every writer
//! - [`entities`] / [`repositories`]: typed records on top of the store

pub mod entities;
pub mod keys;
pub mod memory;
pub mod redis;
pub mod repositories;
pub mod store;
pub mod test_utils;

use std::sync::Arc;

use icom_common::{AppResult, Config};
pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use store::{
    Batch, Command, GeoMatch, GeoPoint, GeoUnit, KvStore, ScoredMember, StoreError, StoreResult,
};

/// Connect to the configured Redis store.
pub async fn init(config: &Config) -> AppResult<Arc<dyn KvStore>> {
    let store = RedisStore::connect(&config.redis.url).await?;
    Ok(Arc::new(store))
}
