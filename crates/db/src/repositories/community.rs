//! Community repository.

use std::sync::Arc;

use icom_common::{AppError, AppResult, EntityKind, IdGenerator};

use crate::entities::Community;
use crate::entities::community::counters;
use crate::keys;
use crate::store::{Batch, KvStore};

/// Community repository for store operations.
#[derive(Clone)]
pub struct CommunityRepository {
    store: Arc<dyn KvStore>,
    ids: IdGenerator,
}

impl CommunityRepository {
    /// Create a new community repository.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, ids: IdGenerator) -> Self {
        Self { store, ids }
    }

    /// Allocate the next community ID.
    pub async fn next_id(&self) -> AppResult<String> {
        let counter = self.store.incr(EntityKind::Community.counter_key()).await?;
        Ok(self.ids.format(EntityKind::Community, counter))
    }

    /// Find a community by ID.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Community>> {
        let raw = self.store.hgetall(&keys::community(id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Community::from_fields(id, &raw).map(Some)
    }

    /// Get a community by ID, failing when absent.
    pub async fn get_by_id(&self, id: &str) -> AppResult<Community> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::CommunityNotFound(id.to_string()))
    }

    /// Fail with `CommunityNotFound` unless the community exists.
    pub async fn ensure_exists(&self, id: &str) -> AppResult<()> {
        if self.store.exists(&keys::community(id)).await? {
            Ok(())
        } else {
            Err(AppError::CommunityNotFound(id.to_string()))
        }
    }

    /// Stage writing the community record and listing it.
    pub fn stage_put(&self, batch: &mut Batch, community: &Community) {
        batch.hset(keys::community(&community.id), community.to_fields());
        #[allow(clippy::cast_precision_loss)]
        batch.zadd(
            keys::ALL_COMMUNITIES,
            &community.id,
            community.created.timestamp_millis() as f64,
        );
    }

    /// Stage a change to the member counters.
    pub fn stage_counters(&self, batch: &mut Batch, id: &str, total: i64, active: i64) {
        let key = keys::community(id);
        if total != 0 {
            batch.hincrby(&key, counters::TOTAL, total);
        }
        if active != 0 {
            batch.hincrby(&key, counters::ACTIVE, active);
        }
    }

    /// Stage removal of the community record.
    pub fn stage_delete(&self, batch: &mut Batch, id: &str) {
        batch.del(keys::community(id));
    }

    /// Stage removal from the global listing.
    pub fn stage_unlist(&self, batch: &mut Batch, id: &str) {
        batch.zrem(keys::ALL_COMMUNITIES, id);
    }

    /// Community IDs, newest first.
    pub async fn list_ids(&self, offset: usize, limit: usize) -> AppResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = i64::try_from(offset).unwrap_or(i64::MAX);
        let stop = start.saturating_add(i64::try_from(limit).unwrap_or(i64::MAX) - 1);
        let entries = self
            .store
            .zrevrange(keys::ALL_COMMUNITIES, start, stop)
            .await?;
        Ok(entries.into_iter().map(|e| e.member).collect())
    }

    /// Number of listed communities.
    pub async fn count(&self) -> AppResult<u64> {
        Ok(self.store.zcard(keys::ALL_COMMUNITIES).await?)
    }
}
