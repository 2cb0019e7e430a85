//! Shop repository.

use std::sync::Arc;

use icom_common::{AppError, AppResult, EntityKind, IdGenerator};

use crate::entities::Shop;
use crate::keys;
use crate::store::{Batch, KvStore};

/// Shop repository for store operations.
#[derive(Clone)]
pub struct ShopRepository {
    store: Arc<dyn KvStore>,
    ids: IdGenerator,
}

impl ShopRepository {
    /// Create a new shop repository.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, ids: IdGenerator) -> Self {
        Self { store, ids }
    }

    /// Allocate the next shop ID.
    pub async fn next_id(&self) -> AppResult<String> {
        let counter = self.store.incr(EntityKind::Shop.counter_key()).await?;
        Ok(self.ids.format(EntityKind::Shop, counter))
    }

    /// Find a shop record by ID. The community list is not loaded.
    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<Shop>> {
        let raw = self.store.hgetall(&keys::shop(id)).await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Shop::from_fields(id, &raw).map(Some)
    }

    /// Get a shop record by ID, failing when absent.
    pub async fn get_by_id(&self, id: &str) -> AppResult<Shop> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::ShopNotFound(id.to_string()))
    }

    /// Whether a shop record exists.
    pub async fn exists(&self, id: &str) -> AppResult<bool> {
        Ok(self.store.exists(&keys::shop(id)).await?)
    }

    /// Stage writing the full shop record.
    pub fn stage_put(&self, batch: &mut Batch, shop: &Shop) {
        batch.hset(keys::shop(&shop.id), shop.to_fields());
    }

    /// Stage removal of the shop record and its per-shop keys.
    pub fn stage_delete(&self, batch: &mut Batch, id: &str) {
        batch
            .del(keys::shop(id))
            .del(keys::shop_communities(id))
            .del(keys::shop_likers(id));
    }

    /// Write a shop record on its own.
    pub async fn create(&self, shop: &Shop) -> AppResult<()> {
        let mut batch = Batch::new();
        self.stage_put(&mut batch, shop);
        Ok(self.store.exec(batch).await?)
    }

    /// Remove a shop record on its own.
    pub async fn delete(&self, id: &str) -> AppResult<()> {
        let mut batch = Batch::new();
        self.stage_delete(&mut batch, id);
        Ok(self.store.exec(batch).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::ShopProfile;
    use crate::memory::MemoryStore;
    use chrono::Utc;

    fn repo() -> (MemoryStore, ShopRepository) {
        let store = MemoryStore::new();
        let repo = ShopRepository::new(Arc::new(store.clone()), IdGenerator::default());
        (store, repo)
    }

    #[tokio::test]
    async fn test_ids_are_sequential() {
        let (_, repo) = repo();
        assert_eq!(repo.next_id().await.unwrap(), "100010010000001");
        assert_eq!(repo.next_id().await.unwrap(), "100010010000002");
    }

    #[tokio::test]
    async fn test_create_find_delete() {
        let (store, repo) = repo();
        let shop = Shop::new("s1", ShopProfile::named("Tiệm Bánh"), Utc::now());

        repo.create(&shop).await.unwrap();
        let found = repo.get_by_id("s1").await.unwrap();
        assert_eq!(found.profile.name, "Tiệm Bánh");

        repo.delete("s1").await.unwrap();
        assert!(repo.find_by_id("s1").await.unwrap().is_none());
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_missing_shop() {
        let (_, repo) = repo();
        let err = repo.get_by_id("nope").await.unwrap_err();
        assert!(matches!(err, AppError::ShopNotFound(id) if id == "nope"));
    }
}
