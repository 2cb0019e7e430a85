//! Membership repository and the shop/community link relation.

use std::sync::Arc;

use icom_common::{AppError, AppResult};

use crate::entities::Membership;
use crate::keys;
use crate::store::{Batch, KvStore, ScoredMember};

/// The bidirectional shop/community link.
///
/// A shop is in a community's member list exactly when the community is in
/// the shop's community list; both sides are always staged together.
pub struct MembershipLinks;

impl MembershipLinks {
    /// Stage linking `shop_id` into `community_id` with the given score on
    /// both sides.
    pub fn stage_link(batch: &mut Batch, community_id: &str, shop_id: &str, score: f64) {
        batch
            .zadd(keys::members(community_id), shop_id, score)
            .zadd(keys::shop_communities(shop_id), community_id, score);
    }

    /// Stage removing both sides of the link.
    pub fn stage_unlink(batch: &mut Batch, community_id: &str, shop_id: &str) {
        batch
            .zrem(keys::members(community_id), shop_id)
            .zrem(keys::shop_communities(shop_id), community_id);
    }
}

/// Membership repository for store operations.
#[derive(Clone)]
pub struct MembershipRepository {
    store: Arc<dyn KvStore>,
}

impl MembershipRepository {
    /// Create a new membership repository.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Find a membership record.
    pub async fn find(&self, community_id: &str, shop_id: &str) -> AppResult<Option<Membership>> {
        let raw = self
            .store
            .hgetall(&keys::membership(community_id, shop_id))
            .await?;
        if raw.is_empty() {
            return Ok(None);
        }
        Membership::from_fields(community_id, shop_id, &raw).map(Some)
    }

    /// Get a membership record, failing when absent.
    pub async fn get(&self, community_id: &str, shop_id: &str) -> AppResult<Membership> {
        self.find(community_id, shop_id)
            .await?
            .ok_or_else(|| AppError::membership_not_found(community_id, shop_id))
    }

    /// Whether the shop is in the community's member list.
    pub async fn is_member(&self, community_id: &str, shop_id: &str) -> AppResult<bool> {
        Ok(self
            .store
            .zscore(&keys::members(community_id), shop_id)
            .await?
            .is_some())
    }

    /// Claim the membership slot of a shop.
    ///
    /// Returns `false` when the shop already holds it. Of two concurrent
    /// claims exactly one wins.
    pub async fn claim(&self, community_id: &str, shop_id: &str) -> AppResult<bool> {
        Ok(self
            .store
            .sadd(&keys::member_claims(community_id), shop_id)
            .await?)
    }

    /// Give up the membership slot of a shop.
    ///
    /// Returns `false` when the shop did not hold it.
    pub async fn release(&self, community_id: &str, shop_id: &str) -> AppResult<bool> {
        Ok(self
            .store
            .srem(&keys::member_claims(community_id), shop_id)
            .await?)
    }

    /// Stage writing a full membership record.
    pub fn stage_put(&self, batch: &mut Batch, membership: &Membership) {
        batch.hset(
            keys::membership(&membership.community_id, &membership.shop_id),
            membership.to_fields(),
        );
    }

    /// Stage overwriting individual record fields.
    pub fn stage_fields<I, F, V>(&self, batch: &mut Batch, community_id: &str, shop_id: &str, fields: I)
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Into<String>,
    {
        batch.hset(keys::membership(community_id, shop_id), fields);
    }

    /// Stage removal of a membership record and its slot.
    pub fn stage_delete(&self, batch: &mut Batch, community_id: &str, shop_id: &str) {
        batch
            .del(keys::membership(community_id, shop_id))
            .srem(keys::member_claims(community_id), shop_id);
    }

    /// Stage a new ordering key for a member.
    pub fn stage_order(&self, batch: &mut Batch, community_id: &str, shop_id: &str, order: f64) {
        batch.zadd(keys::members(community_id), shop_id, order);
    }

    /// Number of members in a community.
    pub async fn member_count(&self, community_id: &str) -> AppResult<u64> {
        Ok(self.store.zcard(&keys::members(community_id)).await?)
    }

    /// Members by position in the ordered member list, inclusive bounds.
    pub async fn member_range(
        &self,
        community_id: &str,
        start: i64,
        stop: i64,
    ) -> AppResult<Vec<ScoredMember>> {
        Ok(self
            .store
            .zrange(&keys::members(community_id), start, stop)
            .await?)
    }

    /// Every member ID of a community, in list order.
    pub async fn member_ids(&self, community_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .member_range(community_id, 0, -1)
            .await?
            .into_iter()
            .map(|m| m.member)
            .collect())
    }

    /// Communities a shop belongs to with their join scores, oldest first.
    pub async fn communities_of(&self, shop_id: &str) -> AppResult<Vec<ScoredMember>> {
        Ok(self
            .store
            .zrange(&keys::shop_communities(shop_id), 0, -1)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{MemberRank, MemberStatus};
    use crate::memory::MemoryStore;
    use chrono::Utc;

    fn membership(shop_id: &str) -> Membership {
        Membership {
            community_id: "c1".to_string(),
            shop_id: shop_id.to_string(),
            rank: MemberRank::Member,
            status: MemberStatus::Active,
            role: String::new(),
            joined_date: Utc::now(),
            display_order: None,
        }
    }

    #[tokio::test]
    async fn test_link_writes_both_directions() {
        let store = Arc::new(MemoryStore::new());
        let repo = MembershipRepository::new(store.clone());

        let mut batch = Batch::new();
        repo.stage_put(&mut batch, &membership("s1"));
        MembershipLinks::stage_link(&mut batch, "c1", "s1", 10.0);
        store.exec(batch).await.unwrap();

        assert!(repo.is_member("c1", "s1").await.unwrap());
        assert_eq!(
            repo.communities_of("s1").await.unwrap(),
            vec![ScoredMember::new("c1", 10.0)]
        );

        let mut batch = Batch::new();
        repo.stage_delete(&mut batch, "c1", "s1");
        MembershipLinks::stage_unlink(&mut batch, "c1", "s1");
        store.exec(batch).await.unwrap();

        assert!(!repo.is_member("c1", "s1").await.unwrap());
        assert!(repo.communities_of("s1").await.unwrap().is_empty());
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let repo = MembershipRepository::new(store.clone());

        assert!(repo.claim("c1", "s1").await.unwrap());
        assert!(!repo.claim("c1", "s1").await.unwrap());
        assert!(repo.claim("c2", "s1").await.unwrap());

        let mut batch = Batch::new();
        repo.stage_delete(&mut batch, "c1", "s1");
        store.exec(batch).await.unwrap();
        assert!(!repo.release("c1", "s1").await.unwrap());
        assert!(repo.release("c2", "s1").await.unwrap());
        assert!(store.keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_membership() {
        let repo = MembershipRepository::new(Arc::new(MemoryStore::new()));
        let err = repo.get("c1", "s9").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_member_range_follows_order() {
        let store = Arc::new(MemoryStore::new());
        let repo = MembershipRepository::new(store.clone());

        let mut batch = Batch::new();
        MembershipLinks::stage_link(&mut batch, "c1", "s1", 1.0);
        MembershipLinks::stage_link(&mut batch, "c1", "s2", 2.0);
        repo.stage_order(&mut batch, "c1", "s2", 0.0);
        store.exec(batch).await.unwrap();

        assert_eq!(repo.member_ids("c1").await.unwrap(), vec!["s2", "s1"]);
        assert_eq!(repo.member_count("c1").await.unwrap(), 2);
    }
}
