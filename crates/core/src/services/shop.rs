//! Shop service.

use std::sync::Arc;

use chrono::Utc;
use icom_common::{AppError, AppResult};
use icom_db::entities::{Shop, ShopPatch, ShopProfile};
use icom_db::repositories::{
    CommunityRepository, MembershipLinks, MembershipRepository, ShopRepository,
};
use icom_db::{Batch, KvStore, keys};
use tracing::{debug, error, info, warn};
use validator::Validate;

use super::index;
use super::membership::stage_departure;
use super::{geo, metadata};

/// Shop service for business logic.
#[derive(Clone)]
pub struct ShopService {
    store: Arc<dyn KvStore>,
    shop_repo: ShopRepository,
    community_repo: CommunityRepository,
    membership_repo: MembershipRepository,
}

impl ShopService {
    /// Create a new shop service.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        shop_repo: ShopRepository,
        community_repo: CommunityRepository,
        membership_repo: MembershipRepository,
    ) -> Self {
        Self {
            store,
            shop_repo,
            community_repo,
            membership_repo,
        }
    }

    /// Create a shop outside of any community.
    pub async fn create(&self, profile: ShopProfile) -> AppResult<Shop> {
        profile.validate()?;
        let id = self.shop_repo.next_id().await?;
        let shop = Shop::new(id, profile, Utc::now());
        self.shop_repo.create(&shop).await?;

        info!(shop_id = %shop.id, name = %shop.profile.name, "Shop created");
        Ok(shop)
    }

    /// Get a shop with its community list.
    pub async fn get(&self, shop_id: &str) -> AppResult<Shop> {
        let (shop, links) = futures::try_join!(
            self.shop_repo.get_by_id(shop_id),
            self.membership_repo.communities_of(shop_id),
        )?;
        Ok(Shop {
            communities: links.into_iter().map(|l| l.member).collect(),
            ..shop
        })
    }

    /// Update a shop's profile and re-index it in every community it
    /// belongs to, atomically.
    pub async fn update(&self, shop_id: &str, patch: ShopPatch) -> AppResult<Shop> {
        patch.validate()?;
        let current = self.get(shop_id).await?;
        let profile = patch.apply(&current.profile);
        profile.validate()?;

        let updated = Shop {
            profile,
            modified: Utc::now(),
            ..current.clone()
        };

        let mut batch = Batch::new();
        self.shop_repo.stage_put(&mut batch, &updated);
        for community_id in &updated.communities {
            index::stage_profile_change(
                &mut batch,
                community_id,
                shop_id,
                &current.profile,
                &updated.profile,
            );
            metadata::stage_profile_change(
                &mut batch,
                community_id,
                &current.profile,
                &updated.profile,
            );
            geo::stage_change(
                &mut batch,
                community_id,
                shop_id,
                &current.profile,
                &updated.profile,
            );
        }
        self.store.exec(batch).await?;

        info!(
            shop_id = %shop_id,
            communities = updated.communities.len(),
            "Shop updated"
        );
        Ok(updated)
    }

    /// Delete a shop after withdrawing it from every community.
    ///
    /// Each community is one batch. A failure stops the cascade with
    /// [`AppError::PartialFailure`]; rerunning the delete resumes it.
    pub async fn delete(&self, shop_id: &str) -> AppResult<()> {
        let shop = self.get(shop_id).await?;
        let mut completed = 0;

        for community_id in &shop.communities {
            let (membership, sources) = futures::try_join!(
                self.membership_repo.find(community_id, shop_id),
                self.like_sources(community_id),
            )?;

            let mut batch = Batch::new();
            let released = match membership {
                Some(membership) => {
                    if !self.membership_repo.release(community_id, shop_id).await? {
                        debug!(
                            shop_id = %shop_id,
                            community_id = %community_id,
                            "Membership already released by a concurrent leave"
                        );
                        continue;
                    }
                    stage_departure(
                        &mut batch,
                        &self.community_repo,
                        &self.membership_repo,
                        &membership,
                        Some(&shop.profile),
                        &sources,
                    );
                    true
                }
                None => {
                    warn!(
                        shop_id = %shop_id,
                        community_id = %community_id,
                        "Link without membership record; unlinking only"
                    );
                    MembershipLinks::stage_unlink(
                        &mut batch,
                        community_id,
                        shop_id,
                    );
                    false
                }
            };

            if let Err(e) = self.store.exec(batch).await {
                if released {
                    if let Err(cleanup) = self.membership_repo.claim(community_id, shop_id).await {
                        warn!(shop_id = %shop_id, error = %cleanup, "Failed to restore membership slot");
                    }
                }
                error!(
                    shop_id = %shop_id,
                    community_id = %community_id,
                    completed,
                    error = %e,
                    "Shop delete stopped part way"
                );
                return Err(AppError::PartialFailure {
                    operation: "delete_shop",
                    completed,
                    cause: e.to_string(),
                });
            }
            completed += 1;
        }

        let mut batch = Batch::new();
        self.shop_repo.stage_delete(&mut batch, shop_id);
        self.store
            .exec(batch)
            .await
            .map_err(|e| AppError::PartialFailure {
                operation: "delete_shop",
                completed,
                cause: e.to_string(),
            })?;

        info!(shop_id = %shop_id, communities = completed, "Shop deleted");
        Ok(())
    }

    async fn like_sources(&self, community_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .store
            .smembers(&keys::rank_like_sources(community_id))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::membership::{JoinOptions, JoinTarget, MembershipService};
    use icom_common::IdGenerator;
    use icom_db::MemoryStore;
    use icom_db::entities::{Community, CommunityProfile, CommunitySettings};
    use icom_db::keys::IndexField;

    struct Fixture {
        store: Arc<MemoryStore>,
        shops: ShopService,
        members: MembershipService,
    }

    async fn fixture(communities: &[&str]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn KvStore> = store.clone();
        let shop_repo = ShopRepository::new(dyn_store.clone(), IdGenerator::default());
        let community_repo = CommunityRepository::new(dyn_store.clone(), IdGenerator::default());
        let membership_repo = MembershipRepository::new(dyn_store.clone());

        let mut batch = Batch::new();
        for id in communities {
            community_repo.stage_put(
                &mut batch,
                &Community::new(
                    *id,
                    CommunityProfile::named(*id),
                    CommunitySettings::default(),
                    Utc::now(),
                ),
            );
        }
        store.exec(batch).await.unwrap();

        Fixture {
            store,
            shops: ShopService::new(
                dyn_store.clone(),
                shop_repo.clone(),
                community_repo.clone(),
                membership_repo.clone(),
            ),
            members: MembershipService::new(dyn_store, shop_repo, community_repo, membership_repo),
        }
    }

    fn profile() -> ShopProfile {
        ShopProfile {
            industry: "food".to_string(),
            province: "hcm".to_string(),
            lat: Some(10.0),
            lng: Some(106.0),
            ..ShopProfile::named("Bánh Mì")
        }
    }

    #[tokio::test]
    async fn test_create_validates() {
        let f = fixture(&[]).await;
        let result = f.shops.create(ShopProfile::named("")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let shop = f.shops.create(profile()).await.unwrap();
        let loaded = f.shops.get(&shop.id).await.unwrap();
        assert_eq!(loaded.profile, shop.profile);
        assert!(loaded.communities.is_empty());
    }

    #[tokio::test]
    async fn test_update_reindexes_every_community() {
        let f = fixture(&["c1", "c2"]).await;
        let shop = f.shops.create(profile()).await.unwrap();
        for cid in ["c1", "c2"] {
            f.members
                .join(cid, JoinTarget::Existing(shop.id.clone()), JoinOptions::default())
                .await
                .unwrap();
        }

        let updated = f
            .shops
            .update(
                &shop.id,
                ShopPatch {
                    name: Some("Phở Bò".to_string()),
                    industry: Some("retail".to_string()),
                    ..ShopPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.communities.len(), 2);
        assert_eq!(updated.profile.province, "hcm");

        for cid in ["c1", "c2"] {
            let old = keys::field_index(cid, IndexField::Industry, "food");
            let new = keys::field_index(cid, IndexField::Industry, "retail");
            assert!(!f.store.sismember(&old, &shop.id).await.unwrap());
            assert!(f.store.sismember(&new, &shop.id).await.unwrap());
            assert!(
                !f.store
                    .sismember(&keys::search_prefix(cid, "banh"), &shop.id)
                    .await
                    .unwrap()
            );
            assert!(
                f.store
                    .sismember(&keys::search_prefix(cid, "ph"), &shop.id)
                    .await
                    .unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_patch() {
        let f = fixture(&[]).await;
        let shop = f.shops.create(profile()).await.unwrap();
        let result = f
            .shops
            .update(
                &shop.id,
                ShopPatch {
                    lat: Some(91.0),
                    ..ShopPatch::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(matches!(
            f.shops.update("ghost", ShopPatch::default()).await,
            Err(AppError::ShopNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_withdraws_from_communities() {
        let f = fixture(&["c1", "c2"]).await;
        let sid = f
            .members
            .join("c1", JoinTarget::NewShop(profile()), JoinOptions::default())
            .await
            .unwrap();
        f.members
            .join("c2", JoinTarget::Existing(sid.clone()), JoinOptions::default())
            .await
            .unwrap();

        f.shops.delete(&sid).await.unwrap();

        assert!(matches!(f.shops.get(&sid).await, Err(AppError::ShopNotFound(_))));
        for key in f.store.keys().await {
            assert!(!key.contains(&sid), "key still names shop: {key}");
        }
        for cid in ["c1", "c2"] {
            assert_eq!(f.store.zcard(&keys::members(cid)).await.unwrap(), 0);
            assert_eq!(f.store.zcard(&keys::geo(cid)).await.unwrap(), 0);
            let industry = keys::field_index(cid, IndexField::Industry, "food");
            assert!(f.store.smembers(&industry).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_delete_reports_partial_failure() {
        let f = fixture(&["c1"]).await;
        let sid = f
            .members
            .join("c1", JoinTarget::NewShop(profile()), JoinOptions::default())
            .await
            .unwrap();

        f.store.fail_next_execs(1);
        let result = f.shops.delete(&sid).await;
        assert!(matches!(
            result,
            Err(AppError::PartialFailure {
                operation: "delete_shop",
                completed: 0,
                ..
            })
        ));

        // The membership survives intact, so retrying finishes the cascade.
        assert!(f.store.sismember(&keys::member_claims("c1"), &sid).await.unwrap());
        f.shops.delete(&sid).await.unwrap();
        assert!(matches!(f.shops.get(&sid).await, Err(AppError::ShopNotFound(_))));
        assert_eq!(
            f.members.memberships_of(&sid).await.unwrap_err().error_code(),
            "SHOP_NOT_FOUND"
        );
    }
}
