//! Membership registry: joining, leaving and member standing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use icom_common::{AppError, AppResult};
use icom_db::entities::membership::field;
use icom_db::entities::{Community, MemberRank, MemberStatus, Membership, Shop, ShopProfile};
use icom_db::keys::IndexField;
use icom_db::repositories::{
    CommunityRepository, MembershipLinks, MembershipRepository, ShopRepository,
};
use icom_db::{Batch, KvStore, keys};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use super::index::{self, Change};
use super::{geo, metadata, ranking};

/// Shop a join applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinTarget {
    /// Create a new shop from this profile.
    NewShop(ShopProfile),
    /// Use an existing shop.
    Existing(String),
}

/// Membership attributes supplied on join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    /// Defaults to `MEMBER`.
    pub rank: Option<MemberRank>,
    /// Defaults from the community's approval policy.
    pub status: Option<MemberStatus>,
    pub role: String,
}

/// Standing change. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StandingUpdate {
    pub rank: Option<MemberRank>,
    pub status: Option<MemberStatus>,
    pub role: Option<String>,
}

/// A membership with the community's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDetail {
    #[serde(flatten)]
    pub membership: Membership,
    pub community_name: String,
}

/// One community a shop belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShopMembership {
    pub community_id: String,
    pub community_name: String,
    pub community_logo: String,
    pub rank: MemberRank,
    pub status: MemberStatus,
    pub role: String,
    pub joined_date: DateTime<Utc>,
    /// Join score of the link.
    pub score: f64,
}

/// Status a new member starts with under a community's policy.
#[must_use]
pub const fn initial_status(community: &Community) -> MemberStatus {
    if community.settings.require_approval && !community.settings.auto_activate {
        MemberStatus::Pending
    } else {
        MemberStatus::Active
    }
}

/// Stage everything a member contributes to a community: record, links,
/// counters, indexes, facets and position.
pub(crate) fn stage_arrival(
    batch: &mut Batch,
    community_repo: &CommunityRepository,
    membership_repo: &MembershipRepository,
    membership: &Membership,
    profile: &ShopProfile,
    score: f64,
) {
    let cid = membership.community_id.as_str();
    let sid = membership.shop_id.as_str();

    membership_repo.stage_put(batch, membership);
    MembershipLinks::stage_link(batch, cid, sid, score);
    community_repo.stage_counters(batch, cid, 1, i64::from(membership.status.is_active()));
    index::stage_profile(batch, cid, sid, profile, Change::Add);
    index::stage_standing(batch, cid, sid, membership.status, membership.rank, Change::Add);
    metadata::stage_profile(batch, cid, profile, Change::Add);
    geo::stage_add(batch, cid, sid, profile);
}

/// Exact inverse of [`stage_arrival`], plus leaderboard entries.
///
/// `profile` is `None` when the shop record is already gone; its
/// profile-derived entries cannot be located then.
pub(crate) fn stage_departure(
    batch: &mut Batch,
    community_repo: &CommunityRepository,
    membership_repo: &MembershipRepository,
    membership: &Membership,
    profile: Option<&ShopProfile>,
    like_sources: &[String],
) {
    let cid = membership.community_id.as_str();
    let sid = membership.shop_id.as_str();

    if let Some(profile) = profile {
        index::stage_profile(batch, cid, sid, profile, Change::Remove);
        metadata::stage_profile(batch, cid, profile, Change::Remove);
    }
    index::stage_standing(batch, cid, sid, membership.status, membership.rank, Change::Remove);
    geo::stage_remove(batch, cid, sid);
    ranking::stage_remove_member(batch, cid, sid, like_sources);
    membership_repo.stage_delete(batch, cid, sid);
    community_repo.stage_counters(batch, cid, -1, -i64::from(membership.status.is_active()));
    MembershipLinks::stage_unlink(batch, cid, sid);
}

/// Join score derived from a timestamp.
pub(crate) fn join_score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64
}

/// Membership service for business logic.
#[derive(Clone)]
pub struct MembershipService {
    store: Arc<dyn KvStore>,
    shop_repo: ShopRepository,
    community_repo: CommunityRepository,
    membership_repo: MembershipRepository,
}

impl MembershipService {
    /// Create a new membership service.
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

    /// Add a shop to a community, creating the shop first when asked to.
    ///
    /// Returns the shop ID. The shop's membership slot is claimed before
    /// anything is staged, so concurrent joins of one shop admit only one.
    /// When the membership batch fails the slot is released and a newly
    /// created shop is deleted again.
    pub async fn join(
        &self,
        community_id: &str,
        target: JoinTarget,
        options: JoinOptions,
    ) -> AppResult<String> {
        let community = self.community_repo.get_by_id(community_id).await?;
        if !community.settings.has_capacity(community.total_members) {
            return Err(AppError::Conflict(format!(
                "Community {community_id} is full ({} members)",
                community.settings.max_members
            )));
        }

        let now = Utc::now();
        let (shop, created) = match target {
            JoinTarget::Existing(shop_id) => {
                let shop = self.shop_repo.get_by_id(&shop_id).await?;
                (shop, false)
            }
            JoinTarget::NewShop(profile) => {
                profile.validate()?;
                let shop_id = self.shop_repo.next_id().await?;
                (Shop::new(shop_id, profile, now), true)
            }
        };

        if !self.membership_repo.claim(community_id, &shop.id).await? {
            return Err(AppError::Conflict(format!(
                "Shop {} is already a member of {community_id}",
                shop.id
            )));
        }

        let membership = Membership {
            community_id: community_id.to_string(),
            shop_id: shop.id.clone(),
            rank: options.rank.unwrap_or_default(),
            status: options.status.unwrap_or_else(|| initial_status(&community)),
            role: options.role,
            joined_date: now,
            display_order: None,
        };

        let mut batch = Batch::new();
        if created {
            self.shop_repo.stage_put(&mut batch, &shop);
        }
        stage_arrival(
            &mut batch,
            &self.community_repo,
            &self.membership_repo,
            &membership,
            &shop.profile,
            join_score(now),
        );

        if let Err(e) = self.store.exec(batch).await {
            if let Err(cleanup) = self.membership_repo.release(community_id, &shop.id).await {
                warn!(shop_id = %shop.id, error = %cleanup, "Failed to release membership slot");
            }
            if created {
                if let Err(cleanup) = self.shop_repo.delete(&shop.id).await {
                    warn!(shop_id = %shop.id, error = %cleanup, "Failed to roll back new shop");
                }
            }
            return Err(e.into());
        }

        info!(
            community_id = %community_id,
            shop_id = %shop.id,
            status = %membership.status,
            new_shop = created,
            "Shop joined community"
        );
        Ok(shop.id)
    }

    /// Remove a shop from a community and retract everything it contributed.
    ///
    /// Releasing the membership slot gates the removal; a concurrent leave
    /// that loses the release reports the membership as missing.
    pub async fn leave(&self, community_id: &str, shop_id: &str) -> AppResult<()> {
        let membership = self.membership_repo.get(community_id, shop_id).await?;
        let (shop, sources) = futures::try_join!(
            self.shop_repo.find_by_id(shop_id),
            self.like_sources(community_id),
        )?;
        if shop.is_none() {
            warn!(shop_id = %shop_id, "Member has no shop record; profile indexes left as is");
        }
        if !self.membership_repo.release(community_id, shop_id).await? {
            return Err(AppError::membership_not_found(community_id, shop_id));
        }

        let mut batch = Batch::new();
        stage_departure(
            &mut batch,
            &self.community_repo,
            &self.membership_repo,
            &membership,
            shop.as_ref().map(|s| &s.profile),
            &sources,
        );
        if let Err(e) = self.store.exec(batch).await {
            if let Err(cleanup) = self.membership_repo.claim(community_id, shop_id).await {
                warn!(shop_id = %shop_id, error = %cleanup, "Failed to restore membership slot");
            }
            return Err(e.into());
        }

        info!(community_id = %community_id, shop_id = %shop_id, "Shop left community");
        Ok(())
    }

    /// Change a member's rank, status or role.
    pub async fn update_standing(
        &self,
        community_id: &str,
        shop_id: &str,
        update: StandingUpdate,
    ) -> AppResult<Membership> {
        let mut membership = self.membership_repo.get(community_id, shop_id).await?;
        let mut batch = Batch::new();
        let mut fields: Vec<(&str, String)> = Vec::new();

        if let Some(rank) = update.rank.filter(|r| *r != membership.rank) {
            index::stage_standing_change(
                &mut batch,
                community_id,
                shop_id,
                IndexField::Rank,
                membership.rank.as_str(),
                rank.as_str(),
            );
            fields.push((field::RANK, rank.to_string()));
            membership.rank = rank;
        }

        if let Some(status) = update.status.filter(|s| *s != membership.status) {
            index::stage_standing_change(
                &mut batch,
                community_id,
                shop_id,
                IndexField::Status,
                membership.status.as_str(),
                status.as_str(),
            );
            let active_delta =
                i64::from(status.is_active()) - i64::from(membership.status.is_active());
            self.community_repo
                .stage_counters(&mut batch, community_id, 0, active_delta);
            fields.push((field::STATUS, status.to_string()));
            membership.status = status;
        }

        if let Some(role) = update.role.filter(|r| *r != membership.role) {
            fields.push((field::ROLE, role.clone()));
            membership.role = role;
        }

        if fields.is_empty() {
            return Ok(membership);
        }
        self.membership_repo
            .stage_fields(&mut batch, community_id, shop_id, fields);
        self.store.exec(batch).await?;

        info!(
            community_id = %community_id,
            shop_id = %shop_id,
            rank = %membership.rank,
            status = %membership.status,
            "Member standing updated"
        );
        Ok(membership)
    }

    /// Pin a member's position in the member list.
    pub async fn set_display_order(
        &self,
        community_id: &str,
        shop_id: &str,
        order: i64,
    ) -> AppResult<()> {
        self.membership_repo.get(community_id, shop_id).await?;

        let mut batch = Batch::new();
        self.membership_repo
            .stage_order(&mut batch, community_id, shop_id, order as f64);
        self.membership_repo.stage_fields(
            &mut batch,
            community_id,
            shop_id,
            [(field::DISPLAY_ORDER, order.to_string())],
        );
        self.store.exec(batch).await?;

        info!(community_id = %community_id, shop_id = %shop_id, order, "Display order set");
        Ok(())
    }

    /// A membership with its community's name.
    pub async fn member_detail(&self, community_id: &str, shop_id: &str) -> AppResult<MemberDetail> {
        let (membership, community) = futures::try_join!(
            self.membership_repo.get(community_id, shop_id),
            self.community_repo.find_by_id(community_id),
        )?;
        Ok(MemberDetail {
            membership,
            community_name: community.map(|c| c.profile.name).unwrap_or_default(),
        })
    }

    /// Every community a shop belongs to.
    pub async fn memberships_of(&self, shop_id: &str) -> AppResult<Vec<ShopMembership>> {
        if !self.shop_repo.exists(shop_id).await? {
            return Err(AppError::ShopNotFound(shop_id.to_string()));
        }
        let links = self.membership_repo.communities_of(shop_id).await?;

        let loaded = futures::future::try_join_all(links.iter().map(|link| async move {
            futures::try_join!(
                self.community_repo.find_by_id(&link.member),
                self.membership_repo.find(&link.member, shop_id),
            )
        }))
        .await?;

        Ok(links
            .into_iter()
            .zip(loaded)
            .filter_map(|(link, records)| match records {
                (Some(community), Some(membership)) => Some(ShopMembership {
                    community_id: link.member,
                    community_name: community.profile.name,
                    community_logo: community.profile.logo,
                    rank: membership.rank,
                    status: membership.status,
                    role: membership.role,
                    joined_date: membership.joined_date,
                    score: link.score,
                }),
                _ => {
                    warn!(
                        shop_id = %shop_id,
                        community_id = %link.member,
                        "Skipping dangling community link"
                    );
                    None
                }
            })
            .collect())
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
    use icom_common::IdGenerator;
    use icom_db::entities::{CommunityProfile, CommunitySettings};
    use icom_db::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: MembershipService,
        communities: CommunityRepository,
        shops: ShopRepository,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn KvStore> = store.clone();
        let shops = ShopRepository::new(dyn_store.clone(), IdGenerator::default());
        let communities = CommunityRepository::new(dyn_store.clone(), IdGenerator::default());
        let service = MembershipService::new(
            dyn_store.clone(),
            shops.clone(),
            communities.clone(),
            MembershipRepository::new(dyn_store),
        );
        Fixture {
            store,
            service,
            communities,
            shops,
        }
    }

    async fn community(f: &Fixture, id: &str, settings: CommunitySettings) {
        let mut batch = Batch::new();
        f.communities.stage_put(
            &mut batch,
            &Community::new(id, CommunityProfile::named(id), settings, Utc::now()),
        );
        f.store.exec(batch).await.unwrap();
    }

    fn food_shop(name: &str) -> JoinTarget {
        JoinTarget::NewShop(ShopProfile {
            industry: "food".to_string(),
            province: "hcm".to_string(),
            lat: Some(10.77),
            lng: Some(106.70),
            ..ShopProfile::named(name)
        })
    }

    #[tokio::test]
    async fn test_join_indexes_and_counts() {
        let f = fixture();
        community(&f, "c1", CommunitySettings::default()).await;

        let sid = f
            .service
            .join("c1", food_shop("Cơm Tấm"), JoinOptions::default())
            .await
            .unwrap();

        let c = f.communities.get_by_id("c1").await.unwrap();
        assert_eq!((c.total_members, c.active_members), (1, 1));
        for key in [
            keys::field_index("c1", IndexField::Industry, "food"),
            keys::field_index("c1", IndexField::Status, "ACTIVE"),
            keys::field_index("c1", IndexField::Rank, "MEMBER"),
            keys::search_token("c1", "tam"),
            keys::search_prefix("c1", "co"),
        ] {
            assert!(f.store.sismember(&key, &sid).await.unwrap(), "{key}");
        }
        assert_eq!(f.store.zcard(&keys::geo("c1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_join_then_leave_leaves_no_trace() {
        let f = fixture();
        community(&f, "c1", CommunitySettings::default()).await;
        let before = f.store.keys().await;

        let sid = f
            .service
            .join("c1", food_shop("Cơm Tấm"), JoinOptions::default())
            .await
            .unwrap();
        f.store
            .zincrby(&keys::rank_interactions("c1"), &sid, 1.0)
            .await
            .unwrap();
        f.service.leave("c1", &sid).await.unwrap();

        let c = f.communities.get_by_id("c1").await.unwrap();
        assert_eq!((c.total_members, c.active_members), (0, 0));

        let mut after = f.store.keys().await;
        // Only the shop record, the ID counter and zeroed facet counters remain.
        after.retain(|k| {
            !k.starts_with("ishop:") && !k.contains(":meta:") && !before.contains(k)
        });
        assert!(after.is_empty(), "leftover keys: {after:?}");
        assert_eq!(f.store.zcard(&keys::shop_communities(&sid)).await.unwrap(), 0);
        assert!(f.shops.exists(&sid).await.unwrap());
    }

    #[tokio::test]
    async fn test_join_rules() {
        let f = fixture();
        community(
            &f,
            "c1",
            CommunitySettings {
                require_approval: true,
                auto_activate: false,
                max_members: 1,
            },
        )
        .await;

        let sid = f
            .service
            .join("c1", food_shop("A"), JoinOptions::default())
            .await
            .unwrap();
        let detail = f.service.member_detail("c1", &sid).await.unwrap();
        assert_eq!(detail.membership.status, MemberStatus::Pending);
        assert_eq!(detail.community_name, "c1");
        let c = f.communities.get_by_id("c1").await.unwrap();
        assert_eq!((c.total_members, c.active_members), (1, 0));

        let full = f
            .service
            .join("c1", food_shop("B"), JoinOptions::default())
            .await;
        assert!(matches!(full, Err(AppError::Conflict(_))));

        community(&f, "c2", CommunitySettings::default()).await;
        f.service
            .join("c2", JoinTarget::Existing(sid.clone()), JoinOptions::default())
            .await
            .unwrap();
        let again = f
            .service
            .join("c2", JoinTarget::Existing(sid.clone()), JoinOptions::default())
            .await;
        assert!(matches!(again, Err(AppError::Conflict(_))));

        let missing = f
            .service
            .join("ghost", food_shop("C"), JoinOptions::default())
            .await;
        assert!(matches!(missing, Err(AppError::CommunityNotFound(_))));
    }

    #[tokio::test]
    async fn test_join_rolls_back_new_shop() {
        let f = fixture();
        community(&f, "c1", CommunitySettings::default()).await;
        f.store.fail_next_execs(1);

        let result = f
            .service
            .join("c1", food_shop("Doomed"), JoinOptions::default())
            .await;
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
        assert!(!f.shops.exists("100010010000001").await.unwrap());
        assert_eq!(f.communities.get_by_id("c1").await.unwrap().total_members, 0);
        assert_eq!(f.store.zcard(&keys::members("c1")).await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_count_once() {
        for _ in 0..50 {
            let f = fixture();
            community(&f, "c1", CommunitySettings::default()).await;
            let shop = Shop::new("s1", ShopProfile {
                industry: "food".to_string(),
                ..ShopProfile::named("A")
            }, Utc::now());
            f.shops.create(&shop).await.unwrap();

            let joins: Vec<_> = (0..2)
                .map(|_| {
                    let service = f.service.clone();
                    tokio::spawn(async move {
                        service
                            .join("c1", JoinTarget::Existing("s1".to_string()), JoinOptions::default())
                            .await
                    })
                })
                .collect();
            let mut admitted = 0;
            for join in joins {
                match join.await.unwrap() {
                    Ok(_) => admitted += 1,
                    Err(e) => assert!(matches!(e, AppError::Conflict(_)), "{e}"),
                }
            }
            assert_eq!(admitted, 1);
            let c = f.communities.get_by_id("c1").await.unwrap();
            assert_eq!(c.total_members, 1);
            assert_eq!(
                f.store
                    .zscore(&keys::meta("c1", keys::Facet::Industries), "food")
                    .await
                    .unwrap(),
                Some(1.0)
            );

            let leaves: Vec<_> = (0..2)
                .map(|_| {
                    let service = f.service.clone();
                    tokio::spawn(async move { service.leave("c1", "s1").await })
                })
                .collect();
            let mut left = 0;
            for leave in leaves {
                match leave.await.unwrap() {
                    Ok(()) => left += 1,
                    Err(e) => assert!(e.is_not_found(), "{e}"),
                }
            }
            assert_eq!(left, 1);
            let c = f.communities.get_by_id("c1").await.unwrap();
            assert_eq!((c.total_members, c.active_members), (0, 0));
        }
    }

    #[tokio::test]
    async fn test_failed_leave_keeps_membership() {
        let f = fixture();
        community(&f, "c1", CommunitySettings::default()).await;
        let sid = f
            .service
            .join("c1", food_shop("A"), JoinOptions::default())
            .await
            .unwrap();

        f.store.fail_next_execs(1);
        assert!(matches!(
            f.service.leave("c1", &sid).await,
            Err(AppError::StoreUnavailable(_))
        ));
        // The slot is restored, so a retry still goes through.
        f.service.leave("c1", &sid).await.unwrap();
        assert_eq!(f.communities.get_by_id("c1").await.unwrap().total_members, 0);
    }

    #[tokio::test]
    async fn test_update_standing_moves_indexes() {
        let f = fixture();
        community(&f, "c1", CommunitySettings::default()).await;
        let sid = f
            .service
            .join("c1", food_shop("A"), JoinOptions::default())
            .await
            .unwrap();

        let updated = f
            .service
            .update_standing(
                "c1",
                &sid,
                StandingUpdate {
                    rank: Some(MemberRank::Gold),
                    status: Some(MemberStatus::Suspended),
                    role: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.rank, MemberRank::Gold);

        let idx = |field, value| keys::field_index("c1", field, value);
        assert!(!f.store.sismember(&idx(IndexField::Rank, "MEMBER"), &sid).await.unwrap());
        assert!(f.store.sismember(&idx(IndexField::Rank, "GOLD"), &sid).await.unwrap());
        assert!(!f.store.sismember(&idx(IndexField::Status, "ACTIVE"), &sid).await.unwrap());
        assert!(f.store.sismember(&idx(IndexField::Status, "SUSPENDED"), &sid).await.unwrap());
        let c = f.communities.get_by_id("c1").await.unwrap();
        assert_eq!((c.total_members, c.active_members), (1, 0));

        // Same values again change nothing.
        let same = f
            .service
            .update_standing(
                "c1",
                &sid,
                StandingUpdate {
                    status: Some(MemberStatus::Suspended),
                    ..StandingUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(same, updated);
        assert_eq!(f.communities.get_by_id("c1").await.unwrap().active_members, 0);
    }

    #[tokio::test]
    async fn test_missing_membership_is_not_found() {
        let f = fixture();
        community(&f, "c1", CommunitySettings::default()).await;
        assert!(f.service.leave("c1", "s1").await.unwrap_err().is_not_found());
        assert!(
            f.service
                .set_display_order("c1", "s1", 1)
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(
            f.service
                .update_standing("c1", "s1", StandingUpdate::default())
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_memberships_of_lists_communities() {
        let f = fixture();
        community(&f, "c1", CommunitySettings::default()).await;
        community(&f, "c2", CommunitySettings::default()).await;
        let sid = f
            .service
            .join("c1", food_shop("A"), JoinOptions::default())
            .await
            .unwrap();
        f.service
            .join(
                "c2",
                JoinTarget::Existing(sid.clone()),
                JoinOptions {
                    rank: Some(MemberRank::Silver),
                    role: "owner".to_string(),
                    ..JoinOptions::default()
                },
            )
            .await
            .unwrap();

        let list = f.service.memberships_of(&sid).await.unwrap();
        let ids: Vec<&str> = list.iter().map(|m| m.community_id.as_str()).collect();
        assert!(ids.contains(&"c1") && ids.contains(&"c2"));
        let c2 = list.iter().find(|m| m.community_id == "c2").unwrap();
        assert_eq!(c2.rank, MemberRank::Silver);
        assert_eq!(c2.role, "owner");

        assert!(matches!(
            f.service.memberships_of("ghost").await,
            Err(AppError::ShopNotFound(_))
        ));
    }
}
