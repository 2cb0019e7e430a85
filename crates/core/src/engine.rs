//! Engine facade over every service.

#![allow(missing_docs)]

use std::sync::Arc;

use icom_common::{AppResult, Config, EngineConfig, IdGenerator};
use icom_db::entities::{
    Community, CommunityPatch, CommunityProfile, CommunitySettings, Membership, Shop, ShopPatch,
    ShopProfile,
};
use icom_db::repositories::{CommunityRepository, MembershipRepository, ShopRepository};
use icom_db::{GeoMatch, KvStore};
use tracing::info;

use crate::services::{
    CommunityMetadata, CommunityService, GeoService, JoinOptions, JoinTarget, LeaderboardEntry,
    LikeOutcome, MemberDetail, MemberFilter, MemberView, MembershipService, MetadataService, Page,
    Paging, QueryService, RadiusQuery, RankType, RankingService, ShopMembership, ShopService,
    StandingUpdate,
};

/// Every engine operation over one store.
#[derive(Clone)]
pub struct Engine {
    pub memberships: MembershipService,
    pub queries: QueryService,
    pub ranking: RankingService,
    pub metadata: MetadataService,
    pub geo: GeoService,
    pub shops: ShopService,
    pub communities: CommunityService,
}

impl Engine {
    /// Build the services on top of `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, config: &EngineConfig) -> Self {
        let ids = IdGenerator::from_config(config);
        let shop_repo = ShopRepository::new(store.clone(), ids.clone());
        let community_repo = CommunityRepository::new(store.clone(), ids);
        let membership_repo = MembershipRepository::new(store.clone());
        let paging = Paging::from_config(config);

        Self {
            memberships: MembershipService::new(
                store.clone(),
                shop_repo.clone(),
                community_repo.clone(),
                membership_repo.clone(),
            ),
            queries: QueryService::new(
                store.clone(),
                shop_repo.clone(),
                community_repo.clone(),
                membership_repo.clone(),
                paging,
            ),
            ranking: RankingService::new(store.clone(), shop_repo.clone(), config.like_dedup_ttl()),
            metadata: MetadataService::new(store.clone()),
            geo: GeoService::new(store.clone()),
            shops: ShopService::new(
                store.clone(),
                shop_repo.clone(),
                community_repo.clone(),
                membership_repo.clone(),
            ),
            communities: CommunityService::new(
                store,
                shop_repo,
                community_repo,
                membership_repo,
                paging,
            ),
        }
    }

    /// Connect to the configured Redis store and build the services.
    pub async fn connect(config: &Config) -> AppResult<Self> {
        let store = icom_db::init(config).await?;
        info!(url = %config.redis.url, "Engine connected");
        Ok(Self::new(store, &config.engine))
    }

    // === Membership ===

    pub async fn join(
        &self,
        community_id: &str,
        target: JoinTarget,
        options: JoinOptions,
    ) -> AppResult<String> {
        self.memberships.join(community_id, target, options).await
    }

    pub async fn leave(&self, community_id: &str, shop_id: &str) -> AppResult<()> {
        self.memberships.leave(community_id, shop_id).await
    }

    pub async fn update_status(
        &self,
        community_id: &str,
        shop_id: &str,
        update: StandingUpdate,
    ) -> AppResult<Membership> {
        self.memberships
            .update_standing(community_id, shop_id, update)
            .await
    }

    pub async fn set_display_order(
        &self,
        community_id: &str,
        shop_id: &str,
        order: i64,
    ) -> AppResult<()> {
        self.memberships
            .set_display_order(community_id, shop_id, order)
            .await
    }

    pub async fn member_detail(&self, community_id: &str, shop_id: &str) -> AppResult<MemberDetail> {
        self.memberships.member_detail(community_id, shop_id).await
    }

    pub async fn memberships_of(&self, shop_id: &str) -> AppResult<Vec<ShopMembership>> {
        self.memberships.memberships_of(shop_id).await
    }

    // === Queries ===

    pub async fn list_members(
        &self,
        community_id: &str,
        page: i64,
        limit: i64,
    ) -> AppResult<Page<MemberView>> {
        self.queries.list_members(community_id, page, limit).await
    }

    pub async fn filter_members(
        &self,
        community_id: &str,
        filter: &MemberFilter,
        page: i64,
        limit: i64,
    ) -> AppResult<Page<MemberView>> {
        self.queries
            .filter_members(community_id, filter, page, limit)
            .await
    }

    pub async fn search_members(
        &self,
        community_id: &str,
        query: &str,
        page: i64,
        limit: i64,
    ) -> AppResult<Page<MemberView>> {
        self.queries
            .search_members(community_id, query, page, limit)
            .await
    }

    pub async fn radius_search(
        &self,
        community_id: &str,
        query: &RadiusQuery,
    ) -> AppResult<Vec<MemberView>> {
        self.queries.radius_search(community_id, query).await
    }

    /// Raw radius hits without hydration.
    pub async fn nearby(&self, community_id: &str, query: &RadiusQuery) -> AppResult<Vec<GeoMatch>> {
        self.geo.nearby(community_id, query).await
    }

    // === Ranking ===

    pub async fn increment_interaction(&self, community_id: &str, shop_id: &str) -> AppResult<f64> {
        self.ranking
            .increment_interaction(community_id, shop_id)
            .await
    }

    pub async fn toggle_like(
        &self,
        community_id: &str,
        shop_id: &str,
        visitor_id: &str,
        source: &str,
    ) -> AppResult<LikeOutcome> {
        self.ranking
            .toggle_like(community_id, shop_id, visitor_id, source)
            .await
    }

    pub async fn like_status(&self, shop_id: &str, visitor_id: &str) -> AppResult<bool> {
        self.ranking.like_status(shop_id, visitor_id).await
    }

    pub async fn leaderboard(
        &self,
        community_id: &str,
        rank_type: RankType,
        source: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<LeaderboardEntry>> {
        self.ranking
            .leaderboard(community_id, rank_type, source, limit)
            .await
    }

    pub async fn metadata(&self, community_id: &str) -> AppResult<CommunityMetadata> {
        self.metadata.metadata(community_id).await
    }

    // === Shops ===

    pub async fn create_shop(&self, profile: ShopProfile) -> AppResult<Shop> {
        self.shops.create(profile).await
    }

    pub async fn get_shop(&self, shop_id: &str) -> AppResult<Shop> {
        self.shops.get(shop_id).await
    }

    pub async fn update_shop(&self, shop_id: &str, patch: ShopPatch) -> AppResult<Shop> {
        self.shops.update(shop_id, patch).await
    }

    pub async fn delete_shop(&self, shop_id: &str) -> AppResult<()> {
        self.shops.delete(shop_id).await
    }

    // === Communities ===

    pub async fn create_community(
        &self,
        profile: CommunityProfile,
        settings: CommunitySettings,
    ) -> AppResult<Community> {
        self.communities.create(profile, settings).await
    }

    pub async fn get_community(&self, community_id: &str) -> AppResult<Community> {
        self.communities.get(community_id).await
    }

    pub async fn update_community(
        &self,
        community_id: &str,
        patch: CommunityPatch,
    ) -> AppResult<Community> {
        self.communities.update(community_id, patch).await
    }

    pub async fn delete_community(&self, community_id: &str) -> AppResult<()> {
        self.communities.delete(community_id).await
    }

    pub async fn list_communities(&self, page: i64, limit: i64) -> AppResult<Page<Community>> {
        self.communities.list(page, limit).await
    }
}
