//! Community service.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use icom_common::{AppError, AppResult};
use icom_db::entities::{Community, CommunityPatch, CommunityProfile, CommunitySettings};
use icom_db::repositories::{
    CommunityRepository, MembershipLinks, MembershipRepository, ShopRepository,
};
use icom_db::{Batch, KvStore, keys};
use tracing::{error, info, warn};
use validator::Validate;

use super::query::{Page, Paging};
use super::{index, metadata, ranking};

/// Community service for business logic.
#[derive(Clone)]
pub struct CommunityService {
    store: Arc<dyn KvStore>,
    shop_repo: ShopRepository,
    community_repo: CommunityRepository,
    membership_repo: MembershipRepository,
    paging: Paging,
}

impl CommunityService {
    /// Create a new community service.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        shop_repo: ShopRepository,
        community_repo: CommunityRepository,
        membership_repo: MembershipRepository,
        paging: Paging,
    ) -> Self {
        Self {
            store,
            shop_repo,
            community_repo,
            membership_repo,
            paging,
        }
    }

    /// Create a community with zeroed counters.
    pub async fn create(
        &self,
        profile: CommunityProfile,
        settings: CommunitySettings,
    ) -> AppResult<Community> {
        profile.validate()?;
        let id = self.community_repo.next_id().await?;
        let community = Community::new(id, profile, settings, Utc::now());

        let mut batch = Batch::new();
        self.community_repo.stage_put(&mut batch, &community);
        self.store.exec(batch).await?;

        info!(community_id = %community.id, name = %community.profile.name, "Community created");
        Ok(community)
    }

    /// Get a community.
    pub async fn get(&self, community_id: &str) -> AppResult<Community> {
        self.community_repo.get_by_id(community_id).await
    }

    /// Apply a partial update.
    pub async fn update(&self, community_id: &str, patch: CommunityPatch) -> AppResult<Community> {
        patch.validate()?;
        let mut community = self.community_repo.get_by_id(community_id).await?;
        community.apply(patch);
        community.modified = Utc::now();

        let mut batch = Batch::new();
        self.community_repo.stage_put(&mut batch, &community);
        self.store.exec(batch).await?;

        info!(community_id = %community_id, "Community updated");
        Ok(community)
    }

    /// Communities, newest first.
    pub async fn list(&self, page: i64, limit: i64) -> AppResult<Page<Community>> {
        let (page, limit) = self.paging.resolve(page, limit);
        let (ids, total) = futures::try_join!(
            self.community_repo
                .list_ids((page - 1).saturating_mul(limit), limit),
            self.community_repo.count(),
        )?;

        let loaded = futures::future::try_join_all(
            ids.iter().map(|id| self.community_repo.find_by_id(id)),
        )
        .await?;
        let items = ids
            .iter()
            .zip(loaded)
            .filter_map(|(id, community)| {
                if community.is_none() {
                    warn!(community_id = %id, "Skipping listed community without record");
                }
                community
            })
            .collect();

        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    /// Delete a community and everything derived from its members.
    ///
    /// Runs as ordered batches: member links, index sets, leaderboards,
    /// facet counters, then the record. Facet counters and the global
    /// listing are best-effort; any other failure stops the cascade with
    /// [`AppError::PartialFailure`].
    pub async fn delete(&self, community_id: &str) -> AppResult<()> {
        self.community_repo.ensure_exists(community_id).await?;

        let members = self.membership_repo.member_ids(community_id).await?;
        let sources = self
            .store
            .smembers(&keys::rank_like_sources(community_id))
            .await?;
        let index_keys = self.index_keys(community_id, &members).await?;

        let mut steps: Vec<(&'static str, Batch)> = Vec::with_capacity(4);

        let mut links = Batch::new();
        for shop_id in &members {
            MembershipLinks::stage_unlink(&mut links, community_id, shop_id);
            self.membership_repo
                .stage_delete(&mut links, community_id, shop_id);
        }
        links.del(keys::member_claims(community_id));
        steps.push(("members", links));

        let mut indexes = Batch::new();
        for key in index_keys {
            indexes.del(key);
        }
        indexes.del(keys::geo(community_id));
        steps.push(("indexes", indexes));

        let mut rankings = Batch::new();
        ranking::stage_clear(&mut rankings, community_id, &sources);
        steps.push(("rankings", rankings));

        let mut completed = 0;
        for (step, batch) in steps {
            self.run_step(community_id, step, batch, completed).await?;
            completed += 1;
        }

        let mut facets = Batch::new();
        metadata::stage_clear(&mut facets, community_id);
        if let Err(e) = self.store.exec(facets).await {
            warn!(community_id = %community_id, error = %e, "Failed to clear facet counters");
        }

        let mut record = Batch::new();
        self.community_repo.stage_delete(&mut record, community_id);
        record.del(keys::members(community_id));
        self.run_step(community_id, "record", record, completed).await?;

        let mut unlist = Batch::new();
        self.community_repo.stage_unlist(&mut unlist, community_id);
        if let Err(e) = self.store.exec(unlist).await {
            warn!(community_id = %community_id, error = %e, "Failed to unlist community");
        }

        info!(community_id = %community_id, members = members.len(), "Community deleted");
        Ok(())
    }

    async fn run_step(
        &self,
        community_id: &str,
        step: &str,
        batch: Batch,
        completed: usize,
    ) -> AppResult<()> {
        self.store.exec(batch).await.map_err(|e| {
            error!(
                community_id = %community_id,
                step,
                completed,
                error = %e,
                "Community delete stopped part way"
            );
            AppError::PartialFailure {
                operation: "delete_community",
                completed,
                cause: e.to_string(),
            }
        })
    }

    /// Every index set the members of a community can appear in.
    async fn index_keys(
        &self,
        community_id: &str,
        members: &[String],
    ) -> AppResult<BTreeSet<String>> {
        let loaded = futures::future::try_join_all(members.iter().map(|shop_id| async move {
            futures::try_join!(
                self.shop_repo.find_by_id(shop_id),
                self.membership_repo.find(community_id, shop_id),
            )
        }))
        .await?;

        let mut out = BTreeSet::new();
        for (shop, membership) in loaded {
            if let Some(shop) = shop {
                out.extend(index::profile_keys(community_id, &shop.profile));
            }
            if let Some(m) = membership {
                out.extend(index::standing_keys(community_id, m.status, m.rank));
            }
        }
        Ok(out)
    }
}
