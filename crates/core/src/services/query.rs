//! Member queries: listing, filtering, text search and radius search.

use std::sync::Arc;

use icom_common::{AppResult, EngineConfig};
use icom_db::entities::{MemberRank, MemberStatus, Membership, Shop};
use icom_db::keys::{self, IndexField};
use icom_db::repositories::{CommunityRepository, MembershipRepository, ShopRepository};
use icom_db::KvStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::geo::{GeoService, RadiusQuery};
use super::index;

/// Page bounds after clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    default_limit: usize,
    max_limit: usize,
}

impl Paging {
    /// Paging rules from the engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            default_limit: config.default_page_limit.max(1),
            max_limit: config.max_page_limit.max(1),
        }
    }

    /// Clamp a caller's page and limit: pages start at 1, a limit below 1
    /// falls back to the default, and limits are capped.
    #[must_use]
    pub fn resolve(&self, page: i64, limit: i64) -> (usize, usize) {
        let page = usize::try_from(page.max(1)).unwrap_or(1);
        let limit = if limit < 1 {
            self.default_limit
        } else {
            usize::try_from(limit).unwrap_or(self.max_limit)
        };
        (page, limit.min(self.max_limit))
    }
}

impl Default for Paging {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: usize,
    pub limit: usize,
}

/// A community member with its shop record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberView {
    pub shop: Shop,
    pub membership: Membership,
    /// Distance from the query center, for radius searches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// Filter criteria. Unset and blank criteria are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberFilter {
    pub industry: Option<String>,
    pub sub_industry: Option<String>,
    pub province: Option<String>,
    pub district: Option<String>,
    pub ward: Option<String>,
    pub status: Option<MemberStatus>,
    pub rank: Option<MemberRank>,
    /// Free-text name query.
    pub query: Option<String>,
}

impl MemberFilter {
    /// Index set keys the filter intersects.
    #[must_use]
    pub fn index_keys(&self, community_id: &str) -> Vec<String> {
        let fields = [
            (IndexField::Industry, self.industry.as_deref()),
            (IndexField::SubIndustry, self.sub_industry.as_deref()),
            (IndexField::Province, self.province.as_deref()),
            (IndexField::District, self.district.as_deref()),
            (IndexField::Ward, self.ward.as_deref()),
            (IndexField::Status, self.status.map(MemberStatus::as_str)),
            (IndexField::Rank, self.rank.map(MemberRank::as_str)),
        ];
        let mut out: Vec<String> = fields
            .into_iter()
            .filter_map(|(field, value)| {
                value
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| keys::field_index(community_id, field, v))
            })
            .collect();
        if let Some(query) = &self.query {
            out.extend(index::query_keys(community_id, query));
        }
        out
    }
}

fn slice_page<T: Clone>(items: &[T], page: usize, limit: usize) -> Vec<T> {
    let start = (page - 1).saturating_mul(limit);
    items.iter().skip(start).take(limit).cloned().collect()
}

/// Query service for member reads.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn KvStore>,
    shop_repo: ShopRepository,
    community_repo: CommunityRepository,
    membership_repo: MembershipRepository,
    geo: GeoService,
    paging: Paging,
}

impl QueryService {
    /// Create a new query service.
    #[must_use]
    pub fn new(
        store: Arc<dyn KvStore>,
        shop_repo: ShopRepository,
        community_repo: CommunityRepository,
        membership_repo: MembershipRepository,
        paging: Paging,
    ) -> Self {
        Self {
            geo: GeoService::new(store.clone()),
            store,
            shop_repo,
            community_repo,
            membership_repo,
            paging,
        }
    }

    /// Members in list order.
    pub async fn list_members(
        &self,
        community_id: &str,
        page: i64,
        limit: i64,
    ) -> AppResult<Page<MemberView>> {
        self.community_repo.ensure_exists(community_id).await?;
        let (page, limit) = self.paging.resolve(page, limit);

        let start = i64::try_from((page - 1).saturating_mul(limit)).unwrap_or(i64::MAX);
        let stop = start.saturating_add(i64::try_from(limit).unwrap_or(i64::MAX) - 1);
        let (entries, total) = futures::try_join!(
            self.membership_repo.member_range(community_id, start, stop),
            self.membership_repo.member_count(community_id),
        )?;

        let ids: Vec<String> = entries.into_iter().map(|e| e.member).collect();
        let items = self.hydrate(community_id, &ids).await?;
        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    /// Members matching every criterion, ordered by shop ID.
    pub async fn filter_members(
        &self,
        community_id: &str,
        filter: &MemberFilter,
        page: i64,
        limit: i64,
    ) -> AppResult<Page<MemberView>> {
        let keys = filter.index_keys(community_id);
        if keys.is_empty() {
            return self.list_members(community_id, page, limit).await;
        }
        self.community_repo.ensure_exists(community_id).await?;
        self.intersect_page(community_id, &keys, page, limit).await
    }

    /// Members whose name matches every query term, ordered by shop ID.
    pub async fn search_members(
        &self,
        community_id: &str,
        query: &str,
        page: i64,
        limit: i64,
    ) -> AppResult<Page<MemberView>> {
        let keys = index::query_keys(community_id, query);
        if keys.is_empty() {
            return self.list_members(community_id, page, limit).await;
        }
        self.community_repo.ensure_exists(community_id).await?;
        self.intersect_page(community_id, &keys, page, limit).await
    }

    /// Members within a radius, nearest first.
    pub async fn radius_search(
        &self,
        community_id: &str,
        query: &RadiusQuery,
    ) -> AppResult<Vec<MemberView>> {
        query.validate()?;
        self.community_repo.ensure_exists(community_id).await?;

        let hits = self.geo.nearby(community_id, query).await?;
        let ids: Vec<String> = hits.iter().map(|h| h.member.clone()).collect();
        let mut views = self.hydrate(community_id, &ids).await?;
        for view in &mut views {
            view.distance = hits
                .iter()
                .find(|h| h.member == view.shop.id)
                .map(|h| h.distance);
        }
        Ok(views)
    }

    async fn intersect_page(
        &self,
        community_id: &str,
        keys: &[String],
        page: i64,
        limit: i64,
    ) -> AppResult<Page<MemberView>> {
        let (page, limit) = self.paging.resolve(page, limit);

        let mut ids = match keys {
            [single] => self.store.smembers(single).await?,
            _ => self.store.sinter(keys).await?,
        };
        ids.sort();
        debug!(
            community_id = %community_id,
            sets = keys.len(),
            matches = ids.len(),
            "Index intersection"
        );

        let total = ids.len() as u64;
        let items = self
            .hydrate(community_id, &slice_page(&ids, page, limit))
            .await?;
        Ok(Page {
            items,
            total,
            page,
            limit,
        })
    }

    /// Load shop and membership records for `ids`, keeping their order.
    ///
    /// IDs without a shop or membership record are stale index entries and
    /// are dropped.
    async fn hydrate(&self, community_id: &str, ids: &[String]) -> AppResult<Vec<MemberView>> {
        let loaded = futures::future::try_join_all(ids.iter().map(|id| async move {
            let (shop, membership) = futures::try_join!(
                self.shop_repo.find_by_id(id),
                self.membership_repo.find(community_id, id),
            )?;
            AppResult::Ok((id, shop, membership))
        }))
        .await?;

        Ok(loaded
            .into_iter()
            .filter_map(|(id, shop, membership)| match (shop, membership) {
                (Some(shop), Some(membership)) => Some(MemberView {
                    shop,
                    membership,
                    distance: None,
                }),
                (shop, membership) => {
                    warn!(
                        community_id = %community_id,
                        shop_id = %id,
                        has_shop = shop.is_some(),
                        has_membership = membership.is_some(),
                        "Skipping stale index entry"
                    );
                    None
                }
            })
            .collect())
    }
}
