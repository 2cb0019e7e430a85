//! Facet counters for filter suggestions.

use std::sync::Arc;

use icom_common::AppResult;
use icom_db::entities::ShopProfile;
use icom_db::keys::{self, Facet};
use icom_db::{Batch, KvStore, ScoredMember};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::index::Change;

/// One facet value and how many members carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub name: String,
    pub count: i64,
}

/// Facet counts of a community.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityMetadata {
    pub industries: Vec<FacetCount>,
    pub sub_industries: Vec<FacetCount>,
    pub areas: Vec<FacetCount>,
}

/// Facet values a profile contributes, as `(facet, value)` pairs.
fn facet_values(profile: &ShopProfile) -> Vec<(Facet, &str)> {
    [
        (Facet::Industries, profile.industry.as_str()),
        (Facet::SubIndustries, profile.sub_industry.as_str()),
        (Facet::Areas, profile.province.as_str()),
        (Facet::Areas, profile.district.as_str()),
    ]
    .into_iter()
    .filter(|(_, value)| !value.is_empty())
    .collect()
}

/// Stage the counter updates for a profile entering or leaving a community.
pub fn stage_profile(batch: &mut Batch, community_id: &str, profile: &ShopProfile, change: Change) {
    let delta = change.delta() as f64;
    for (facet, value) in facet_values(profile) {
        batch.zincrby(keys::meta(community_id, facet), value, delta);
    }
}

/// Stage the counter updates for a profile changing from `old` to `new`.
pub fn stage_profile_change(
    batch: &mut Batch,
    community_id: &str,
    old: &ShopProfile,
    new: &ShopProfile,
) {
    let before = facet_values(old);
    let after = facet_values(new);
    if before == after {
        return;
    }
    for (facet, value) in before {
        batch.zincrby(keys::meta(community_id, facet), value, -1.0);
    }
    for (facet, value) in after {
        batch.zincrby(keys::meta(community_id, facet), value, 1.0);
    }
}

/// Stage removal of every counter of a community.
pub fn stage_clear(batch: &mut Batch, community_id: &str) {
    for facet in Facet::ALL {
        batch.del(keys::meta(community_id, facet));
    }
}

/// Reads facet counters.
#[derive(Clone)]
pub struct MetadataService {
    store: Arc<dyn KvStore>,
}

impl MetadataService {
    /// Create a new metadata service.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Positive facet counts of a community, most frequent first.
    pub async fn metadata(&self, community_id: &str) -> AppResult<CommunityMetadata> {
        let (industries, sub_industries, areas) = futures::try_join!(
            self.facet(community_id, Facet::Industries),
            self.facet(community_id, Facet::SubIndustries),
            self.facet(community_id, Facet::Areas),
        )?;
        debug!(
            community_id = %community_id,
            industries = industries.len(),
            areas = areas.len(),
            "Loaded community metadata"
        );
        Ok(CommunityMetadata {
            industries,
            sub_industries,
            areas,
        })
    }

    async fn facet(&self, community_id: &str, facet: Facet) -> AppResult<Vec<FacetCount>> {
        let entries = self
            .store
            .zrange_by_score(&keys::meta(community_id, facet), 0.5, f64::INFINITY)
            .await?;
        Ok(to_counts(entries))
    }
}

fn to_counts(entries: Vec<ScoredMember>) -> Vec<FacetCount> {
    let mut counts: Vec<FacetCount> = entries
        .into_iter()
        .map(|e| FacetCount {
            name: e.member,
            count: e.score.round() as i64,
        })
        .filter(|c| c.count > 0)
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    counts
}
