//! Interaction and like leaderboards, with per-visitor like deduplication.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use icom_common::{AppError, AppResult};
use icom_db::repositories::ShopRepository;
use icom_db::{Batch, KvStore, ScoredMember, keys};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// How often a toggle restarts after losing the removal race.
const MAX_TOGGLE_ATTEMPTS: usize = 3;

/// Leaderboard family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankType {
    Interactions,
    Likes,
}

impl FromStr for RankType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interactions" => Ok(Self::Interactions),
            "likes" => Ok(Self::Likes),
            other => Err(AppError::Validation(format!("Unknown rank type: {other}"))),
        }
    }
}

/// Result of a like toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikeOutcome {
    Liked,
    Unliked,
}

impl LikeOutcome {
    /// Wire form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Liked => "liked",
            Self::Unliked => "unliked",
        }
    }
}

impl fmt::Display for LikeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hydrated leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: usize,
    pub shop_id: String,
    pub name: String,
    pub logo: String,
    pub score: f64,
}

/// Stage removing a shop from every leaderboard of a community.
pub fn stage_remove_member(batch: &mut Batch, community_id: &str, shop_id: &str, sources: &[String]) {
    batch
        .zrem(keys::rank_interactions(community_id), shop_id)
        .zrem(keys::rank_likes(community_id), shop_id);
    for source in sources {
        batch.zrem(keys::rank_likes_source(community_id, source), shop_id);
    }
}

/// Stage removal of every leaderboard of a community.
pub fn stage_clear(batch: &mut Batch, community_id: &str, sources: &[String]) {
    batch
        .del(keys::rank_interactions(community_id))
        .del(keys::rank_likes(community_id))
        .del(keys::rank_like_sources(community_id));
    for source in sources {
        batch.del(keys::rank_likes_source(community_id, source));
    }
}

/// Order leaderboard rows by score descending, then shop ID ascending.
fn sort_board(entries: &mut [ScoredMember]) {
    entries.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.member.cmp(&b.member))
    });
}

/// Ranking service for scores and likes.
#[derive(Clone)]
pub struct RankingService {
    store: Arc<dyn KvStore>,
    shop_repo: ShopRepository,
    like_ttl: Duration,
}

impl RankingService {
    /// Create a new ranking service.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, shop_repo: ShopRepository, like_ttl: Duration) -> Self {
        Self {
            store,
            shop_repo,
            like_ttl,
        }
    }

    /// Add one interaction to a shop's score.
    pub async fn increment_interaction(&self, community_id: &str, shop_id: &str) -> AppResult<f64> {
        let score = self
            .store
            .zincrby(&keys::rank_interactions(community_id), shop_id, 1.0)
            .await?;
        debug!(community_id = %community_id, shop_id = %shop_id, score, "Interaction recorded");
        Ok(score)
    }

    /// Like the shop if the visitor has not, otherwise take the like back.
    ///
    /// The visitor's presence in the shop's liker set decides the direction,
    /// and only the caller that actually adds or removes the visitor touches
    /// the counters.
    pub async fn toggle_like(
        &self,
        community_id: &str,
        shop_id: &str,
        visitor_id: &str,
        source: &str,
    ) -> AppResult<LikeOutcome> {
        if visitor_id.trim().is_empty() {
            return Err(AppError::Validation("Visitor ID is required".to_string()));
        }
        if source.trim().is_empty() {
            return Err(AppError::Validation("Like source is required".to_string()));
        }

        let likers = keys::shop_likers(shop_id);
        for attempt in 1..=MAX_TOGGLE_ATTEMPTS {
            if self.store.sadd(&likers, visitor_id).await? {
                let mut batch = Batch::new();
                batch
                    .zincrby(keys::rank_likes(community_id), shop_id, 1.0)
                    .zincrby(keys::rank_likes_source(community_id, source), shop_id, 1.0)
                    .sadd(keys::rank_like_sources(community_id), source)
                    .expire(&likers, self.like_ttl);
                if let Err(e) = self.store.exec(batch).await {
                    self.release_gate(&likers, visitor_id, false).await;
                    return Err(e.into());
                }
                info!(shop_id = %shop_id, visitor_id = %visitor_id, source = %source, "Shop liked");
                return Ok(LikeOutcome::Liked);
            }

            if self.store.srem(&likers, visitor_id).await? {
                let mut batch = Batch::new();
                batch
                    .zincrby(keys::rank_likes(community_id), shop_id, -1.0)
                    .zincrby(keys::rank_likes_source(community_id, source), shop_id, -1.0);
                if let Err(e) = self.store.exec(batch).await {
                    self.release_gate(&likers, visitor_id, true).await;
                    return Err(e.into());
                }
                info!(shop_id = %shop_id, visitor_id = %visitor_id, source = %source, "Shop unliked");
                return Ok(LikeOutcome::Unliked);
            }

            warn!(
                shop_id = %shop_id,
                visitor_id = %visitor_id,
                attempt,
                "Like toggle raced with another toggle, retrying"
            );
        }

        Err(AppError::Conflict(format!(
            "Like toggle for shop {shop_id} kept racing; try again"
        )))
    }

    /// Put the visitor back where it was before a toggle whose counter
    /// batch failed, so the liker set keeps matching the counters.
    async fn release_gate(&self, likers: &str, visitor_id: &str, was_liked: bool) {
        let restored = if was_liked {
            self.store.sadd(likers, visitor_id).await
        } else {
            self.store.srem(likers, visitor_id).await
        };
        if let Err(e) = restored {
            warn!(key = %likers, visitor_id = %visitor_id, error = %e, "Failed to restore liker set");
        }
    }

    /// Whether the visitor currently likes the shop.
    pub async fn like_status(&self, shop_id: &str, visitor_id: &str) -> AppResult<bool> {
        Ok(self
            .store
            .sismember(&keys::shop_likers(shop_id), visitor_id)
            .await?)
    }

    /// Like sources seen in a community.
    pub async fn sources(&self, community_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .store
            .smembers(&keys::rank_like_sources(community_id))
            .await?)
    }

    /// Top `limit` shops of a leaderboard. A `limit` of zero returns the
    /// whole board.
    pub async fn leaderboard(
        &self,
        community_id: &str,
        rank_type: RankType,
        source: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<LeaderboardEntry>> {
        let source = source.filter(|s| !s.trim().is_empty());
        let key = match (rank_type, source) {
            (RankType::Interactions, None) => keys::rank_interactions(community_id),
            (RankType::Interactions, Some(_)) => {
                return Err(AppError::Validation(
                    "Source applies only to the likes leaderboard".to_string(),
                ));
            }
            (RankType::Likes, None) => keys::rank_likes(community_id),
            (RankType::Likes, Some(source)) => keys::rank_likes_source(community_id, source),
        };
        let top = self.top(&key, limit).await?;
        let shops = futures::future::try_join_all(
            top.iter().map(|entry| self.shop_repo.find_by_id(&entry.member)),
        )
        .await?;

        Ok(top
            .into_iter()
            .zip(shops)
            .enumerate()
            .map(|(i, (entry, shop))| {
                let (name, logo) = shop
                    .map(|s| (s.profile.name, s.profile.logo))
                    .unwrap_or_default();
                LeaderboardEntry {
                    rank: i + 1,
                    shop_id: entry.member,
                    name,
                    logo,
                    score: entry.score,
                }
            })
            .collect())
    }

    /// Read the top `limit` entries with ties broken by shop ID.
    ///
    /// Entries tied with the last one read may sort before it, so every
    /// entry at the boundary score is fetched before cutting.
    async fn top(&self, key: &str, limit: usize) -> AppResult<Vec<ScoredMember>> {
        if limit == 0 {
            let mut entries = self.store.zrevrange(key, 0, -1).await?;
            sort_board(&mut entries);
            return Ok(entries);
        }
        let stop = i64::try_from(limit).unwrap_or(i64::MAX) - 1;
        let mut entries = self.store.zrevrange(key, 0, stop).await?;
        let Some(boundary) = entries.last().map(|e| e.score) else {
            return Ok(entries);
        };
        if entries.len() == limit {
            let tied = self.store.zrange_by_score(key, boundary, boundary).await?;
            entries.retain(|e| e.score.total_cmp(&boundary).is_ne());
            entries.extend(tied);
        }
        sort_board(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }
}
