//! Store key schema.
//!
//! All keys are built here so that writers and cascading deletes agree on
//! the exact names.

/// Sorted set of all communities, scored by creation time.
pub const ALL_COMMUNITIES: &str = "icoms:all";

/// Indexed per-value field of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexField {
    /// Shop industry.
    Industry,
    /// Shop sub-industry.
    SubIndustry,
    /// Shop province.
    Province,
    /// Shop district.
    District,
    /// Shop ward.
    Ward,
    /// Membership status.
    Status,
    /// Membership rank.
    Rank,
}

impl IndexField {
    /// Fields taken from the shop profile.
    pub const PROFILE: [Self; 5] = [
        Self::Industry,
        Self::SubIndustry,
        Self::Province,
        Self::District,
        Self::Ward,
    ];

    /// Key segment of the field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Industry => "industry",
            Self::SubIndustry => "sub_industry",
            Self::Province => "province",
            Self::District => "district",
            Self::Ward => "ward",
            Self::Status => "status",
            Self::Rank => "rank",
        }
    }
}

/// Facet counter family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Facet {
    /// Industry counts.
    Industries,
    /// Sub-industry counts.
    SubIndustries,
    /// Province and district counts.
    Areas,
}

impl Facet {
    /// Every facet family.
    pub const ALL: [Self; 3] = [Self::Industries, Self::SubIndustries, Self::Areas];

    /// Key segment of the facet.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Industries => "industries",
            Self::SubIndustries => "sub_industries",
            Self::Areas => "areas",
        }
    }
}

/// Shop record hash.
#[must_use]
pub fn shop(shop_id: &str) -> String {
    format!("ishop:{shop_id}")
}

/// Communities a shop belongs to, scored by join time.
#[must_use]
pub fn shop_communities(shop_id: &str) -> String {
    format!("ishop:{shop_id}:icoms")
}

/// Visitors that currently like a shop.
#[must_use]
pub fn shop_likers(shop_id: &str) -> String {
    format!("shop:{shop_id}:likers")
}

/// Community record hash.
#[must_use]
pub fn community(community_id: &str) -> String {
    format!("icom:{community_id}")
}

/// Ordered member list of a community.
#[must_use]
pub fn members(community_id: &str) -> String {
    format!("icom:{community_id}:members")
}

/// Shop IDs holding a membership, used as the join/leave gate.
#[must_use]
pub fn member_claims(community_id: &str) -> String {
    format!("icom:{community_id}:claims")
}

/// Membership record hash.
#[must_use]
pub fn membership(community_id: &str, shop_id: &str) -> String {
    format!("icom:{community_id}:member:{shop_id}")
}

/// Field-value index set.
#[must_use]
pub fn field_index(community_id: &str, field: IndexField, value: &str) -> String {
    format!("icom:{community_id}:idx:{}:{value}", field.as_str())
}

/// Exact name-token index set.
#[must_use]
pub fn search_token(community_id: &str, token: &str) -> String {
    format!("icom:{community_id}:search:{token}")
}

/// Name-token prefix index set.
#[must_use]
pub fn search_prefix(community_id: &str, prefix: &str) -> String {
    format!("icom:{community_id}:prefix:{prefix}")
}

/// Geo index of a community.
#[must_use]
pub fn geo(community_id: &str) -> String {
    format!("icom:{community_id}:geo")
}

/// Facet counter sorted set.
#[must_use]
pub fn meta(community_id: &str, facet: Facet) -> String {
    format!("icom:{community_id}:meta:{}", facet.as_str())
}

/// Interaction leaderboard.
#[must_use]
pub fn rank_interactions(community_id: &str) -> String {
    format!("icom:{community_id}:rank:interactions")
}

/// Aggregate like leaderboard.
#[must_use]
pub fn rank_likes(community_id: &str) -> String {
    format!("icom:{community_id}:rank:likes")
}

/// Per-source like leaderboard.
#[must_use]
pub fn rank_likes_source(community_id: &str, source: &str) -> String {
    format!("icom:{community_id}:rank:likes:source:{source}")
}

/// Like sources seen in a community.
#[must_use]
pub fn rank_like_sources(community_id: &str) -> String {
    format!("icom:{community_id}:rank:likes:sources")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_keys_do_not_collide_with_rankings() {
        // A rank literally called "likes" must not alias the like leaderboard.
        let idx = field_index("c1", IndexField::Rank, "likes");
        assert_ne!(idx, rank_likes("c1"));
        assert_eq!(idx, "icom:c1:idx:rank:likes");
    }

    #[test]
    fn test_key_shapes() {
        assert_eq!(membership("c1", "s1"), "icom:c1:member:s1");
        assert_eq!(shop_communities("s1"), "ishop:s1:icoms");
        assert_eq!(meta("c1", Facet::Areas), "icom:c1:meta:areas");
        assert_eq!(
            rank_likes_source("c1", "icom"),
            "icom:c1:rank:likes:source:icom"
        );
    }
}
