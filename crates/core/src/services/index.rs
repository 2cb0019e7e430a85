//! Secondary index fan-out.
//!
//! Every community keeps one set of shop IDs per indexed field value and one
//! set per name token and token prefix. These functions only stage writes;
//! the caller commits them together with the membership change that caused
//! them.

use std::collections::BTreeSet;

use icom_common::text;
use icom_db::entities::{MemberRank, MemberStatus, ShopProfile};
use icom_db::keys::{self, IndexField};
use icom_db::Batch;

/// Direction of an index change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// The shop enters the index.
    Add,
    /// The shop leaves the index.
    Remove,
}

impl Change {
    /// Counter delta of the change.
    #[must_use]
    pub const fn delta(self) -> i64 {
        match self {
            Self::Add => 1,
            Self::Remove => -1,
        }
    }

    fn stage(self, batch: &mut Batch, key: String, shop_id: &str) {
        match self {
            Self::Add => batch.sadd(key, shop_id),
            Self::Remove => batch.srem(key, shop_id),
        };
    }
}

/// Value of a profile field that feeds the index.
#[must_use]
pub fn profile_value(profile: &ShopProfile, field: IndexField) -> &str {
    match field {
        IndexField::Industry => &profile.industry,
        IndexField::SubIndustry => &profile.sub_industry,
        IndexField::Province => &profile.province,
        IndexField::District => &profile.district,
        IndexField::Ward => &profile.ward,
        IndexField::Status | IndexField::Rank => "",
    }
}

/// Index set keys a profile places a shop in, excluding status and rank.
#[must_use]
pub fn profile_keys(community_id: &str, profile: &ShopProfile) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = IndexField::PROFILE
        .into_iter()
        .filter_map(|field| {
            let value = profile_value(profile, field);
            (!value.is_empty()).then(|| keys::field_index(community_id, field, value))
        })
        .collect();
    out.extend(name_keys(community_id, &profile.name));
    out
}

/// Exact-token and prefix set keys for a shop name.
#[must_use]
pub fn name_keys(community_id: &str, name: &str) -> BTreeSet<String> {
    let mut out: BTreeSet<String> = text::distinct_tokens(name)
        .iter()
        .map(|token| keys::search_token(community_id, token))
        .collect();
    out.extend(
        text::name_prefixes(name)
            .iter()
            .map(|prefix| keys::search_prefix(community_id, prefix)),
    );
    out
}

/// Status and rank set keys of a membership.
#[must_use]
pub fn standing_keys(community_id: &str, status: MemberStatus, rank: MemberRank) -> [String; 2] {
    [
        keys::field_index(community_id, IndexField::Status, status.as_str()),
        keys::field_index(community_id, IndexField::Rank, rank.as_str()),
    ]
}

/// Stage adding or removing a shop under every profile-derived key.
pub fn stage_profile(
    batch: &mut Batch,
    community_id: &str,
    shop_id: &str,
    profile: &ShopProfile,
    change: Change,
) {
    for key in profile_keys(community_id, profile) {
        change.stage(batch, key, shop_id);
    }
}

/// Stage adding or removing a shop under its status and rank keys.
pub fn stage_standing(
    batch: &mut Batch,
    community_id: &str,
    shop_id: &str,
    status: MemberStatus,
    rank: MemberRank,
    change: Change,
) {
    for key in standing_keys(community_id, status, rank) {
        change.stage(batch, key, shop_id);
    }
}

/// Stage moving a shop from the keys of `old` to the keys of `new`.
///
/// Keys both profiles share are left alone.
pub fn stage_profile_change(
    batch: &mut Batch,
    community_id: &str,
    shop_id: &str,
    old: &ShopProfile,
    new: &ShopProfile,
) {
    let before = profile_keys(community_id, old);
    let after = profile_keys(community_id, new);
    for key in before.difference(&after) {
        batch.srem(key.clone(), shop_id);
    }
    for key in after.difference(&before) {
        batch.sadd(key.clone(), shop_id);
    }
}

/// Stage moving a member between the old and new value sets of one
/// standing field.
pub fn stage_standing_change(
    batch: &mut Batch,
    community_id: &str,
    shop_id: &str,
    field: IndexField,
    old: &str,
    new: &str,
) {
    if old == new {
        return;
    }
    batch
        .srem(keys::field_index(community_id, field, old), shop_id)
        .sadd(keys::field_index(community_id, field, new), shop_id);
}

/// Set keys a free-text query must intersect.
///
/// Single-character terms match exact tokens; longer terms match any token
/// they prefix.
#[must_use]
pub fn query_keys(community_id: &str, query: &str) -> Vec<String> {
    text::distinct_tokens(query)
        .iter()
        .map(|term| {
            if term.chars().count() < text::MIN_PREFIX_LEN {
                keys::search_token(community_id, term)
            } else {
                keys::search_prefix(community_id, term)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use icom_db::Command;

    fn profile(name: &str, industry: &str) -> ShopProfile {
        ShopProfile {
            industry: industry.to_string(),
            province: "hcm".to_string(),
            ..ShopProfile::named(name)
        }
    }

    #[test]
    fn test_profile_keys_cover_fields_and_name() {
        let keys = profile_keys("c1", &profile("Bún Bò", "food"));
        assert!(keys.contains("icom:c1:idx:industry:food"));
        assert!(keys.contains("icom:c1:idx:province:hcm"));
        assert!(keys.contains("icom:c1:search:bun"));
        assert!(keys.contains("icom:c1:prefix:bu"));
        assert!(keys.contains("icom:c1:prefix:bun"));
        // Empty fields are not indexed.
        assert!(!keys.iter().any(|k| k.contains(":idx:ward:")));
    }

    #[test]
    fn test_profile_change_only_touches_differences() {
        let mut batch = Batch::new();
        stage_profile_change(
            &mut batch,
            "c1",
            "s1",
            &profile("Bún Bò", "food"),
            &profile("Bún Chả", "food"),
        );

        let commands = batch.into_commands();
        assert!(commands.contains(&Command::SRem {
            key: "icom:c1:search:bo".to_string(),
            member: "s1".to_string(),
        }));
        assert!(commands.contains(&Command::SAdd {
            key: "icom:c1:prefix:cha".to_string(),
            member: "s1".to_string(),
        }));
        assert!(!commands.iter().any(|c| c.key() == "icom:c1:idx:industry:food"));
        assert!(!commands.iter().any(|c| c.key() == "icom:c1:search:bun"));
    }

    #[test]
    fn test_query_keys_pick_exact_for_short_terms() {
        assert_eq!(
            query_keys("c1", "Phở 2"),
            vec!["icom:c1:prefix:pho", "icom:c1:search:2"]
        );
        assert!(query_keys("c1", "  ").is_empty());
    }

    #[test]
    fn test_standing_change_noop_when_equal() {
        let mut batch = Batch::new();
        stage_standing_change(&mut batch, "c1", "s1", IndexField::Rank, "GOLD", "GOLD");
        assert!(batch.is_empty());
    }
}
