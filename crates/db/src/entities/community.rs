//! Community entity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use icom_common::AppResult;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{Fields, encode_list, encode_timestamp};

/// Stored community status.
pub const COMMUNITY_ACTIVE: &str = "ACTIVE";

/// Descriptive community profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CommunityProfile {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 300))]
    pub full_name: String,
    pub slogan: String,
    #[validate(length(max = 5000))]
    pub description: String,
    pub logo: String,
    pub banner: String,
    pub theme_color: String,
    pub address: String,
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    pub website: String,
    pub allowed_industries: Vec<String>,
    pub operating_areas: Vec<String>,
}

impl CommunityProfile {
    /// Create a profile with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Join policy of a community.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunitySettings {
    /// New members wait for approval.
    pub require_approval: bool,
    /// Approval is granted automatically.
    pub auto_activate: bool,
    /// Membership cap; zero means unlimited.
    pub max_members: u32,
}

impl CommunitySettings {
    /// Whether a community with `total` members can take one more.
    #[must_use]
    pub fn has_capacity(&self, total: i64) -> bool {
        self.max_members == 0 || total < i64::from(self.max_members)
    }
}

/// Partial update of a community. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CommunityPatch {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 300))]
    pub full_name: Option<String>,
    pub slogan: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub logo: Option<String>,
    pub banner: Option<String>,
    pub theme_color: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub website: Option<String>,
    pub allowed_industries: Option<Vec<String>>,
    pub operating_areas: Option<Vec<String>>,
    pub require_approval: Option<bool>,
    pub auto_activate: Option<bool>,
    pub max_members: Option<u32>,
}

/// A stored community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: String,
    #[serde(flatten)]
    pub profile: CommunityProfile,
    #[serde(flatten)]
    pub settings: CommunitySettings,
    pub status: String,
    pub total_members: i64,
    pub active_members: i64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Community {
    /// New community with zeroed counters.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        profile: CommunityProfile,
        settings: CommunitySettings,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            profile,
            settings,
            status: COMMUNITY_ACTIVE.to_string(),
            total_members: 0,
            active_members: 0,
            created: now,
            modified: now,
        }
    }

    /// Apply a patch in place.
    pub fn apply(&mut self, patch: CommunityPatch) {
        let p = &mut self.profile;
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = patch.$field { p.$field = v; })*
            };
        }
        set!(
            name,
            full_name,
            slogan,
            description,
            logo,
            banner,
            theme_color,
            address,
            phone,
            website,
            allowed_industries,
            operating_areas
        );
        if patch.email.is_some() {
            p.email = patch.email;
        }
        if let Some(v) = patch.require_approval {
            self.settings.require_approval = v;
        }
        if let Some(v) = patch.auto_activate {
            self.settings.auto_activate = v;
        }
        if let Some(v) = patch.max_members {
            self.settings.max_members = v;
        }
    }

    /// Hash encoding of everything except the member counters, which are
    /// only ever changed by increments.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let p = &self.profile;
        let s = &self.settings;
        [
            ("id", self.id.clone()),
            ("name", p.name.clone()),
            ("fullName", p.full_name.clone()),
            ("slogan", p.slogan.clone()),
            ("description", p.description.clone()),
            ("logo", p.logo.clone()),
            ("banner", p.banner.clone()),
            ("themeColor", p.theme_color.clone()),
            ("address", p.address.clone()),
            ("phone", p.phone.clone()),
            ("email", p.email.clone().unwrap_or_default()),
            ("website", p.website.clone()),
            ("allowedIndustries", encode_list(&p.allowed_industries)),
            ("operatingAreas", encode_list(&p.operating_areas)),
            ("status", self.status.clone()),
            ("requireApproval", s.require_approval.to_string()),
            ("autoActivate", s.auto_activate.to_string()),
            ("maxMembers", s.max_members.to_string()),
            ("created", encode_timestamp(&self.created)),
            ("modified", encode_timestamp(&self.modified)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    /// Decode a stored hash.
    pub fn from_fields(id: &str, raw: &HashMap<String, String>) -> AppResult<Self> {
        let f = Fields(raw);
        Ok(Self {
            id: id.to_string(),
            profile: CommunityProfile {
                name: f.string("name"),
                full_name: f.string("fullName"),
                slogan: f.string("slogan"),
                description: f.string("description"),
                logo: f.string("logo"),
                banner: f.string("banner"),
                theme_color: f.string("themeColor"),
                address: f.string("address"),
                phone: f.string("phone"),
                email: f.optional("email"),
                website: f.string("website"),
                allowed_industries: f.list("allowedIndustries")?,
                operating_areas: f.list("operatingAreas")?,
            },
            settings: CommunitySettings {
                require_approval: f.flag("requireApproval"),
                auto_activate: f.flag("autoActivate"),
                max_members: u32::try_from(f.int("maxMembers")?).unwrap_or(0),
            },
            status: f
                .optional("status")
                .unwrap_or_else(|| COMMUNITY_ACTIVE.to_string()),
            total_members: f.int("totalMembers")?,
            active_members: f.int("activeMembers")?,
            created: f.timestamp("created")?,
            modified: f.timestamp("modified")?,
        })
    }
}

/// Counter fields of the community hash.
pub mod counters {
    /// Members of any status.
    pub const TOTAL: &str = "totalMembers";
    /// Members with status `ACTIVE`.
    pub const ACTIVE: &str = "activeMembers";
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_counters_default_to_zero() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let community = Community::new(
            "200010010000001",
            CommunityProfile::named("Chợ Bến Thành"),
            CommunitySettings::default(),
            at,
        );
        let raw: HashMap<String, String> = community.to_fields().into_iter().collect();
        assert!(!raw.contains_key(counters::TOTAL));

        let decoded = Community::from_fields(&community.id, &raw).unwrap();
        assert_eq!(decoded, community);
    }

    #[test]
    fn test_capacity() {
        let unlimited = CommunitySettings::default();
        assert!(unlimited.has_capacity(10_000));

        let capped = CommunitySettings {
            max_members: 2,
            ..CommunitySettings::default()
        };
        assert!(capped.has_capacity(1));
        assert!(!capped.has_capacity(2));
    }

    #[test]
    fn test_patch_updates_policy() {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut community = Community::new(
            "c",
            CommunityProfile::named("Old"),
            CommunitySettings::default(),
            at,
        );
        community.apply(CommunityPatch {
            name: Some("New".to_string()),
            require_approval: Some(true),
            max_members: Some(50),
            ..CommunityPatch::default()
        });
        assert_eq!(community.profile.name, "New");
        assert!(community.settings.require_approval);
        assert!(!community.settings.auto_activate);
        assert_eq!(community.settings.max_members, 50);
    }
}
