//! Membership entity (a shop's standing inside a community).

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use icom_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};

use super::{Fields, encode_timestamp};

/// Membership status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Active,
    Inactive,
    Suspended,
    Pending,
}

impl MemberStatus {
    /// Stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Suspended => "SUSPENDED",
            Self::Pending => "PENDING",
        }
    }

    /// Whether the status counts towards `activeMembers`.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "SUSPENDED" => Ok(Self::Suspended),
            "PENDING" => Ok(Self::Pending),
            other => Err(AppError::Validation(format!(
                "Unknown member status: {other}"
            ))),
        }
    }
}

/// Membership rank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberRank {
    #[default]
    Member,
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl MemberRank {
    /// Stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Member => "MEMBER",
            Self::Bronze => "BRONZE",
            Self::Silver => "SILVER",
            Self::Gold => "GOLD",
            Self::Platinum => "PLATINUM",
        }
    }
}

impl fmt::Display for MemberRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRank {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MEMBER" => Ok(Self::Member),
            "BRONZE" => Ok(Self::Bronze),
            "SILVER" => Ok(Self::Silver),
            "GOLD" => Ok(Self::Gold),
            "PLATINUM" => Ok(Self::Platinum),
            other => Err(AppError::Validation(format!("Unknown member rank: {other}"))),
        }
    }
}

/// Membership hash field names.
pub mod field {
    pub const RANK: &str = "rank";
    pub const STATUS: &str = "status";
    pub const ROLE: &str = "role";
    pub const DISPLAY_ORDER: &str = "displayOrder";
}

/// A shop's membership in a community.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub community_id: String,
    pub shop_id: String,
    pub rank: MemberRank,
    pub status: MemberStatus,
    pub role: String,
    pub joined_date: DateTime<Utc>,
    /// Explicit position in the member list, if one was set.
    pub display_order: Option<i64>,
}

impl Membership {
    /// Hash encoding.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("icomId", self.community_id.clone()),
            ("shopId", self.shop_id.clone()),
            (field::RANK, self.rank.to_string()),
            (field::STATUS, self.status.to_string()),
            (field::ROLE, self.role.clone()),
            ("joinedDate", encode_timestamp(&self.joined_date)),
        ];
        if let Some(order) = self.display_order {
            fields.push((field::DISPLAY_ORDER, order.to_string()));
        }
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Decode a stored hash.
    pub fn from_fields(
        community_id: &str,
        shop_id: &str,
        raw: &HashMap<String, String>,
    ) -> AppResult<Self> {
        let f = Fields(raw);
        let display_order = match f.optional(field::DISPLAY_ORDER) {
            Some(_) => Some(f.int(field::DISPLAY_ORDER)?),
            None => None,
        };
        Ok(Self {
            community_id: community_id.to_string(),
            shop_id: shop_id.to_string(),
            rank: f
                .optional(field::RANK)
                .map_or(Ok(MemberRank::default()), |r| r.parse())?,
            status: f.string(field::STATUS).parse()?,
            role: f.string(field::ROLE),
            joined_date: f.timestamp("joinedDate")?,
            display_order,
        })
    }
}
