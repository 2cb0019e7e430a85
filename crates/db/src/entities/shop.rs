//! Shop entity.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use icom_common::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{Fields, encode_list, encode_timestamp};
use crate::store::{GEO_LAT_MAX, GEO_LAT_MIN, GeoPoint};

/// Lifecycle status of a shop record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShopStatus {
    /// Visible and joinable.
    #[default]
    Active,
    /// Hidden by its owner.
    Inactive,
}

impl ShopStatus {
    /// Stored form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl fmt::Display for ShopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShopStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            other => Err(AppError::Validation(format!("Unknown shop status: {other}"))),
        }
    }
}

/// Caller-supplied shop profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShopProfile {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: String,
    pub logo: String,
    pub banner: String,
    pub image_urls: Vec<String>,

    pub province: String,
    pub district: String,
    pub ward: String,
    pub street: String,
    #[validate(range(min = GEO_LAT_MIN, max = GEO_LAT_MAX))]
    pub lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: Option<f64>,

    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    pub website: String,

    pub industry: String,
    pub sub_industry: String,
}

impl ShopProfile {
    /// Create a profile with only a name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Position of the shop, when both coordinates are known.
    #[must_use]
    pub fn location(&self) -> Option<GeoPoint> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

/// Partial update of a shop profile. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShopPatch {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    pub logo: Option<String>,
    pub banner: Option<String>,
    pub image_urls: Option<Vec<String>>,
    pub province: Option<String>,
    pub district: Option<String>,
    pub ward: Option<String>,
    pub street: Option<String>,
    #[validate(range(min = GEO_LAT_MIN, max = GEO_LAT_MAX))]
    pub lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub lng: Option<f64>,
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    pub website: Option<String>,
    pub industry: Option<String>,
    pub sub_industry: Option<String>,
}

impl ShopPatch {
    /// Profile with this patch applied on top of `base`.
    #[must_use]
    pub fn apply(self, base: &ShopProfile) -> ShopProfile {
        let mut next = base.clone();
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(v) = self.$field { next.$field = v; })*
            };
        }
        set!(
            name,
            description,
            logo,
            banner,
            image_urls,
            province,
            district,
            ward,
            street,
            phone,
            website,
            industry,
            sub_industry
        );
        if self.lat.is_some() {
            next.lat = self.lat;
        }
        if self.lng.is_some() {
            next.lng = self.lng;
        }
        if self.email.is_some() {
            next.email = self.email;
        }
        next
    }
}

/// A stored shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shop {
    pub id: String,
    #[serde(flatten)]
    pub profile: ShopProfile,
    pub status: ShopStatus,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    /// Communities the shop belongs to, oldest membership first.
    #[serde(default)]
    pub communities: Vec<String>,
}

impl Shop {
    /// New active shop.
    #[must_use]
    pub fn new(id: impl Into<String>, profile: ShopProfile, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            profile,
            status: ShopStatus::Active,
            created: now,
            modified: now,
            communities: Vec::new(),
        }
    }

    /// Hash encoding. The community list is stored separately.
    #[must_use]
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let p = &self.profile;
        let mut fields = vec![
            ("id", self.id.clone()),
            ("name", p.name.clone()),
            ("description", p.description.clone()),
            ("logo", p.logo.clone()),
            ("banner", p.banner.clone()),
            ("imageUrls", encode_list(&p.image_urls)),
            ("province", p.province.clone()),
            ("district", p.district.clone()),
            ("ward", p.ward.clone()),
            ("street", p.street.clone()),
            ("phone", p.phone.clone()),
            ("email", p.email.clone().unwrap_or_default()),
            ("website", p.website.clone()),
            ("industry", p.industry.clone()),
            ("subIndustry", p.sub_industry.clone()),
            ("status", self.status.to_string()),
            ("created", encode_timestamp(&self.created)),
            ("modified", encode_timestamp(&self.modified)),
        ];
        if let Some(lat) = p.lat {
            fields.push(("lat", lat.to_string()));
        }
        if let Some(lng) = p.lng {
            fields.push(("lng", lng.to_string()));
        }
        fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// Decode a stored hash. `communities` is left empty.
    pub fn from_fields(id: &str, raw: &HashMap<String, String>) -> AppResult<Self> {
        let f = Fields(raw);
        Ok(Self {
            id: id.to_string(),
            profile: ShopProfile {
                name: f.string("name"),
                description: f.string("description"),
                logo: f.string("logo"),
                banner: f.string("banner"),
                image_urls: f.list("imageUrls")?,
                province: f.string("province"),
                district: f.string("district"),
                ward: f.string("ward"),
                street: f.string("street"),
                lat: f.float("lat")?,
                lng: f.float("lng")?,
                phone: f.string("phone"),
                email: f.optional("email"),
                website: f.string("website"),
                industry: f.string("industry"),
                sub_industry: f.string("subIndustry"),
            },
            status: f
                .optional("status")
                .map_or(Ok(ShopStatus::Active), |s| s.parse())?,
            created: f.timestamp("created")?,
            modified: f.timestamp("modified")?,
            communities: Vec::new(),
        })
    }
}
