//! Entity models and their hash encodings.

#![allow(missing_docs)]

pub mod community;
pub mod membership;
pub mod shop;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use icom_common::{AppError, AppResult};

pub use community::{Community, CommunityPatch, CommunityProfile, CommunitySettings};
pub use membership::{MemberRank, MemberStatus, Membership};
pub use shop::{Shop, ShopPatch, ShopProfile, ShopStatus};

/// Typed access to the fields of a stored hash.
pub(crate) struct Fields<'a>(pub &'a HashMap<String, String>);

impl Fields<'_> {
    pub fn string(&self, name: &str) -> String {
        self.0.get(name).cloned().unwrap_or_default()
    }

    pub fn optional(&self, name: &str) -> Option<String> {
        self.0.get(name).filter(|v| !v.is_empty()).cloned()
    }

    pub fn float(&self, name: &str) -> AppResult<Option<f64>> {
        self.optional(name)
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| AppError::Internal(format!("Field {name} is not a number: {v}")))
            })
            .transpose()
    }

    pub fn int(&self, name: &str) -> AppResult<i64> {
        self.optional(name).map_or(Ok(0), |v| {
            v.parse::<i64>()
                .map_err(|_| AppError::Internal(format!("Field {name} is not an integer: {v}")))
        })
    }

    pub fn flag(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(|v| v == "true")
    }

    pub fn list(&self, name: &str) -> AppResult<Vec<String>> {
        self.optional(name).map_or(Ok(Vec::new()), |v| {
            serde_json::from_str(&v)
                .map_err(|e| AppError::Internal(format!("Field {name} is not a JSON list: {e}")))
        })
    }

    pub fn timestamp(&self, name: &str) -> AppResult<DateTime<Utc>> {
        let raw = self.string(name);
        DateTime::parse_from_rfc3339(&raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| AppError::Internal(format!("Field {name} is not a timestamp: {e}")))
    }
}

pub(crate) fn encode_list(values: &[String]) -> String {
    serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string())
}

pub(crate) fn encode_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339()
}
