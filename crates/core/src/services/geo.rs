//! Geo index maintenance and radius queries.

use std::sync::Arc;

use icom_common::{AppError, AppResult};
use icom_db::entities::ShopProfile;
use icom_db::store::{GEO_LAT_MAX, GEO_LAT_MIN};
use icom_db::{Batch, GeoMatch, GeoPoint, GeoUnit, KvStore, keys};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Stage indexing a shop's position. Shops without both coordinates are
/// skipped.
pub fn stage_add(batch: &mut Batch, community_id: &str, shop_id: &str, profile: &ShopProfile) {
    if let Some(point) = profile.location().filter(GeoPoint::is_indexable) {
        batch.geoadd(keys::geo(community_id), shop_id, point);
    }
}

/// Stage removing a shop's position.
pub fn stage_remove(batch: &mut Batch, community_id: &str, shop_id: &str) {
    batch.zrem(keys::geo(community_id), shop_id);
}

/// Stage moving a shop's position after a profile change.
pub fn stage_change(
    batch: &mut Batch,
    community_id: &str,
    shop_id: &str,
    old: &ShopProfile,
    new: &ShopProfile,
) {
    if old.location() == new.location() {
        return;
    }
    stage_remove(batch, community_id, shop_id);
    stage_add(batch, community_id, shop_id, new);
}

/// Radius query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius: f64,
    /// `m`, `km`, `mi` or `ft`; empty means `km`.
    #[serde(default)]
    pub unit: String,
}

impl RadiusQuery {
    /// Query in kilometers.
    #[must_use]
    pub fn km(lat: f64, lng: f64, radius: f64) -> Self {
        Self {
            lat,
            lng,
            radius,
            unit: String::new(),
        }
    }

    /// Check the parameters and resolve the unit.
    pub fn validate(&self) -> AppResult<(GeoPoint, GeoUnit)> {
        if !self.lat.is_finite() || !(GEO_LAT_MIN..=GEO_LAT_MAX).contains(&self.lat) {
            return Err(AppError::Validation(format!(
                "Latitude out of range: {}",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(AppError::Validation(format!(
                "Longitude out of range: {}",
                self.lng
            )));
        }
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err(AppError::Validation(format!(
                "Invalid radius: {}",
                self.radius
            )));
        }
        let unit = self.unit.parse::<GeoUnit>()?;
        Ok((GeoPoint::new(self.lat, self.lng), unit))
    }
}

/// Radius queries over a community's geo index.
#[derive(Clone)]
pub struct GeoService {
    store: Arc<dyn KvStore>,
}

impl GeoService {
    /// Create a new geo service.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Shops within the radius, nearest first, equal distances by shop ID.
    pub async fn nearby(&self, community_id: &str, query: &RadiusQuery) -> AppResult<Vec<GeoMatch>> {
        let (center, unit) = query.validate()?;
        let mut hits = self
            .store
            .geo_radius(&keys::geo(community_id), center, query.radius, unit)
            .await?;
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.member.cmp(&b.member))
        });
        debug!(
            community_id = %community_id,
            radius = query.radius,
            unit = %unit,
            hits = hits.len(),
            "Radius query"
        );
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icom_db::MemoryStore;

    fn at(lat: f64, lng: f64) -> ShopProfile {
        ShopProfile {
            lat: Some(lat),
            lng: Some(lng),
            ..ShopProfile::named("x")
        }
    }

    #[test]
    fn test_validation() {
        assert!(RadiusQuery::km(10.0, 106.0, 1.0).validate().is_ok());
        assert!(RadiusQuery::km(85.1, 106.0, 1.0).validate().is_err());
        assert!(RadiusQuery::km(10.0, 180.5, 1.0).validate().is_err());
        assert!(RadiusQuery::km(10.0, 106.0, -1.0).validate().is_err());
        assert!(RadiusQuery::km(10.0, 106.0, f64::NAN).validate().is_err());

        let mut bad_unit = RadiusQuery::km(10.0, 106.0, 1.0);
        bad_unit.unit = "yd".to_string();
        assert!(matches!(bad_unit.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_shops_without_coordinates_are_skipped() {
        let mut batch = Batch::new();
        stage_add(&mut batch, "c1", "s1", &ShopProfile::named("x"));
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_nearby_orders_by_distance_then_id() {
        let store = Arc::new(MemoryStore::new());
        let service = GeoService::new(store.clone());

        let mut batch = Batch::new();
        stage_add(&mut batch, "c1", "s3", &at(10.01, 106.0));
        stage_add(&mut batch, "c1", "s2", &at(10.0, 106.0));
        stage_add(&mut batch, "c1", "s1", &at(10.0, 106.0));
        store.exec(batch).await.unwrap();

        let hits = service
            .nearby("c1", &RadiusQuery::km(10.0, 106.0, 5.0))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.member.as_str()).collect();
        assert_eq!(ids, vec!["s1", "s2", "s3"]);
    }

    #[tokio::test]
    async fn test_change_moves_point() {
        let store = Arc::new(MemoryStore::new());
        let service = GeoService::new(store.clone());

        let mut batch = Batch::new();
        stage_add(&mut batch, "c1", "s1", &at(10.0, 106.0));
        stage_change(&mut batch, "c1", "s1", &at(10.0, 106.0), &at(21.0, 105.8));
        store.exec(batch).await.unwrap();

        let near_old = service
            .nearby("c1", &RadiusQuery::km(10.0, 106.0, 1.0))
            .await
            .unwrap();
        assert!(near_old.is_empty());
        let near_new = service
            .nearby("c1", &RadiusQuery::km(21.0, 105.8, 1.0))
            .await
            .unwrap();
        assert_eq!(near_new.len(), 1);
    }
}
