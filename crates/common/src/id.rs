//! ID generation utilities.

use crate::config::EngineConfig;

/// Minimum width of the counter part of a generated ID.
const COUNTER_WIDTH: usize = 6;

/// Entity kinds that receive sequential IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Standalone shop profile.
    Shop,
    /// Community shops may join.
    Community,
}

impl EntityKind {
    /// Store key of the atomic counter backing this kind.
    #[must_use]
    pub const fn counter_key(self) -> &'static str {
        match self {
            Self::Shop => "ishop:id:counter",
            Self::Community => "icom:id:counter",
        }
    }
}

/// ID generator for entities.
///
/// The counter itself lives in the backing store; this type only turns a
/// counter value into the public ID string.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    shop_prefix: String,
    community_prefix: String,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl IdGenerator {
    /// Create a new ID generator with the configured prefixes.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            shop_prefix: config.shop_id_prefix.clone(),
            community_prefix: config.community_id_prefix.clone(),
        }
    }

    /// Format a counter value as an ID of the given kind.
    ///
    /// The counter is zero-padded so that lexicographic ID order matches
    /// creation order.
    #[must_use]
    pub fn format(&self, kind: EntityKind, counter: i64) -> String {
        let prefix = match kind {
            EntityKind::Shop => &self.shop_prefix,
            EntityKind::Community => &self.community_prefix,
        };
        format!("{prefix}{counter:0COUNTER_WIDTH$}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_pads_counter() {
        let id_gen = IdGenerator::default();
        assert_eq!(id_gen.format(EntityKind::Shop, 7), "100010010000007");
        assert_eq!(id_gen.format(EntityKind::Community, 12), "200010010000012");
    }

    #[test]
    fn test_lexicographic_order_matches_counter_order() {
        let id_gen = IdGenerator::default();
        let a = id_gen.format(EntityKind::Shop, 9);
        let b = id_gen.format(EntityKind::Shop, 10);
        let c = id_gen.format(EntityKind::Shop, 123_456);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_counter_keys_are_distinct() {
        assert_ne!(
            EntityKind::Shop.counter_key(),
            EntityKind::Community.counter_key()
        );
    }
}
