//! Business logic services.

#![allow(missing_docs)]

pub mod community;
pub mod geo;
pub mod index;
pub mod membership;
pub mod metadata;
pub mod query;
pub mod ranking;
pub mod shop;

pub use community::CommunityService;
pub use geo::{GeoService, RadiusQuery};
pub use membership::{
    JoinOptions, JoinTarget, MemberDetail, MembershipService, ShopMembership, StandingUpdate,
};
pub use metadata::{CommunityMetadata, FacetCount, MetadataService};
pub use query::{MemberFilter, MemberView, Page, Paging, QueryService};
pub use ranking::{LeaderboardEntry, LikeOutcome, RankType, RankingService};
pub use shop::ShopService;
