//! Repositories over the backing store.
//!
//! Reads run directly against the store. Writes are staged into a caller's
//! [`Batch`](crate::store::Batch) so that services can commit a whole
//! membership change atomically.

pub mod community;
pub mod membership;
pub mod shop;

pub use community::CommunityRepository;
pub use membership::{MembershipLinks, MembershipRepository};
pub use shop::ShopRepository;
