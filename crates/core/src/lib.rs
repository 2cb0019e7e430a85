//! Core business logic for icom-rs.
//!
//! Services here keep a community's derived data (index sets, facet
//! counters, geo positions and leaderboards) in step with its members.
//! [`Engine`] wires them to one store.

pub mod engine;
pub mod services;

pub use engine::Engine;
pub use services::*;
