//! Common utilities and shared types for icom-rs.
//!
//! This crate provides foundational components used across all icom-rs crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **ID Generation**: Prefixed sequential identifiers via [`IdGenerator`]
//! - **Text**: Diacritic-insensitive tokenization for name search
//!
//! # Example
//!
//! ```no_run
//! use icom_common::{AppResult, Config, EntityKind, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::from_config(&config.engine);
//!     let id = id_gen.format(EntityKind::Shop, 1);
//!     println!("Generated ID: {}", id);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod text;

pub use config::{Config, EngineConfig, RedisConfig};
pub use error::{AppError, AppResult};
pub use id::{EntityKind, IdGenerator};
