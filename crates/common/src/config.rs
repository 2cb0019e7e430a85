//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
}

/// Membership engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Rolling expiry of a shop's like-dedup set, in seconds.
    #[serde(default = "default_like_ttl_secs")]
    pub like_dedup_ttl_secs: i64,
    /// Page size used when a caller passes a limit below 1.
    #[serde(default = "default_page_limit")]
    pub default_page_limit: usize,
    /// Largest page size a caller may request.
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: usize,
    /// Prefix of generated shop IDs.
    #[serde(default = "default_shop_id_prefix")]
    pub shop_id_prefix: String,
    /// Prefix of generated community IDs.
    #[serde(default = "default_community_id_prefix")]
    pub community_id_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            like_dedup_ttl_secs: default_like_ttl_secs(),
            default_page_limit: default_page_limit(),
            max_page_limit: default_max_page_limit(),
            shop_id_prefix: default_shop_id_prefix(),
            community_id_prefix: default_community_id_prefix(),
        }
    }
}

impl EngineConfig {
    /// Rolling expiry of the like-dedup set.
    #[must_use]
    pub const fn like_dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.like_dedup_ttl_secs.unsigned_abs())
    }
}

const fn default_like_ttl_secs() -> i64 {
    24 * 60 * 60
}

const fn default_page_limit() -> usize {
    20
}

const fn default_max_page_limit() -> usize {
    100
}

fn default_shop_id_prefix() -> String {
    "100010010".to_string()
}

fn default_community_id_prefix() -> String {
    "200010010".to_string()
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present, into the process environment)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `ICOM_ENV`)
    /// 4. Environment variables with `ICOM_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let _ = dotenvy::dotenv();
        let env = std::env::var("ICOM_ENV").unwrap_or_else(|_| "development".to_string());
        tracing::debug!(env = %env, "Loading configuration");

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("ICOM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ICOM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
