//! Error types for icom-rs.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
#[derive(Debug, Error)]
pub enum AppError {
    // === Client Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Shop not found: {0}")]
    ShopNotFound(String),

    #[error("Community not found: {0}")]
    CommunityNotFound(String),

    #[error("Membership not found: community {community_id}, shop {shop_id}")]
    MembershipNotFound {
        /// Community the lookup was scoped to.
        community_id: String,
        /// Shop that is not a member.
        shop_id: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // === Server Errors ===
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A cascading multi-batch operation stopped after `completed` of its steps.
    #[error("Partial failure after {completed} step(s) of {operation}: {cause}")]
    PartialFailure {
        /// Name of the cascading operation.
        operation: &'static str,
        /// Number of batches that committed before the failure.
        completed: usize,
        /// Underlying store failure.
        cause: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the error code exposed to callers.
    ///
    /// Partial failures are reported as `STORE_UNAVAILABLE`; the step detail only
    /// goes to the log.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::ShopNotFound(_) => "SHOP_NOT_FOUND",
            Self::CommunityNotFound(_) => "COMMUNITY_NOT_FOUND",
            Self::MembershipNotFound { .. } => "MEMBERSHIP_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::StoreUnavailable(_) | Self::PartialFailure { .. } => "STORE_UNAVAILABLE",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether the error is one of the not-found family.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::ShopNotFound(_)
                | Self::CommunityNotFound(_)
                | Self::MembershipNotFound { .. }
        )
    }

    /// Returns whether this error should be logged at error level.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_)
                | Self::PartialFailure { .. }
                | Self::Config(_)
                | Self::Internal(_)
        )
    }

    /// Shorthand for a missing membership.
    #[must_use]
    pub fn membership_not_found(community_id: &str, shop_id: &str) -> Self {
        Self::MembershipNotFound {
            community_id: community_id.to_string(),
            shop_id: shop_id.to_string(),
        }
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_surfaces_as_store_unavailable() {
        let err = AppError::PartialFailure {
            operation: "delete_shop",
            completed: 2,
            cause: "connection reset".to_string(),
        };
        assert_eq!(err.error_code(), "STORE_UNAVAILABLE");
        assert!(err.is_server_error());
        assert!(err.to_string().contains("2 step(s)"));
    }

    #[test]
    fn test_not_found_family() {
        assert!(AppError::ShopNotFound("1".to_string()).is_not_found());
        assert!(AppError::membership_not_found("c", "s").is_not_found());
        assert!(!AppError::Conflict("x".to_string()).is_not_found());
        assert!(!AppError::Validation("x".to_string()).is_server_error());
    }
}
