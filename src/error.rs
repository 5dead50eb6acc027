//! Error types for notify-hub

use thiserror::Error;

/// Errors that can occur in the notification hub
#[derive(Debug, Error)]
pub enum HubError {
    /// Absent or malformed argument, malformed event, missing schema marker
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown subscriber, or unknown poll subscriber on a feed
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate subscription to the same feed by the same subscriber
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal consistency failure (never caused by caller input alone)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persistence collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl HubError {
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, HubError::InvalidInput(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, HubError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, HubError::Conflict(_))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, HubError::InvariantViolation(_))
    }
}

/// Result type alias for hub operations
pub type Result<T> = std::result::Result<T, HubError>;
