//! Error types for the insights engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, InsightsError>;

/// Engine-wide error taxonomy.
///
/// Provider errors are absorbed inside the detectors (they trigger the
/// rule-based fallback) and only reach callers from operations that have
/// no fallback, such as an explicit connection test.
#[derive(Error, Debug)]
pub enum InsightsError {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Missing or malformed request fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested config/override/record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The feature is disabled for this survey, or no config resolves
    #[error("Feature not enabled: {0}")]
    FeatureDisabled(String),

    /// Provider connection, timeout or malformed-prediction failure
    #[error("Provider error: {0}")]
    Provider(String),

    /// Bad or conflicting configuration rows
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InsightsError {
    pub fn validation(msg: impl Into<String>) -> Self {
        InsightsError::Validation(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        InsightsError::Provider(msg.into())
    }
}
