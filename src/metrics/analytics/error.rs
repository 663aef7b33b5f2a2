//! Analytics error types.

use thiserror::Error;

/// Errors that can occur while deriving a pipeline stage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    /// A required upstream table or row set is absent.
    #[error("missing dependency: {0}")]
    MissingDependency(String),
}

impl AnalyticsError {
    pub fn missing(name: impl Into<String>) -> Self {
        AnalyticsError::MissingDependency(name.into())
    }
}

/// Result type for analytics operations.
pub type AnalyticsResult<T> = Result<T, AnalyticsError>;
