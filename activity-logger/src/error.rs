//! Error types for the activity logger.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the activity logger.
///
/// None of these escape the fire-and-forget operations on
/// [`ActivityLogger`](crate::ActivityLogger); they are reported through
/// `tracing` instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport failed before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// Backend answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session bootstrap or lifecycle error
    #[error("Session error: {0}")]
    Session(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

impl Error {
    /// Whether a dispatch that failed with this error may be attempted again.
    ///
    /// Client errors (4xx) are terminal for the batch that caused them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network(_) => true,
            Error::Http { status, .. } => !is_client_error(*status),
            _ => false,
        }
    }
}

/// 400..=499
pub fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::Network("connection reset".to_string()).is_retryable());
        assert!(Error::Http { status: 503, body: String::new() }.is_retryable());
        assert!(!Error::Http { status: 401, body: String::new() }.is_retryable());
        assert!(!Error::Config("missing base url".to_string()).is_retryable());
    }
}
