//! Store error types

use thiserror::Error;

/// Registry-related errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The registry refused the publish
    #[error("Registry rejected publish: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Payload could not be assembled
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Whether the registry answered and refused, as opposed to a transport failure
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::AuthenticationFailed(_))
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_classification() {
        let rejected = StoreError::Rejected {
            status: 403,
            message: "cannot publish over previously published version".to_string(),
        };
        assert!(rejected.is_rejection());
        assert!(StoreError::AuthenticationFailed("no token".to_string()).is_rejection());
        assert!(!StoreError::Other("boom".to_string()).is_rejection());
    }

    #[test]
    fn test_rejected_display() {
        let err = StoreError::Rejected {
            status: 409,
            message: "conflict".to_string(),
        };
        assert_eq!(err.to_string(), "Registry rejected publish: 409 - conflict");
    }
}
