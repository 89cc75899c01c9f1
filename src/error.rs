//! WolfCast Error Types

use thiserror::Error;

/// Result type alias for WolfCast operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfCast error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Group membership errors
    #[error("Membership error: cannot join group '{group}': {reason}")]
    Membership { group: String, reason: String },

    #[error("Transport error: {0}")]
    Transport(String),

    // Artifact source errors
    #[error("Credential expired while fetching {0}")]
    ExpiredCredential(String),

    #[error("Artifact source error: {0}")]
    Source(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    // Local storage errors
    #[error("Failed to persist artifact to {path}: {reason}")]
    Persistence { path: String, reason: String },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if a redelivery of the same notification may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExpiredCredential(_)
                | Error::Transport(_)
                | Error::Network(_)
                | Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
        )
    }

    /// Check if this error is fatal to process startup
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Membership { .. } | Error::Config(_) | Error::ConfigParse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::ExpiredCredential("s3://bucket/a.m3u8".into()).is_retryable());
        assert!(Error::Transport("channel closed".into()).is_retryable());
        assert!(!Error::Source("NoSuchKey".into()).is_retryable());

        let err = Error::Membership {
            group: "g".into(),
            reason: "unreachable".into(),
        };
        assert!(err.is_fatal());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("'g'"));
    }
}
