//! Common error types for Sluice.

use thiserror::Error;

/// Result type alias using Sluice's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Sluice operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A required resource or setting is unavailable before the core can run
    #[error("configuration error: {0}")]
    Config(String),

    /// Cryptographic operation failed
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Authentication failed
    #[error("authentication error: {0}")]
    Auth(String),
}

impl Error {
    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a crypto error from any displayable type.
    pub fn crypto(msg: impl std::fmt::Display) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Create an auth error from any displayable type.
    pub fn auth(msg: impl std::fmt::Display) -> Self {
        Self::Auth(msg.to_string())
    }

    /// Whether the current run can continue after this error.
    ///
    /// Only authentication failures are expected outcomes; everything else
    /// is fatal for the run that produced it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_auth_is_recoverable() {
        assert!(Error::auth("bad tag").is_recoverable());
        assert!(!Error::crypto("bad length").is_recoverable());
        assert!(!Error::config("bad context").is_recoverable());
    }

    #[test]
    fn test_display_prefixes() {
        assert_eq!(
            Error::config("missing").to_string(),
            "configuration error: missing"
        );
        assert_eq!(Error::auth("tag").to_string(), "authentication error: tag");
    }
}
