//! Error taxonomy for the marshalling core.

use thiserror::Error;

use crate::arena::ArenaError;

/// Errors produced by capability calls and the orchestrators built on them.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Buffer-level failure: capacity, stale handle, length mismatch.
    #[error("arena error: {0}")]
    Arena(#[from] ArenaError),

    /// A signature, ciphertext or handshake packet was rejected.
    ///
    /// Deliberately carries no detail: tampering, a wrong key and
    /// corruption are indistinguishable to the caller.
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("message id {attempted} is not greater than last used id {last}")]
    MsgIdNotIncreasing { attempted: u64, last: u64 },

    #[error("message id space exhausted")]
    MsgIdExhausted,

    #[error("replay detected: message id {0}")]
    Replay(u64),

    #[error("invalid handshake state: {0}")]
    HandshakeState(&'static str),

    #[error("invalid context: expected 8 bytes, got {0}")]
    InvalidContext(usize),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("invalid packet length: expected {expected} bytes, got {actual}")]
    InvalidPacket { expected: usize, actual: usize },

    /// The capability rejected the call itself (bad lengths, internal failure).
    #[error("capability error: {0}")]
    Capability(String),
}

impl CryptoError {
    pub(crate) fn capability(msg: impl std::fmt::Display) -> Self {
        Self::Capability(msg.to_string())
    }

    /// The expected, recoverable outcome under adversarial input.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::AuthenticationFailure)
    }

    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::Arena(ArenaError::CapacityExceeded { .. }))
    }
}

impl From<CryptoError> for sluice_common::Error {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::AuthenticationFailure => sluice_common::Error::auth(err),
            other => sluice_common::Error::crypto(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_stays_recoverable() {
        let err: sluice_common::Error = CryptoError::AuthenticationFailure.into();
        assert!(matches!(err, sluice_common::Error::Auth(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_capacity_error_is_fatal() {
        let err = CryptoError::from(ArenaError::CapacityExceeded {
            requested: 64,
            available: 8,
        });
        assert!(err.is_capacity_exceeded());
        assert!(!err.is_authentication_failure());

        let err: sluice_common::Error = err.into();
        assert!(matches!(err, sluice_common::Error::Crypto(_)));
        assert!(!err.is_recoverable());
    }
}
