//! Error types for peerdrive core.
//!
//! Besides [`CoreError`], this module defines the cross-crate error taxonomy
//! ([`ErrorKind`]) and the machine-readable [`ClientErrorCode`] that every
//! higher-level error maps onto.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How an error should be surfaced to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Authorization failure. Never retried automatically.
    Security,
    /// Bad request from the caller. Surfaced with a [`ClientErrorCode`].
    Client,
    /// Internal failure. Logged, not exposed verbatim.
    System,
}

/// Machine-readable codes attached to client errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum ClientErrorCode {
    InvalidDrive = 1001,
    DuplicateDriveGrant = 1002,
    InvalidInstructionSet = 1003,
    InvalidMetadata = 1004,
    MissingUploadData = 1005,
    NotAllPayloadsReceived = 1006,
    InvalidGlobalTransitId = 1007,
    InvalidTransferType = 1008,
    DuplicateRegistration = 1009,
    InvalidIdentity = 1010,
    InvalidToken = 1011,
    PayloadTooLarge = 1012,
}

impl ClientErrorCode {
    /// Numeric wire value.
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl fmt::Display for ClientErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u16())
    }
}

/// Errors from the core primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    /// The supplied key does not match the key-check hash stored with the
    /// ciphertext or split.
    #[error("key mismatch")]
    KeyMismatch,
}

impl CoreError {
    /// Taxonomy bucket for this error.
    ///
    /// Key mismatches and failed decryption mean the caller presented the
    /// wrong secret, so they are authorization failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::KeyMismatch | CoreError::DecryptionFailed => ErrorKind::Security,
            CoreError::InvalidLength { .. }
            | CoreError::InvalidHex(_)
            | CoreError::InvalidIdentity(_) => ErrorKind::Client,
            CoreError::EncryptionFailed => ErrorKind::System,
        }
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_errors_are_security() {
        assert_eq!(CoreError::KeyMismatch.kind(), ErrorKind::Security);
        assert_eq!(CoreError::DecryptionFailed.kind(), ErrorKind::Security);
        assert_eq!(
            CoreError::InvalidIdentity("x".into()).kind(),
            ErrorKind::Client
        );
    }

    #[test]
    fn test_client_code_display() {
        assert_eq!(
            ClientErrorCode::NotAllPayloadsReceived.to_string(),
            "NotAllPayloadsReceived(1006)"
        );
    }
}
