//! Error types for the permissions module.

use peerdrive_core::{ClientErrorCode, CoreError, ErrorKind};
use thiserror::Error;

/// Errors that can occur during permission operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// Authorization failure: revoked grant or registration, missing drive
    /// permission, bad token half.
    #[error("security error: {0}")]
    Security(String),

    /// Invalid request from the caller.
    #[error("client error {code}: {message}")]
    Client {
        code: ClientErrorCode,
        message: String,
    },

    /// Drive lookup failed inside a collaborator.
    #[error("drive manager error: {0}")]
    DriveManager(String),

    /// Core primitive error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl PermsError {
    pub fn security(message: impl Into<String>) -> Self {
        PermsError::Security(message.into())
    }

    pub fn client(code: ClientErrorCode, message: impl Into<String>) -> Self {
        PermsError::Client {
            code,
            message: message.into(),
        }
    }

    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PermsError::Security(_) => ErrorKind::Security,
            PermsError::Client { .. } => ErrorKind::Client,
            PermsError::DriveManager(_) => ErrorKind::System,
            PermsError::Core(e) => e.kind(),
        }
    }

    /// Client error code, if this is a client error.
    pub fn client_code(&self) -> Option<ClientErrorCode> {
        match self {
            PermsError::Client { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
