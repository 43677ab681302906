//! Error types for peer transit.

use peerdrive_core::{ClientErrorCode, CoreError, ErrorKind, SessionId};
use peerdrive_perms::PermsError;
use peerdrive_store::StoreError;
use thiserror::Error;

/// Errors that can occur while receiving, routing, or delivering transfers.
#[derive(Debug, Error)]
pub enum TransitError {
    /// The caller is not allowed to do this.
    #[error("security error: {0}")]
    Security(String),

    /// Malformed or incomplete request.
    #[error("client error {code}: {message}")]
    Client {
        code: ClientErrorCode,
        message: String,
    },

    /// Finalize or part upload for a session that does not exist.
    #[error("no perimeter session {0}")]
    SessionNotFound(SessionId),

    /// Impossible internal state.
    #[error("system error: {0}")]
    System(String),

    /// Delivery to a peer failed before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    /// Wire or temp-file encoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Perms(#[from] PermsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl TransitError {
    pub fn security(message: impl Into<String>) -> Self {
        TransitError::Security(message.into())
    }

    pub fn client(code: ClientErrorCode, message: impl Into<String>) -> Self {
        TransitError::Client {
            code,
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        TransitError::System(message.into())
    }

    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransitError::Security(_) => ErrorKind::Security,
            TransitError::Client { .. } => ErrorKind::Client,
            TransitError::SessionNotFound(_)
            | TransitError::System(_)
            | TransitError::Transport(_)
            | TransitError::Serialization(_) => ErrorKind::System,
            TransitError::Perms(e) => e.kind(),
            TransitError::Store(e) => e.kind(),
            TransitError::Core(e) => e.kind(),
        }
    }

    pub fn client_code(&self) -> Option<ClientErrorCode> {
        match self {
            TransitError::Client { code, .. } => Some(*code),
            TransitError::Perms(e) => e.client_code(),
            _ => None,
        }
    }

    pub fn is_security(&self) -> bool {
        self.kind() == ErrorKind::Security
    }
}

/// Result type for transit operations.
pub type Result<T> = std::result::Result<T, TransitError>;
