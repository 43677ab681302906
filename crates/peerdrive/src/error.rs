//! Error types for the tenant facade.

use peerdrive_core::{CoreError, ErrorKind, IdentityId};
use peerdrive_perms::PermsError;
use peerdrive_store::StoreError;
use peerdrive_transit::TransitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    #[error("queue error: {0}")]
    Store(#[from] StoreError),

    #[error("transit error: {0}")]
    Transit(#[from] TransitError),

    /// No connection has been issued to or accepted from this identity.
    #[error("not connected: {0}")]
    NotConnected(IdentityId),

    /// A file to send is inconsistent with itself.
    #[error("invalid outgoing file: {0}")]
    InvalidFile(String),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TenantError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TenantError::Core(e) => e.kind(),
            TenantError::Permission(e) => e.kind(),
            TenantError::Store(e) => e.kind(),
            TenantError::Transit(e) => e.kind(),
            TenantError::NotConnected(_) => ErrorKind::Security,
            TenantError::InvalidFile(_) => ErrorKind::Client,
            TenantError::Config(_) | TenantError::Io(_) => ErrorKind::System,
        }
    }
}

/// Result type for tenant operations.
pub type Result<T> = std::result::Result<T, TenantError>;
