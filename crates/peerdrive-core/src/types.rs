//! Strong type definitions for peerdrive.
//!
//! All identifiers are newtypes to prevent misuse at compile time. Most of
//! them are opaque 16-byte values generated at random; [`IdentityId`] is a
//! normalized domain name.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 16]);

        impl $name {
            /// Create from raw bytes.
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            /// Generate a new random id.
            pub fn random() -> Self {
                Self(rand::thread_rng().gen())
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }

            /// Convert to hex string.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse from hex string.
            pub fn from_hex(s: &str) -> Result<Self, CoreError> {
                let bytes = hex::decode(s)?;
                let arr: [u8; 16] = bytes.as_slice().try_into().map_err(|_| {
                    CoreError::InvalidLength {
                        expected: 16,
                        actual: bytes.len(),
                    }
                })?;
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), &self.to_hex()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_hex(s)
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }
        }
    };
}

opaque_id!(
    /// Internal identifier of a drive on one tenant.
    DriveId
);
opaque_id!(
    /// Public alias of a drive. Together with [`DriveType`] it forms a [`TargetDrive`].
    DriveAlias
);
opaque_id!(
    /// Public type of a drive (feed, chat, channel...).
    DriveType
);
opaque_id!(
    /// Identifier of a file within a drive.
    FileId
);
opaque_id!(
    /// Identifier shared by every copy of a file across identities.
    GlobalTransitId
);
opaque_id!(
    /// Opaque handle of an in-flight perimeter upload.
    SessionId
);
opaque_id!(
    /// Identifier of an access registration (and its client token).
    RegistrationId
);
opaque_id!(
    /// Identifier of a queued inbox or outbox item.
    ItemId
);

/// Publicly addressable drive: an (alias, type) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetDrive {
    pub alias: DriveAlias,
    pub drive_type: DriveType,
}

impl TargetDrive {
    pub const fn new(alias: DriveAlias, drive_type: DriveType) -> Self {
        Self { alias, drive_type }
    }

    /// A target drive with random alias and type.
    pub fn random() -> Self {
        Self::new(DriveAlias::random(), DriveType::random())
    }
}

impl fmt::Display for TargetDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.alias, self.drive_type)
    }
}

/// Identity of a tenant: a lower-cased domain name such as `frodo.example.com`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityId(String);

impl IdentityId {
    /// Parse and normalize a domain name.
    pub fn new(domain: &str) -> Result<Self, CoreError> {
        let normalized = domain.trim().trim_end_matches('.').to_ascii_lowercase();
        validate_domain(&normalized)?;
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_domain(domain: &str) -> Result<(), CoreError> {
    let invalid = |reason: &str| CoreError::InvalidIdentity(format!("{domain:?}: {reason}"));

    if domain.is_empty() || domain.len() > 253 {
        return Err(invalid("length out of range"));
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid("expected at least two labels"));
    }
    for label in labels {
        if label.is_empty() || label.len() > 63 {
            return Err(invalid("label length out of range"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(invalid("label cannot start or end with '-'"));
        }
        if !label
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(invalid("invalid character"));
        }
    }
    Ok(())
}

impl fmt::Debug for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityId({})", self.0)
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IdentityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for IdentityId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<IdentityId> for String {
    fn from(id: IdentityId) -> Self {
        id.0
    }
}

/// Storage flavor of a file.
///
/// A closed set: the transit layer attaches write rules to each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum FileSystemType {
    Standard = 0,
    Comment = 1,
}

/// What an inbox item asks the receiver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransferInstructionType {
    SaveFile = 1,
    DeleteLinkedFile = 2,
    ReadReceipt = 3,
}

/// A file reference scoped to a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InternalDriveFileId {
    pub drive_id: DriveId,
    pub file_id: FileId,
}

/// Current time as Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
