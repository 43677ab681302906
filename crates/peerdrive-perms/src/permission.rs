//! Drive permission flags and tenant-wide permission keys.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::BitOr;

/// Rights on a single drive, as bit flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DrivePermission(u32);

impl DrivePermission {
    pub const NONE: Self = Self(0);
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
    pub const REACT: Self = Self(4);
    pub const COMMENT: Self = Self(8);

    pub const READ_WRITE: Self = Self(Self::READ.0 | Self::WRITE.0);
    pub const WRITE_REACTIONS_AND_COMMENTS: Self = Self(Self::REACT.0 | Self::COMMENT.0);
    pub const ALL: Self = Self(Self::READ.0 | Self::WRITE.0 | Self::REACT.0 | Self::COMMENT.0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// True when every flag in `other` is also set here.
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when at least one flag in `other` is set here.
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for DrivePermission {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for DrivePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("DrivePermission(None)");
        }
        let names: Vec<&str> = [
            (Self::READ, "Read"),
            (Self::WRITE, "Write"),
            (Self::REACT, "React"),
            (Self::COMMENT, "Comment"),
        ]
        .iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "DrivePermission({})", names.join("|"))
    }
}

/// A tenant-wide capability that is not tied to a drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PermissionKey(pub u32);

impl PermissionKey {
    pub const READ_CONNECTIONS: Self = Self(10);
    pub const READ_CONNECTION_REQUESTS: Self = Self(30);
    pub const READ_CIRCLE_MEMBERSHIP: Self = Self(50);
    pub const READ_WHO_I_FOLLOW: Self = Self(80);
    pub const READ_MY_FOLLOWERS: Self = Self(130);
    pub const MANAGE_FEED: Self = Self(150);
    pub const SEND_DATA_TO_OTHER_IDENTITIES_ON_MY_BEHALF: Self = Self(210);
    pub const RECEIVE_DATA_FROM_OTHER_IDENTITIES_ON_MY_BEHALF: Self = Self(305);
    pub const SEND_PUSH_NOTIFICATIONS: Self = Self(405);
    pub const PUBLISH_STATIC_CONTENT: Self = Self(505);
    pub const USE_TRANSIT_READ: Self = Self(901);
    pub const USE_TRANSIT_WRITE: Self = Self(902);
}

/// An unordered set of permission keys.
///
/// Immutable once attached to a grant; build a new set instead of mutating.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PermissionSet {
    keys: BTreeSet<PermissionKey>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: PermissionKey) -> bool {
        self.keys.contains(&key)
    }

    /// Union of two sets.
    pub fn merge(&self, other: &PermissionSet) -> PermissionSet {
        PermissionSet {
            keys: self.keys.union(&other.keys).copied().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionKey> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<PermissionKey> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PermissionKey>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}
