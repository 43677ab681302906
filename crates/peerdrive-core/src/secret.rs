//! Scoped secret buffers.
//!
//! Every decrypted key in peerdrive lives in one of these types. They wipe
//! their memory when dropped, so no exit path (early return, `?`, panic
//! unwinding) can leave plaintext key material behind.

use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CoreError;

/// Length of every symmetric key in the hierarchy.
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key that is zeroed on drop.
///
/// Deliberately not `Clone`: copies must be made with [`duplicate`](Self::duplicate)
/// so each one is visible at the call site.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Take ownership of raw key bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice; the slice itself is not wiped.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CoreError::InvalidLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Make an independent copy that is wiped on its own drop.
    pub fn duplicate(&self) -> Self {
        Self(self.0)
    }

    /// Short hash used to detect a wrong key before attempting decryption.
    pub fn key_check(&self) -> [u8; 16] {
        let full = blake3::derive_key("peerdrive 2024 key-check", &self.0);
        let mut check = [0u8; 16];
        check.copy_from_slice(&full[..16]);
        check
    }

    /// XOR with another key into a new key.
    pub(crate) fn xor(&self, other: &[u8; KEY_LEN]) -> Self {
        let mut out = [0u8; KEY_LEN];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.0[i] ^ other[i];
        }
        Self(out)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        // Constant time over the full key.
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for SymmetricKey {}

/// A variable-length secret buffer that is zeroed on drop.
#[derive(Clone, Default)]
pub struct SensitiveBytes(Zeroizing<Vec<u8>>);

impl SensitiveBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reinterpret the buffer as a symmetric key.
    pub fn to_key(&self) -> Result<SymmetricKey, CoreError> {
        SymmetricKey::from_slice(&self.0)
    }
}

impl From<Vec<u8>> for SensitiveBytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl fmt::Debug for SensitiveBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SensitiveBytes(<{} bytes redacted>)", self.0.len())
    }
}
