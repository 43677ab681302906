//! Key wrapping and two-party key splitting.
//!
//! [`EncryptedKey`] wraps a key (or any small secret) under a key-encryption
//! key with ChaCha20-Poly1305. [`XorSplitKey`] splits a key into a server
//! half and a client half so that neither side alone can recover it.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::secret::{SensitiveBytes, SymmetricKey, KEY_LEN};

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_LEN: usize = 12;

/// A secret encrypted under a key-encryption key.
///
/// Stores a key-check hash of the wrapping key so a wrong key is reported as
/// [`CoreError::KeyMismatch`] rather than a generic decryption failure.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedKey {
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
    key_check: [u8; 16],
}

impl EncryptedKey {
    /// Wrap `key` under `kek`.
    pub fn wrap(kek: &SymmetricKey, key: &SymmetricKey) -> Result<Self> {
        Self::seal(kek, key.as_bytes())
    }

    /// Encrypt arbitrary secret bytes under `kek`.
    pub fn seal(kek: &SymmetricKey, plaintext: &[u8]) -> Result<Self> {
        let cipher = ChaCha20Poly1305::new_from_slice(kek.as_bytes())
            .map_err(|_| CoreError::EncryptionFailed)?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CoreError::EncryptionFailed)?;

        Ok(Self {
            nonce,
            ciphertext,
            key_check: kek.key_check(),
        })
    }

    /// Unwrap a key previously produced by [`wrap`](Self::wrap).
    pub fn unwrap(&self, kek: &SymmetricKey) -> Result<SymmetricKey> {
        self.open(kek)?.to_key()
    }

    /// Decrypt the secret bytes.
    pub fn open(&self, kek: &SymmetricKey) -> Result<SensitiveBytes> {
        if kek.key_check() != self.key_check {
            return Err(CoreError::KeyMismatch);
        }

        let cipher = ChaCha20Poly1305::new_from_slice(kek.as_bytes())
            .map_err(|_| CoreError::DecryptionFailed)?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .map_err(|_| CoreError::DecryptionFailed)?;

        Ok(SensitiveBytes::new(plaintext))
    }

    /// Whether `kek` is the key this secret was wrapped under.
    pub fn matches(&self, kek: &SymmetricKey) -> bool {
        kek.key_check() == self.key_check
    }
}

impl fmt::Debug for EncryptedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptedKey({} bytes)", self.ciphertext.len())
    }
}

/// The server-held half of a key split between two parties.
///
/// `masked = secret XOR client_half`. The client keeps `client_half`; only
/// combining both reproduces the secret, and the key-check hash tells whether
/// the combination is correct.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XorSplitKey {
    masked: [u8; KEY_LEN],
    key_check: [u8; 16],
}

impl XorSplitKey {
    /// Split `secret`, returning the server half and a fresh client half.
    pub fn split(secret: &SymmetricKey) -> (Self, SymmetricKey) {
        let client_half = SymmetricKey::generate();
        let masked = secret.xor(client_half.as_bytes());
        let server = Self {
            masked: *masked.as_bytes(),
            key_check: secret.key_check(),
        };
        (server, client_half)
    }

    /// Generate a new secret and split it.
    ///
    /// Returns `(server_half, secret, client_half)`.
    pub fn create() -> (Self, SymmetricKey, SymmetricKey) {
        let secret = SymmetricKey::generate();
        let (server, client_half) = Self::split(&secret);
        (server, secret, client_half)
    }

    /// Recombine with the client half.
    pub fn combine(&self, client_half: &SymmetricKey) -> Result<SymmetricKey> {
        let secret = client_half.xor(&self.masked);
        if secret.key_check() != self.key_check {
            return Err(CoreError::KeyMismatch);
        }
        Ok(secret)
    }
}

impl fmt::Debug for XorSplitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("XorSplitKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_unwrap() {
        let kek = SymmetricKey::generate();
        let key = SymmetricKey::generate();
        let wrapped = EncryptedKey::wrap(&kek, &key).unwrap();
        assert_eq!(wrapped.unwrap(&kek).unwrap(), key);
    }

    #[test]
    fn test_unwrap_wrong_key() {
        let kek = SymmetricKey::generate();
        let other = SymmetricKey::generate();
        let wrapped = EncryptedKey::wrap(&kek, &SymmetricKey::generate()).unwrap();
        assert!(matches!(wrapped.unwrap(&other), Err(CoreError::KeyMismatch)));
        assert!(!wrapped.matches(&other));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let kek = SymmetricKey::generate();
        let mut wrapped = EncryptedKey::seal(&kek, b"shared secret").unwrap();
        wrapped.ciphertext[0] ^= 0x01;
        assert!(matches!(wrapped.open(&kek), Err(CoreError::DecryptionFailed)));
    }

    #[test]
    fn test_seal_open_bytes() {
        let kek = SymmetricKey::generate();
        let sealed = EncryptedKey::seal(&kek, b"key header").unwrap();
        assert_eq!(sealed.open(&kek).unwrap().as_slice(), b"key header");
        // Not a 32-byte key.
        assert!(sealed.unwrap(&kek).is_err());
    }

    #[test]
    fn test_split_combine() {
        let (server, secret, half) = XorSplitKey::create();
        assert_eq!(server.combine(&half).unwrap(), secret);
    }

    #[test]
    fn test_split_wrong_half() {
        let (server, _secret, _half) = XorSplitKey::create();
        let wrong = SymmetricKey::generate();
        assert!(matches!(server.combine(&wrong), Err(CoreError::KeyMismatch)));
    }

    #[test]
    fn test_server_half_alone_is_not_secret() {
        let secret = SymmetricKey::generate();
        let (server, _half) = XorSplitKey::split(&secret);
        assert_ne!(&server.masked, secret.as_bytes());
    }

    proptest::proptest! {
        #[test]
        fn test_seal_open_any_bytes(bytes in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..256)) {
            let kek = SymmetricKey::generate();
            let sealed = EncryptedKey::seal(&kek, &bytes).unwrap();
            let opened = sealed.open(&kek).unwrap();
            proptest::prop_assert_eq!(opened.as_slice(), bytes.as_slice());
        }

        #[test]
        fn test_split_any_secret(raw in proptest::prelude::any::<[u8; 32]>()) {
            let secret = SymmetricKey::from_bytes(raw);
            let (server, half) = XorSplitKey::split(&secret);
            proptest::prop_assert_eq!(server.combine(&half).unwrap(), secret);
        }
    }
}
