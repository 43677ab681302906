//! Wire types exchanged between identities.
//!
//! A transfer is an instruction set, a metadata record, and a set of parts.
//! Parts are streamed into temp storage one at a time under an extension
//! derived from their [`PartKind`].

use std::fmt;
use std::ops::BitOr;

use bytes::Bytes;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use peerdrive_core::{
    ClientErrorCode, CoreError, EncryptedKey, FileSystemType, GlobalTransitId, IdentityId,
    SymmetricKey, TargetDrive, TransferInstructionType, KEY_LEN,
};

use crate::error::{Result, TransitError};

/// Temp-file extension holding the encoded instruction set.
pub const INSTRUCTION_SET_EXTENSION: &str = "transferinstructionset";
/// Temp-file extension holding the encoded metadata.
pub const METADATA_EXTENSION: &str = "metadata";
/// Temp-file extension holding the sealed key header.
pub const KEY_HEADER_EXTENSION: &str = "transferkeyheader";

const MAX_PART_KEY_LEN: usize = 64;

// ─────────────────────────────────────────────────────────────────────────────
// Instruction set
// ─────────────────────────────────────────────────────────────────────────────

/// Which parts of a file the sender is providing.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SendContents(u8);

impl SendContents {
    pub const NONE: Self = Self(0);
    pub const HEADER: Self = Self(1);
    pub const PAYLOAD: Self = Self(2);
    pub const THUMBNAILS: Self = Self(4);
    pub const ALL: Self = Self(1 | 2 | 4);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SendContents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for SendContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::HEADER, "Header"),
            (Self::PAYLOAD, "Payload"),
            (Self::THUMBNAILS, "Thumbnails"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        write!(f, "SendContents({})", names.join("|"))
    }
}

/// Push notification requested by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppNotificationOptions {
    pub app_id: Option<String>,
    pub tag: Option<String>,
    pub silent: bool,
    /// Identities to notify. Empty means "notify the receiving identity".
    pub recipients: Vec<IdentityId>,
}

/// What the sender wants done with an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInstructionSet {
    pub target_drive: TargetDrive,
    pub file_system_type: FileSystemType,
    pub transfer_instruction_type: TransferInstructionType,
    pub contents_provided: SendContents,
    pub app_notification: Option<AppNotificationOptions>,
}

impl TransferInstructionSet {
    /// A plain file upload to `target_drive` with everything included.
    pub fn save_file(target_drive: TargetDrive, file_system_type: FileSystemType) -> Self {
        Self {
            target_drive,
            file_system_type,
            transfer_instruction_type: TransferInstructionType::SaveFile,
            contents_provided: SendContents::ALL,
            app_notification: None,
        }
    }

    pub fn with_notification(mut self, options: AppNotificationOptions) -> Self {
        self.app_notification = Some(options);
        self
    }

    /// Uploads always carry `SaveFile`; the other instruction types have
    /// their own entry points.
    pub fn validate(&self) -> Result<()> {
        if self.transfer_instruction_type != TransferInstructionType::SaveFile {
            return Err(TransitError::client(
                ClientErrorCode::InvalidTransferType,
                format!(
                    "uploads must use SaveFile, got {:?}",
                    self.transfer_instruction_type
                ),
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parts
// ─────────────────────────────────────────────────────────────────────────────

/// One section of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartKind {
    /// The file's key header sealed under the connection's shared secret.
    TransferKeyHeader,
    Metadata,
    Payload { key: String },
    Thumbnail { payload_key: String, thumbnail_key: String },
}

impl PartKind {
    pub fn payload(key: impl Into<String>) -> Self {
        PartKind::Payload { key: key.into() }
    }

    pub fn thumbnail(payload_key: impl Into<String>, thumbnail_key: impl Into<String>) -> Self {
        PartKind::Thumbnail {
            payload_key: payload_key.into(),
            thumbnail_key: thumbnail_key.into(),
        }
    }

    /// Stable temp-file extension for this part.
    pub fn extension(&self) -> String {
        match self {
            PartKind::TransferKeyHeader => KEY_HEADER_EXTENSION.to_string(),
            PartKind::Metadata => METADATA_EXTENSION.to_string(),
            PartKind::Payload { key } => payload_extension(key),
            PartKind::Thumbnail {
                payload_key,
                thumbnail_key,
            } => thumbnail_extension(payload_key, thumbnail_key),
        }
    }

    /// Payload and thumbnail keys must be short and extension-safe.
    pub fn validate(&self) -> Result<()> {
        match self {
            PartKind::TransferKeyHeader | PartKind::Metadata => Ok(()),
            PartKind::Payload { key } => validate_part_key(key),
            PartKind::Thumbnail {
                payload_key,
                thumbnail_key,
            } => {
                validate_part_key(payload_key)?;
                validate_part_key(thumbnail_key)
            }
        }
    }
}

pub fn payload_extension(key: &str) -> String {
    format!("payload.{}", key)
}

pub fn thumbnail_extension(payload_key: &str, thumbnail_key: &str) -> String {
    format!("thumb.{}.{}", payload_key, thumbnail_key)
}

fn validate_part_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key.len() <= MAX_PART_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(TransitError::client(
            ClientErrorCode::InvalidMetadata,
            format!("invalid payload key {:?}", key),
        ))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// A payload declared by the metadata, with its thumbnail keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    pub key: String,
    pub content_type: String,
    pub thumbnails: Vec<String>,
}

impl PayloadDescriptor {
    pub fn new(key: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            content_type: content_type.into(),
            thumbnails: Vec::new(),
        }
    }

    pub fn with_thumbnail(mut self, key: impl Into<String>) -> Self {
        self.thumbnails.push(key.into());
        self
    }
}

/// Descriptive record of a transferred file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Sender-assigned id shared by every copy of the file across identities.
    pub global_transit_id: Option<GlobalTransitId>,
    pub is_encrypted: bool,
    pub file_type: u32,
    pub content: Option<String>,
    pub payloads: Vec<PayloadDescriptor>,
    /// The file a comment is attached to.
    pub referenced_file: Option<GlobalTransitId>,
}

impl FileMetadata {
    /// Every temp extension the metadata says should have been uploaded.
    pub fn expected_extensions(&self, contents: SendContents) -> Vec<String> {
        let mut expected = Vec::new();
        for payload in &self.payloads {
            if contents.contains(SendContents::PAYLOAD) {
                expected.push(payload_extension(&payload.key));
            }
            if contents.contains(SendContents::THUMBNAILS) {
                expected.extend(
                    payload
                        .thumbnails
                        .iter()
                        .map(|thumb| thumbnail_extension(&payload.key, thumb)),
                );
            }
        }
        expected
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Key header
// ─────────────────────────────────────────────────────────────────────────────

const IV_LEN: usize = 16;

/// Per-file content key and iv.
pub struct KeyHeader {
    pub iv: [u8; IV_LEN],
    pub aes_key: SymmetricKey,
}

impl KeyHeader {
    pub fn generate() -> Self {
        Self {
            iv: rand::thread_rng().gen(),
            aes_key: SymmetricKey::generate(),
        }
    }

    /// Seal under `kek` (a shared secret in transit, a storage key at rest).
    pub fn seal(&self, kek: &SymmetricKey) -> std::result::Result<EncryptedKey, CoreError> {
        let mut plain = Zeroizing::new([0u8; IV_LEN + KEY_LEN]);
        plain[..IV_LEN].copy_from_slice(&self.iv);
        plain[IV_LEN..].copy_from_slice(self.aes_key.as_bytes());
        EncryptedKey::seal(kek, &plain[..])
    }

    pub fn open(sealed: &EncryptedKey, kek: &SymmetricKey) -> std::result::Result<Self, CoreError> {
        let plain = sealed.open(kek)?;
        let bytes = plain.as_slice();
        if bytes.len() != IV_LEN + KEY_LEN {
            return Err(CoreError::InvalidLength {
                expected: IV_LEN + KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&bytes[..IV_LEN]);
        Ok(Self {
            iv,
            aes_key: SymmetricKey::from_slice(&bytes[IV_LEN..])?,
        })
    }

    pub fn duplicate(&self) -> Self {
        Self {
            iv: self.iv,
            aes_key: self.aes_key.duplicate(),
        }
    }
}

impl fmt::Debug for KeyHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHeader").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Results
// ─────────────────────────────────────────────────────────────────────────────

/// What the receiving perimeter did with a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitResponseCode {
    AcceptedDirectWrite,
    AcceptedIntoInbox,
    Rejected,
    QuarantinedPayload,
    QuarantinedSenderNotConnected,
    AccessDenied,
}

impl TransitResponseCode {
    pub fn is_accepted(self) -> bool {
        matches!(
            self,
            TransitResponseCode::AcceptedDirectWrite | TransitResponseCode::AcceptedIntoInbox
        )
    }
}

/// Per-recipient delivery state, as seen by the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    Enqueued,
    /// The key header was sealed for this recipient and the item queued.
    TransferKeyCreated,
    DeliveredToTargetDrive,
    DeliveredToInbox,
    RecipientReturnedAccessDenied,
    RecipientNotConnected,
    PendingRetry,
    RetryLimitReached,
    Rejected,
}

impl TransferStatus {
    /// No further delivery attempts will be made.
    pub fn is_final(self) -> bool {
        !matches!(
            self,
            TransferStatus::Enqueued | TransferStatus::TransferKeyCreated | TransferStatus::PendingRetry
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePart {
    pub kind: PartKind,
    pub data: Bytes,
}

/// A complete transfer as carried by the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEnvelope {
    pub instruction_set: TransferInstructionSet,
    pub metadata: FileMetadata,
    pub parts: Vec<EnvelopePart>,
}

impl TransferEnvelope {
    pub fn new(instruction_set: TransferInstructionSet, metadata: FileMetadata) -> Self {
        Self {
            instruction_set,
            metadata,
            parts: Vec::new(),
        }
    }

    pub fn with_part(mut self, kind: PartKind, data: impl Into<Bytes>) -> Self {
        self.parts.push(EnvelopePart {
            kind,
            data: data.into(),
        });
        self
    }

    /// Replace any key header part with `sealed`.
    pub fn set_key_header(&mut self, sealed: &EncryptedKey) -> Result<()> {
        self.parts.retain(|p| p.kind != PartKind::TransferKeyHeader);
        self.parts.push(EnvelopePart {
            kind: PartKind::TransferKeyHeader,
            data: Bytes::from(encode(sealed)?),
        });
        Ok(())
    }
}

/// A push notification relayed to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushNotification {
    pub global_transit_id: Option<GlobalTransitId>,
    pub options: AppNotificationOptions,
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| TransitError::Serialization(e.to_string()))?;
    Ok(buf)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| TransitError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_part_extensions_are_distinct() {
        let kinds = [
            PartKind::TransferKeyHeader,
            PartKind::Metadata,
            PartKind::payload("main"),
            PartKind::thumbnail("main", "small"),
        ];
        let exts: std::collections::HashSet<String> = kinds.iter().map(|k| k.extension()).collect();
        assert_eq!(exts.len(), kinds.len());
        assert!(!exts.contains(INSTRUCTION_SET_EXTENSION));
    }

    #[test]
    fn test_part_key_validation() {
        assert!(PartKind::payload("main_1").validate().is_ok());
        assert!(PartKind::payload("").validate().is_err());
        assert!(PartKind::payload("a.b").validate().is_err());
        assert!(PartKind::thumbnail("main", "../x").validate().is_err());
    }

    #[test]
    fn test_expected_extensions_follow_contents() {
        let metadata = FileMetadata {
            payloads: vec![PayloadDescriptor::new("main", "image/png").with_thumbnail("small")],
            ..Default::default()
        };

        assert_eq!(
            metadata.expected_extensions(SendContents::ALL),
            vec!["payload.main".to_string(), "thumb.main.small".to_string()]
        );
        assert_eq!(
            metadata.expected_extensions(SendContents::HEADER | SendContents::PAYLOAD),
            vec!["payload.main".to_string()]
        );
        assert!(metadata.expected_extensions(SendContents::HEADER).is_empty());
    }

    #[test]
    fn test_key_header_seal_and_open() {
        let shared = SymmetricKey::generate();
        let header = KeyHeader::generate();
        let sealed = header.seal(&shared).unwrap();

        let opened = KeyHeader::open(&sealed, &shared).unwrap();
        assert_eq!(opened.iv, header.iv);
        assert_eq!(opened.aes_key, header.aes_key);

        let other = SymmetricKey::generate();
        assert!(matches!(
            KeyHeader::open(&sealed, &other),
            Err(CoreError::KeyMismatch)
        ));
    }

    #[test]
    fn test_only_save_file_uploads() {
        let mut set = TransferInstructionSet::save_file(TargetDrive::random(), FileSystemType::Standard);
        assert!(set.validate().is_ok());

        set.transfer_instruction_type = TransferInstructionType::DeleteLinkedFile;
        let err = set.validate().unwrap_err();
        assert_eq!(err.client_code(), Some(ClientErrorCode::InvalidTransferType));
    }

    #[test]
    fn test_envelope_key_header_replaced() {
        let set = TransferInstructionSet::save_file(TargetDrive::random(), FileSystemType::Standard);
        let mut envelope = TransferEnvelope::new(set, FileMetadata::default())
            .with_part(PartKind::payload("main"), b"hello".to_vec());

        let sealed = KeyHeader::generate().seal(&SymmetricKey::generate()).unwrap();
        envelope.set_key_header(&sealed).unwrap();
        envelope.set_key_header(&sealed).unwrap();

        let headers = envelope
            .parts
            .iter()
            .filter(|p| p.kind == PartKind::TransferKeyHeader)
            .count();
        assert_eq!(headers, 1);

        let decoded: TransferEnvelope = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_send_contents_flags() {
        let c = SendContents::HEADER | SendContents::PAYLOAD;
        assert!(c.contains(SendContents::PAYLOAD));
        assert!(!c.contains(SendContents::THUMBNAILS));
        assert!(SendContents::ALL.contains(c));
        assert_eq!(format!("{:?}", c), "SendContents(Header|Payload)");
    }

    fn part_key() -> impl Strategy<Value = String> {
        "[A-Za-z0-9_-]{1,64}"
    }

    fn payloads() -> impl Strategy<Value = Vec<PayloadDescriptor>> {
        prop::collection::vec(
            (part_key(), prop::collection::vec(part_key(), 0..3)).prop_map(|(key, thumbnails)| {
                PayloadDescriptor {
                    key,
                    content_type: "application/octet-stream".to_string(),
                    thumbnails,
                }
            }),
            0..4,
        )
    }

    proptest! {
        #[test]
        fn test_valid_keys_give_recoverable_extensions(payload_key in part_key(), thumbnail_key in part_key()) {
            let payload = PartKind::payload(payload_key.clone());
            let thumbnail = PartKind::thumbnail(payload_key.clone(), thumbnail_key.clone());
            prop_assert!(payload.validate().is_ok());
            prop_assert!(thumbnail.validate().is_ok());

            let extension = thumbnail.extension();
            let parts: Vec<&str> = extension.split('.').collect();
            prop_assert_eq!(parts, vec!["thumb", payload_key.as_str(), thumbnail_key.as_str()]);
            prop_assert_ne!(payload.extension(), extension);
        }

        #[test]
        fn test_expected_extensions_count(payloads in payloads(), bits in 0u8..8) {
            let contents = SendContents(bits);
            let metadata = FileMetadata { payloads, ..Default::default() };
            let expected = metadata.expected_extensions(contents);

            let thumbnails: usize = metadata.payloads.iter().map(|p| p.thumbnails.len()).sum();
            let mut count = 0;
            if contents.contains(SendContents::PAYLOAD) {
                count += metadata.payloads.len();
            }
            if contents.contains(SendContents::THUMBNAILS) {
                count += thumbnails;
            }
            prop_assert_eq!(expected.len(), count);
            prop_assert!(expected.iter().all(|e| e.starts_with("payload.") || e.starts_with("thumb.")));
        }

        #[test]
        fn test_instruction_set_json(bits in 0u8..8, comment in any::<bool>(), notify in any::<bool>()) {
            let fst = if comment { FileSystemType::Comment } else { FileSystemType::Standard };
            let mut set = TransferInstructionSet::save_file(TargetDrive::random(), fst);
            set.contents_provided = SendContents(bits);
            if notify {
                set = set.with_notification(AppNotificationOptions {
                    tag: Some("chat".to_string()),
                    ..Default::default()
                });
            }
            let json = serde_json::to_string(&set).unwrap();
            prop_assert_eq!(serde_json::from_str::<TransferInstructionSet>(&json).unwrap(), set);
        }
    }
}
