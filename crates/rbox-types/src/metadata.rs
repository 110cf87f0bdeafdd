use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value written under [`MetadataKey::Version`] when an object is prepared
/// for writing.
pub const XATTR_VERSION: &str = "0.1";

/// Well-known mail metadata keys.
///
/// Each key maps to a fixed one-character token, which is the string
/// actually used as the attribute name in either metadata store. Keys not
/// in this list can still be stored by their raw string name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetadataKey {
    /// GUID of the mailbox the mail belongs to.
    MailboxGuid,
    /// GUID of the mail itself.
    Guid,
    /// POP3 unique id listing value.
    Pop3Uidl,
    /// POP3 message order.
    Pop3Order,
    /// Time the mail was received (unix seconds).
    ReceivedTime,
    /// Physical size in bytes as stored.
    PhysicalSize,
    /// Virtual size in bytes (CRLF-normalized).
    VirtualSize,
    /// Reference to externally stored mail parts.
    ExtRef,
    /// Mailbox the mail was originally delivered to.
    OrigMailbox,
    /// IMAP UID.
    MailUid,
    /// Attribute layout version, see [`XATTR_VERSION`].
    Version,
    /// Envelope sender.
    FromEnvelope,
    /// Private flags.
    PvtFlags,
    /// Keywords, legacy layout.
    OldKeywords,
    /// Save time, legacy layout.
    OldSaveTime,
    /// Flags, legacy layout.
    OldFlags,
}

impl MetadataKey {
    /// Every recognized key, in token declaration order.
    pub const ALL: [MetadataKey; 16] = [
        Self::MailboxGuid,
        Self::Guid,
        Self::Pop3Uidl,
        Self::Pop3Order,
        Self::ReceivedTime,
        Self::PhysicalSize,
        Self::VirtualSize,
        Self::ExtRef,
        Self::OrigMailbox,
        Self::MailUid,
        Self::Version,
        Self::FromEnvelope,
        Self::PvtFlags,
        Self::OldKeywords,
        Self::OldSaveTime,
        Self::OldFlags,
    ];

    /// The attribute name this key is stored under.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MailboxGuid => "M",
            Self::Guid => "G",
            Self::Pop3Uidl => "P",
            Self::Pop3Order => "O",
            Self::ReceivedTime => "R",
            Self::PhysicalSize => "Z",
            Self::VirtualSize => "V",
            Self::ExtRef => "X",
            Self::OrigMailbox => "B",
            Self::MailUid => "U",
            Self::Version => "I",
            Self::FromEnvelope => "A",
            Self::PvtFlags => "C",
            Self::OldKeywords => "K",
            Self::OldSaveTime => "S",
            Self::OldFlags => "F",
        }
    }

    /// Look up a key by its attribute name. Matching is case-sensitive.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == token)
    }
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MetadataKey> for String {
    fn from(key: MetadataKey) -> Self {
        key.as_str().to_string()
    }
}

/// Decode a value written by [`Metadata::from_u64`].
pub fn decode_u64(value: &[u8]) -> Option<u64> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

/// Decode a value written by [`Metadata::from_time`].
pub fn decode_time(value: &[u8]) -> Option<DateTime<Utc>> {
    let secs: i64 = std::str::from_utf8(value).ok()?.parse().ok()?;
    DateTime::from_timestamp(secs, 0)
}

/// A single metadata attribute: string key plus opaque value bytes.
///
/// Numbers and timestamps are encoded as decimal text so that the stored
/// value stays readable with generic backend tooling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub key: String,
    pub value: Vec<u8>,
}

impl Metadata {
    /// Create an attribute from raw value bytes.
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create an attribute holding UTF-8 text.
    pub fn from_text(key: impl Into<String>, value: &str) -> Self {
        Self::new(key, value.as_bytes())
    }

    /// Create an attribute holding an unsigned integer.
    pub fn from_u64(key: impl Into<String>, value: u64) -> Self {
        Self::new(key, value.to_string())
    }

    /// Create an attribute holding a timestamp, truncated to whole seconds.
    pub fn from_time(key: impl Into<String>, value: DateTime<Utc>) -> Self {
        Self::new(key, value.timestamp().to_string())
    }

    /// The value as UTF-8 text, if it is valid UTF-8.
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// The value parsed as an unsigned integer.
    pub fn value_u64(&self) -> Option<u64> {
        decode_u64(&self.value)
    }

    /// The value parsed as a unix-seconds timestamp.
    pub fn value_time(&self) -> Option<DateTime<Utc>> {
        decode_time(&self.value)
    }
}
