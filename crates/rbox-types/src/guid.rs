use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Width of a [`Guid`] in bytes.
pub const GUID_SIZE: usize = 16;

/// Globally unique identifier attached to a mail object.
///
/// A `Guid` is independent of the object's storage identifier: the object
/// may be renamed in the backend, the GUID stays. The width is fixed by the
/// type, so there is no way to build a truncated or oversized GUID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guid([u8; GUID_SIZE]);

impl Guid {
    /// Wrap exactly sixteen raw bytes.
    pub const fn from_bytes(bytes: [u8; GUID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Generate a fresh random GUID.
    pub fn generate() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// The null GUID (all zeros). Represents "no GUID assigned".
    pub const fn null() -> Self {
        Self([0u8; GUID_SIZE])
    }

    /// Returns `true` if this is the null GUID.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; GUID_SIZE]
    }

    /// The raw 16 bytes.
    pub fn as_bytes(&self) -> &[u8; GUID_SIZE] {
        &self.0
    }

    fn as_uuid(&self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.0)
    }

    /// 32 lowercase hex digits, no separators. This is the form stored in
    /// the [`Guid`](crate::MetadataKey::Guid) attribute.
    pub fn to_hex(&self) -> String {
        self.as_uuid().simple().to_string()
    }

    /// Hyphenated 8-4-4-4-12 form, as most mail tooling prints GUIDs.
    pub fn to_hyphenated(&self) -> String {
        self.as_uuid().hyphenated().to_string()
    }

    /// First 8 hex digits, for log lines.
    pub fn short_hex(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(8);
        hex
    }

    /// Parse either the plain hex form or the hyphenated form.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let digits = s.chars().filter(|c| *c != '-').count();
        let hex_only = s.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
        if hex_only && digits != GUID_SIZE * 2 {
            return Err(TypeError::InvalidLength {
                expected: GUID_SIZE,
                actual: digits / 2,
            });
        }
        uuid::Uuid::try_parse(s)
            .map(Self::from)
            .map_err(|e| TypeError::InvalidHex(e.to_string()))
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self.short_hex())
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; GUID_SIZE]> for Guid {
    fn from(bytes: [u8; GUID_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<Guid> for [u8; GUID_SIZE] {
    fn from(guid: Guid) -> Self {
        guid.0
    }
}

impl From<uuid::Uuid> for Guid {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(*uuid.as_bytes())
    }
}
