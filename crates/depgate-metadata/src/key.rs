//! Signing key identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::MetadataError;

/// Number of trailing fingerprint hex digits used as the long key id.
pub const LONG_KEY_ID_LEN: usize = 16;

/// A signing key identifier: 4 to 64 uppercase hex digits, without `0x`.
///
/// A key id identifies a key by the tail of its fingerprint, so both short
/// ids (`ABCD`) and full fingerprints are valid ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    /// Parse and normalize a key id. Accepts an optional `0x` prefix.
    pub fn parse(raw: &str) -> Result<Self, MetadataError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() < 4 || digits.len() > 64 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(MetadataError::InvalidKeyId(raw.to_string()));
        }

        Ok(Self(digits.to_ascii_uppercase()))
    }

    /// Derive the long key id from a hex fingerprint.
    pub fn from_fingerprint(fingerprint: &str) -> Result<Self, MetadataError> {
        if !fingerprint.is_ascii() {
            return Err(MetadataError::InvalidKeyId(fingerprint.to_string()));
        }
        let start = fingerprint.len().saturating_sub(LONG_KEY_ID_LEN);
        Self::parse(&fingerprint[start..])
    }

    /// Long key id from raw fingerprint digest bytes (the trailing 8 bytes).
    ///
    /// `digest` must be at least 8 bytes long.
    pub fn from_digest(digest: &[u8]) -> Self {
        let start = digest.len().saturating_sub(LONG_KEY_ID_LEN / 2);
        Self(digest[start..].iter().map(|b| format!("{:02X}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this id names the key with the given hex fingerprint.
    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        fingerprint.to_ascii_uppercase().ends_with(&self.0)
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for KeyId {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for KeyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        KeyId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
