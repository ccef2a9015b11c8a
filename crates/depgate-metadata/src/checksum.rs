//! Checksum algorithms and expected digests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::MetadataError;

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    /// All supported algorithms, weakest first.
    pub const ALL: [ChecksumAlgorithm; 2] = [ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Sha512];

    /// Canonical lowercase name used in metadata documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    /// Length of a hex-encoded digest.
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Sha512 => 128,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(MetadataError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Where an expected checksum came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumOrigin {
    /// Written by a person reviewing the dependency.
    #[default]
    Declared,
    /// Recorded automatically from a trusted first download.
    Generated,
}

/// An expected digest for one algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpectedChecksum {
    pub algorithm: ChecksumAlgorithm,
    /// Lowercase hex digest.
    pub value: String,
    pub origin: ChecksumOrigin,
}

impl ExpectedChecksum {
    /// Build an expected checksum, validating and normalizing the hex digest.
    pub fn new(
        algorithm: ChecksumAlgorithm,
        value: &str,
        origin: ChecksumOrigin,
    ) -> Result<Self, MetadataError> {
        let invalid = |reason: String| MetadataError::InvalidDigest {
            algorithm: algorithm.to_string(),
            value: value.to_string(),
            reason,
        };

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid("not a hex string".to_string()));
        }
        if value.len() != algorithm.hex_len() {
            return Err(invalid(format!(
                "expected {} hex digits, got {}",
                algorithm.hex_len(),
                value.len()
            )));
        }

        Ok(Self {
            algorithm,
            value: value.to_ascii_lowercase(),
            origin,
        })
    }

    /// Case-insensitive comparison against a computed hex digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.value.eq_ignore_ascii_case(actual_hex)
    }
}
