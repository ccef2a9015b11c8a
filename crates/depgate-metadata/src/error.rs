//! Error types for metadata parsing and validation.

use thiserror::Error;

/// Errors raised while parsing or validating verification metadata.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("TOML parse error: {0}")]
    Parse(String),

    #[error("TOML serialization error: {0}")]
    Serialize(String),

    #[error("unsupported metadata format version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("invalid module coordinate '{0}'")]
    InvalidCoordinate(String),

    #[error("duplicate component entry for {0}")]
    DuplicateComponent(String),

    #[error("unknown checksum algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("{coordinate}: duplicate {algorithm} checksum")]
    DuplicateChecksum {
        coordinate: String,
        algorithm: String,
    },

    #[error("invalid {algorithm} digest '{value}': {reason}")]
    InvalidDigest {
        algorithm: String,
        value: String,
        reason: String,
    },

    #[error("invalid key id '{0}': expected 4 to 64 hex digits")]
    InvalidKeyId(String),

    #[error("duplicate trusted key declaration for {0}")]
    DuplicateTrustedKey(String),

    #[error("key {0} is declared both trusted and ignored")]
    TrustedAndIgnored(String),

    #[error("invalid public key for {key_id}: {reason}")]
    InvalidPublicKey { key_id: String, reason: String },
}
