//! depgate verification metadata
//!
//! Defines the persisted trust policy document: module coordinates, expected
//! checksums, trusted and ignored signing keys, and per-component exemptions.

pub mod checksum;
pub mod coordinate;
pub mod document;
pub mod error;
pub mod key;

pub use checksum::{ChecksumAlgorithm, ChecksumOrigin, ExpectedChecksum};
pub use coordinate::ModuleCoordinate;
pub use document::{
    ChecksumDecl, ComponentDecl, Exemption, IgnoredKeyDecl, KeyScopeDecl, Settings,
    TrustedKeyDecl, VerificationMetadata,
};
pub use error::MetadataError;
pub use key::KeyId;

/// Current metadata document format version.
pub const FORMAT_VERSION: u32 = 1;
