//! The verification metadata document (TOML).
//!
//! ```toml
//! version = 1
//!
//! [settings]
//! verify_checksums = true
//! verify_signatures = true
//!
//! [[trusted_keys]]
//! id = "8899AABBCCDDEEFF"
//! public_key = "<base64 ed25519 public key>"
//!
//! [trusted_keys.scope]
//! group = "com.acme"
//!
//! [[ignored_keys]]
//! id = "0x1234"
//! reason = "revoked"
//!
//! [[components]]
//! group = "com.acme"
//! name = "lib"
//! version = "1.0"
//! trusted_keys = ["8899AABBCCDDEEFF"]
//!
//! [[components.checksums]]
//! algorithm = "sha256"
//! value = "..."
//! ```
//!
//! Scalar fields are declared before nested tables so documents serialize in
//! the same shape they are written.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{
    ChecksumAlgorithm, ChecksumOrigin, ExpectedChecksum, KeyId, MetadataError, ModuleCoordinate,
    FORMAT_VERSION,
};

fn default_version() -> u32 {
    FORMAT_VERSION
}

fn default_true() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Root of a verification metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerificationMetadata {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub settings: Settings,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_keys: Vec<TrustedKeyDecl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_keys: Vec<IgnoredKeyDecl>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentDecl>,
}

impl Default for VerificationMetadata {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            settings: Settings::default(),
            trusted_keys: Vec::new(),
            ignored_keys: Vec::new(),
            components: Vec::new(),
        }
    }
}

/// Global verification switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Require checksum verification for every artifact.
    #[serde(default = "default_true")]
    pub verify_checksums: bool,

    /// Require a detached signature for every artifact.
    #[serde(default)]
    pub verify_signatures: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            verify_checksums: true,
            verify_signatures: false,
        }
    }
}

/// A globally trusted signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrustedKeyDecl {
    pub id: KeyId,

    /// Base64-encoded Ed25519 public key. When absent the key material comes
    /// from the local key cache or a keyserver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Restricts the key to matching coordinates. Unscoped keys are trusted
    /// for every artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<KeyScopeDecl>,
}

/// Coordinate filter for a trusted key. Absent fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyScopeDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Interpret the fields as regular expressions instead of literals.
    #[serde(default, skip_serializing_if = "is_false")]
    pub regex: bool,
}

/// A key that must never be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IgnoredKeyDecl {
    pub id: KeyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Per-component verification exemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Exemption {
    /// Skip verification entirely.
    Skip,
    /// Missing checksums, missing signatures and unresolvable keys are
    /// warnings regardless of mode.
    AllowMissing,
}

/// Expectations for one module coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDecl {
    pub group: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exemption: Option<Exemption>,

    /// Keys trusted for this component only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_keys: Vec<KeyId>,

    /// Keys rejected for this component only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ignored_keys: Vec<KeyId>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checksums: Vec<ChecksumDecl>,
}

/// A declared checksum as written in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChecksumDecl {
    pub algorithm: String,
    pub value: String,
    #[serde(default)]
    pub origin: ChecksumOrigin,
}

impl ChecksumDecl {
    /// Validate into a typed expected checksum.
    pub fn to_expected(&self) -> Result<ExpectedChecksum, MetadataError> {
        let algorithm: ChecksumAlgorithm = self.algorithm.parse()?;
        ExpectedChecksum::new(algorithm, &self.value, self.origin)
    }

    pub fn from_expected(expected: &ExpectedChecksum) -> Self {
        Self {
            algorithm: expected.algorithm.as_str().to_string(),
            value: expected.value.clone(),
            origin: expected.origin,
        }
    }
}

impl ComponentDecl {
    /// Start an empty declaration for a coordinate.
    pub fn for_coordinate(coordinate: &ModuleCoordinate) -> Self {
        Self {
            group: coordinate.group.clone(),
            name: coordinate.name.clone(),
            version: coordinate.version.clone(),
            classifier: coordinate.classifier.clone(),
            extension: coordinate.extension.clone(),
            exemption: None,
            trusted_keys: Vec::new(),
            ignored_keys: Vec::new(),
            checksums: Vec::new(),
        }
    }

    pub fn coordinate(&self) -> ModuleCoordinate {
        ModuleCoordinate {
            group: self.group.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            classifier: self.classifier.clone(),
            extension: self.extension.clone(),
        }
    }

    /// Validate every declared checksum; at most one per algorithm.
    pub fn expected_checksums(&self) -> Result<Vec<ExpectedChecksum>, MetadataError> {
        let mut seen = HashSet::new();
        let mut checksums = Vec::with_capacity(self.checksums.len());
        for decl in &self.checksums {
            let expected = decl.to_expected()?;
            if !seen.insert(expected.algorithm) {
                return Err(MetadataError::DuplicateChecksum {
                    coordinate: self.coordinate().to_string(),
                    algorithm: expected.algorithm.to_string(),
                });
            }
            checksums.push(expected);
        }
        Ok(checksums)
    }
}

impl VerificationMetadata {
    /// Parse and validate a TOML document.
    pub fn parse(contents: &str) -> Result<Self, MetadataError> {
        let metadata: VerificationMetadata =
            toml::from_str(contents).map_err(|e| MetadataError::Parse(e.to_string()))?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Check the document for internal consistency.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.version != FORMAT_VERSION {
            return Err(MetadataError::UnsupportedVersion {
                found: self.version,
                expected: FORMAT_VERSION,
            });
        }

        let mut trusted = HashSet::new();
        for key in &self.trusted_keys {
            if !trusted.insert(&key.id) {
                return Err(MetadataError::DuplicateTrustedKey(key.id.to_string()));
            }
        }

        for ignored in &self.ignored_keys {
            if trusted.contains(&ignored.id) {
                return Err(MetadataError::TrustedAndIgnored(ignored.id.to_string()));
            }
        }

        let mut coordinates = HashSet::new();
        for component in &self.components {
            let coordinate = component.coordinate();
            if !coordinate.is_well_formed() {
                return Err(MetadataError::InvalidCoordinate(coordinate.to_string()));
            }
            component.expected_checksums()?;
            if let Some(key) = component
                .trusted_keys
                .iter()
                .find(|key| component.ignored_keys.contains(key))
            {
                return Err(MetadataError::TrustedAndIgnored(key.to_string()));
            }
            if !coordinates.insert(coordinate) {
                return Err(MetadataError::DuplicateComponent(
                    component.coordinate().to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Sort every list so equal documents serialize identically.
    pub fn canonicalize(&mut self) {
        self.trusted_keys.sort_by(|a, b| a.id.cmp(&b.id));
        self.ignored_keys.sort_by(|a, b| a.id.cmp(&b.id));
        for component in &mut self.components {
            component.trusted_keys.sort();
            component.trusted_keys.dedup();
            component.ignored_keys.sort();
            component.ignored_keys.dedup();
            component
                .checksums
                .sort_by(|a, b| a.algorithm.cmp(&b.algorithm));
        }
        self.components.sort_by_key(|c| c.coordinate());
    }

    /// Serialize in canonical order.
    pub fn to_toml_string(&self) -> Result<String, MetadataError> {
        let mut canonical = self.clone();
        canonical.canonicalize();
        toml::to_string_pretty(&canonical).map_err(|e| MetadataError::Serialize(e.to_string()))
    }
}
