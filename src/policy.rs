//! Trust policy store
//!
//! Built once per run from verification metadata and shared read-only
//! (`Arc<PolicyStore>`) by every worker. Nothing mutates it after load, so
//! lookups take no locks.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use depgate_metadata::{
    ChecksumDecl, ComponentDecl, Exemption, ExpectedChecksum, IgnoredKeyDecl, KeyId,
    KeyScopeDecl, MetadataError, ModuleCoordinate, Settings, TrustedKeyDecl,
    VerificationMetadata,
};
use ed25519_dalek::VerifyingKey;
use regex_lite::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

use crate::keys::{compute_key_fingerprint, decode_verifying_key, encode_verifying_key};

/// Errors loading verification metadata
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read verification metadata {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid verification metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("invalid scope pattern for key {key_id}: {reason}")]
    InvalidScope { key_id: String, reason: String },
}

/// Expectations for one module coordinate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyEntry {
    pub checksums: Vec<ExpectedChecksum>,
    pub trusted_keys: Vec<KeyId>,
    pub ignored_keys: Vec<KeyId>,
    pub exemption: Option<Exemption>,
}

impl PolicyEntry {
    /// Verification is skipped entirely for this coordinate
    pub fn is_skipped(&self) -> bool {
        self.exemption == Some(Exemption::Skip)
    }

    /// Missing checksum/signature/key outcomes are warnings in every mode
    pub fn allows_missing(&self) -> bool {
        self.exemption == Some(Exemption::AllowMissing)
    }

    fn from_decl(decl: &ComponentDecl) -> Result<Self, MetadataError> {
        Ok(Self {
            checksums: decl.expected_checksums()?,
            trusted_keys: decl.trusted_keys.clone(),
            ignored_keys: decl.ignored_keys.clone(),
            exemption: decl.exemption,
        })
    }

    fn to_decl(&self, coordinate: &ModuleCoordinate) -> ComponentDecl {
        ComponentDecl {
            exemption: self.exemption,
            trusted_keys: self.trusted_keys.clone(),
            ignored_keys: self.ignored_keys.clone(),
            checksums: self.checksums.iter().map(ChecksumDecl::from_expected).collect(),
            ..ComponentDecl::for_coordinate(coordinate)
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Pattern(Regex),
}

impl Matcher {
    fn matches(&self, value: &str) -> bool {
        match self {
            Matcher::Literal(expected) => expected == value,
            Matcher::Pattern(re) => re.is_match(value),
        }
    }
}

/// Coordinate filter restricting where a trusted key applies
#[derive(Debug, Clone)]
pub struct KeyScope {
    decl: KeyScopeDecl,
    group: Option<Matcher>,
    name: Option<Matcher>,
    version: Option<Matcher>,
    classifier: Option<Matcher>,
    extension: Option<Matcher>,
}

impl KeyScope {
    fn compile(key_id: &KeyId, decl: &KeyScopeDecl) -> Result<Self, ConfigError> {
        let compile_one = |field: &Option<String>| -> Result<Option<Matcher>, ConfigError> {
            let Some(value) = field else {
                return Ok(None);
            };
            if !decl.regex {
                return Ok(Some(Matcher::Literal(value.clone())));
            }
            Regex::new(&format!("^(?:{})$", value))
                .map(|re| Some(Matcher::Pattern(re)))
                .map_err(|e| ConfigError::InvalidScope {
                    key_id: key_id.to_string(),
                    reason: e.to_string(),
                })
        };

        Ok(Self {
            decl: decl.clone(),
            group: compile_one(&decl.group)?,
            name: compile_one(&decl.name)?,
            version: compile_one(&decl.version)?,
            classifier: compile_one(&decl.classifier)?,
            extension: compile_one(&decl.extension)?,
        })
    }

    /// A scoped classifier or extension never matches a coordinate lacking one.
    pub fn matches(&self, coordinate: &ModuleCoordinate) -> bool {
        fn check(matcher: &Option<Matcher>, value: Option<&str>) -> bool {
            match (matcher, value) {
                (None, _) => true,
                (Some(m), Some(v)) => m.matches(v),
                (Some(_), None) => false,
            }
        }

        check(&self.group, Some(coordinate.group.as_str()))
            && check(&self.name, Some(coordinate.name.as_str()))
            && check(&self.version, Some(coordinate.version.as_str()))
            && check(&self.classifier, coordinate.classifier.as_deref())
            && check(&self.extension, coordinate.extension.as_deref())
    }
}

/// A signing key declared trusted by policy
#[derive(Debug, Clone)]
pub struct TrustedKey {
    pub id: KeyId,
    /// Inline public key, if the policy carries the key material
    pub public_key: Option<VerifyingKey>,
    /// Fingerprint of the inline key
    pub fingerprint: Option<String>,
    pub scope: Option<KeyScope>,
}

impl TrustedKey {
    fn from_decl(decl: &TrustedKeyDecl) -> Result<Self, ConfigError> {
        let public_key = match &decl.public_key {
            Some(encoded) => {
                let key = decode_verifying_key(encoded).map_err(|e| {
                    MetadataError::InvalidPublicKey {
                        key_id: decl.id.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Some(key)
            }
            None => None,
        };

        let fingerprint = public_key.as_ref().map(compute_key_fingerprint);
        if let Some(fp) = &fingerprint {
            if !decl.id.matches_fingerprint(fp) {
                return Err(MetadataError::InvalidPublicKey {
                    key_id: decl.id.to_string(),
                    reason: format!("fingerprint {} does not match key id", fp),
                }
                .into());
            }
        }

        let scope = decl
            .scope
            .as_ref()
            .map(|s| KeyScope::compile(&decl.id, s))
            .transpose()?;

        Ok(Self {
            id: decl.id.clone(),
            public_key,
            fingerprint,
            scope,
        })
    }

    fn to_decl(&self) -> TrustedKeyDecl {
        TrustedKeyDecl {
            id: self.id.clone(),
            public_key: self.public_key.as_ref().map(encode_verifying_key),
            scope: self.scope.as_ref().map(|s| s.decl.clone()),
        }
    }

    /// Whether this key is trusted for the coordinate
    pub fn applies_to(&self, coordinate: &ModuleCoordinate) -> bool {
        self.scope.as_ref().map_or(true, |s| s.matches(coordinate))
    }
}

/// Immutable trust policy for a verification run
#[derive(Debug)]
pub struct PolicyStore {
    settings: Settings,
    entries: HashMap<ModuleCoordinate, PolicyEntry>,
    keyring: BTreeMap<KeyId, TrustedKey>,
    ignored: BTreeMap<KeyId, Option<String>>,
    default_entry: PolicyEntry,
    version: String,
}

impl PolicyStore {
    /// Load verification metadata from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse verification metadata from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::from_metadata(&VerificationMetadata::parse(contents)?)
    }

    /// Build a store from an already parsed document
    pub fn from_metadata(metadata: &VerificationMetadata) -> Result<Self, ConfigError> {
        metadata.validate()?;

        let mut keyring = BTreeMap::new();
        for decl in &metadata.trusted_keys {
            keyring.insert(decl.id.clone(), TrustedKey::from_decl(decl)?);
        }

        let ignored = metadata
            .ignored_keys
            .iter()
            .map(|decl| (decl.id.clone(), decl.reason.clone()))
            .collect();

        let mut entries = HashMap::with_capacity(metadata.components.len());
        for component in &metadata.components {
            entries.insert(component.coordinate(), PolicyEntry::from_decl(component)?);
        }

        let mut store = Self {
            settings: metadata.settings.clone(),
            entries,
            keyring,
            ignored,
            default_entry: PolicyEntry::default(),
            version: String::new(),
        };
        store.version = store.compute_version()?;

        debug!(
            components = store.entries.len(),
            trusted_keys = store.keyring.len(),
            ignored_keys = store.ignored.len(),
            version = %store.version,
            "loaded verification metadata"
        );
        Ok(store)
    }

    fn compute_version(&self) -> Result<String, ConfigError> {
        let canonical = self.to_toml_string()?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }

    /// Entry for a coordinate, or the empty entry when none is declared
    pub fn lookup(&self, coordinate: &ModuleCoordinate) -> &PolicyEntry {
        self.entries.get(coordinate).unwrap_or(&self.default_entry)
    }

    /// Whether the coordinate has an explicit entry
    pub fn contains(&self, coordinate: &ModuleCoordinate) -> bool {
        self.entries.contains_key(coordinate)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// SHA-256 of the canonical serialization; equal policies share a version
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn requires_checksum(&self, _coordinate: &ModuleCoordinate) -> bool {
        self.settings.verify_checksums
    }

    pub fn requires_signature(&self, coordinate: &ModuleCoordinate) -> bool {
        self.settings.verify_signatures || !self.lookup(coordinate).trusted_keys.is_empty()
    }

    /// Key is revoked globally or for this coordinate
    pub fn is_ignored(&self, key_id: &KeyId, coordinate: &ModuleCoordinate) -> bool {
        self.ignored.contains_key(key_id) || self.lookup(coordinate).ignored_keys.contains(key_id)
    }

    /// Key is trusted for this coordinate, by a matching global declaration or
    /// by the coordinate's own entry
    pub fn is_trusted(&self, key_id: &KeyId, coordinate: &ModuleCoordinate) -> bool {
        self.lookup(coordinate).trusted_keys.contains(key_id)
            || self
                .keyring
                .get(key_id)
                .map_or(false, |key| key.applies_to(coordinate))
    }

    /// Inline key material declared for a key id, if any
    pub fn inline_key(&self, key_id: &KeyId) -> Option<&VerifyingKey> {
        self.keyring.get(key_id).and_then(|k| k.public_key.as_ref())
    }

    pub fn trusted_keys(&self) -> impl Iterator<Item = &TrustedKey> {
        self.keyring.values()
    }

    /// Reconstruct the metadata document
    pub fn to_metadata(&self) -> VerificationMetadata {
        let mut metadata = VerificationMetadata {
            settings: self.settings.clone(),
            trusted_keys: self.keyring.values().map(TrustedKey::to_decl).collect(),
            ignored_keys: self
                .ignored
                .iter()
                .map(|(id, reason)| IgnoredKeyDecl {
                    id: id.clone(),
                    reason: reason.clone(),
                })
                .collect(),
            components: self
                .entries
                .iter()
                .map(|(coordinate, entry)| entry.to_decl(coordinate))
                .collect(),
            ..VerificationMetadata::default()
        };
        metadata.canonicalize();
        metadata
    }

    /// Canonical TOML serialization
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(self.to_metadata().to_toml_string()?)
    }
}
