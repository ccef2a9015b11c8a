//! Shared fixtures: artifacts on disk, signatures and policy documents

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use depgate::checksum::digest_bytes;
use depgate::keys::{encode_verifying_key, key_id_of, KeyFetchError, KeyServer};
use depgate::signature::{default_signature_path, DetachedSignature};
use depgate::{Artifact, CancellationToken, KeyId, ModuleCoordinate, PolicyStore};
use depgate_metadata::ChecksumAlgorithm;
use ed25519_dalek::{SigningKey, VerifyingKey};
use tempfile::TempDir;

/// Temporary directory holding a run's artifacts
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write an artifact file named after its coordinate
    pub fn artifact(&self, coordinate: &str, content: &[u8]) -> Artifact {
        let coordinate: ModuleCoordinate = coordinate.parse().expect("valid coordinate");
        let file_name = format!(
            "{}-{}-{}.jar",
            coordinate.group, coordinate.name, coordinate.version
        );
        let path = self.path().join(file_name);
        fs::write(&path, content).expect("write artifact");
        Artifact::new(coordinate, path).with_length(content.len() as u64)
    }

    /// Write `<artifact>.sig` signed by `key`
    pub fn sign(&self, artifact: &Artifact, key: &SigningKey) {
        DetachedSignature::sign_file(&artifact.path, key)
            .and_then(|s| s.write_to_file(&default_signature_path(&artifact.path)))
            .expect("write signature");
    }

    /// Flip one byte of the artifact in place
    pub fn corrupt(&self, artifact: &Artifact, offset: usize) {
        let mut bytes = fs::read(&artifact.path).expect("read artifact");
        bytes[offset] ^= 0x01;
        fs::write(&artifact.path, bytes).expect("write artifact");
    }
}

pub fn sha256_hex(content: &[u8]) -> String {
    digest_bytes(ChecksumAlgorithm::Sha256, content)
}

/// Deterministic signing key from a seed byte
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn key_id(key: &SigningKey) -> KeyId {
    key_id_of(&key.verifying_key())
}

/// `[[components]]` block for a coordinate with extra body lines
pub fn component(coordinate: &str, body: &str) -> String {
    let coordinate: ModuleCoordinate = coordinate.parse().expect("valid coordinate");
    let mut out = format!(
        "[[components]]\ngroup = \"{}\"\nname = \"{}\"\nversion = \"{}\"\n",
        coordinate.group, coordinate.name, coordinate.version
    );
    if let Some(classifier) = &coordinate.classifier {
        out.push_str(&format!("classifier = \"{}\"\n", classifier));
    }
    if let Some(extension) = &coordinate.extension {
        out.push_str(&format!("extension = \"{}\"\n", extension));
    }
    if !body.is_empty() {
        out.push_str(body);
        out.push('\n');
    }
    out
}

/// `checksums = [...]` line with the sha256 of `content`
pub fn sha256_checksum(content: &[u8]) -> String {
    format!(
        "checksums = [{{ algorithm = \"sha256\", value = \"{}\" }}]",
        sha256_hex(content)
    )
}

/// `[[trusted_keys]]` block; inline material only when `inline` is set
pub fn trusted_key(key: &SigningKey, inline: bool) -> String {
    let mut out = format!("[[trusted_keys]]\nid = \"{}\"\n", key_id(key));
    if inline {
        out.push_str(&format!(
            "public_key = \"{}\"\n",
            encode_verifying_key(&key.verifying_key())
        ));
    }
    out
}

pub fn policy(toml: &str) -> Arc<PolicyStore> {
    Arc::new(PolicyStore::from_toml_str(toml).expect("valid policy"))
}

/// Keyserver backed by a map, with an optional delay and a call counter
pub struct MapKeyServer {
    keys: HashMap<KeyId, VerifyingKey>,
    delay: Duration,
    calls: AtomicUsize,
    cancel_on_fetch: Option<CancellationToken>,
}

impl MapKeyServer {
    pub fn new(keys: &[&SigningKey]) -> Self {
        Self {
            keys: keys
                .iter()
                .map(|k| (key_id(k), k.verifying_key()))
                .collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            cancel_on_fetch: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancel the token as soon as a fetch starts
    pub fn cancelling(mut self, token: CancellationToken) -> Self {
        self.cancel_on_fetch = Some(token);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyServer for MapKeyServer {
    fn fetch(&self, key_id: &KeyId) -> Result<VerifyingKey, KeyFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = &self.cancel_on_fetch {
            token.cancel();
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.keys
            .get(key_id)
            .copied()
            .ok_or_else(|| KeyFetchError::NotFound(key_id.clone()))
    }
}
