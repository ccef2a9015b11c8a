//! Detached Ed25519 signatures for artifacts
//!
//! A detached signature is a small JSON container stored next to the artifact
//! (`<artifact>.sig` by convention):
//!
//! ```json
//! {
//!   "format": "depgate-signature/1",
//!   "algorithm": "ed25519ph",
//!   "key_id": "8899AABBCCDDEEFF",
//!   "signature": "<base64>"
//! }
//! ```
//!
//! Two algorithms are accepted. `ed25519ph` (RFC 8032 prehashed, SHA-512,
//! context `depgate-signature/1`) signs the digest of the artifact, so files
//! are streamed on both sides and never held in memory. `ed25519` signs the
//! artifact's raw bytes and verification reads the whole file; it is kept
//! for containers produced from in-memory buffers.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use base64::Engine as _;
use depgate_metadata::{KeyId, ModuleCoordinate};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use thiserror::Error;
use tracing::debug;

use crate::checksum::READ_BUFFER_SIZE;
use crate::keys::{key_id_of, KeyOrigin, KeyResolution, TrustedKeyStore};

/// Container format identifier
pub const SIGNATURE_FORMAT: &str = "depgate-signature/1";

/// Ed25519 over the artifact's raw bytes
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

/// Ed25519ph over the SHA-512 digest of the artifact
pub const SIGNATURE_ALGORITHM_PREHASHED: &str = "ed25519ph";

/// Domain separation context for prehashed signatures
pub const SIGNATURE_CONTEXT: &[u8] = b"depgate-signature/1";

/// Conventional file extension for detached signatures
pub const SIGNATURE_EXTENSION: &str = "sig";

/// Ways a signature container can be structurally invalid
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature container is not valid JSON: {0}")]
    Json(String),

    #[error("unsupported signature format '{0}'")]
    UnsupportedFormat(String),

    #[error("unsupported signature algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("invalid key id: {0}")]
    InvalidKeyId(String),

    #[error("signature is not valid base64: {0}")]
    Base64(String),

    #[error("invalid signature bytes: {0}")]
    InvalidSignature(String),
}

/// Detached signature container as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedSignature {
    pub format: String,
    pub algorithm: String,
    pub key_id: String,
    /// Base64-encoded Ed25519 signature
    pub signature: String,
}

/// How the signed message is derived from the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Raw artifact bytes
    Pure,
    /// SHA-512 digest of the artifact
    Prehashed,
}

impl SignatureScheme {
    fn from_algorithm(algorithm: &str) -> Option<Self> {
        if algorithm.eq_ignore_ascii_case(SIGNATURE_ALGORITHM) {
            Some(SignatureScheme::Pure)
        } else if algorithm.eq_ignore_ascii_case(SIGNATURE_ALGORITHM_PREHASHED) {
            Some(SignatureScheme::Prehashed)
        } else {
            None
        }
    }
}

/// A structurally valid detached signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    pub key_id: KeyId,
    pub scheme: SignatureScheme,
    pub signature: Signature,
}

/// SHA-512 state over a file, read in fixed-size chunks
fn prehash_file(path: &Path) -> io::Result<Sha512> {
    let mut hasher = Sha512::new();
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            return Ok(hasher);
        }
        hasher.update(&buffer[..n]);
    }
}

impl DetachedSignature {
    fn new(algorithm: &str, signing_key: &SigningKey, signature: Signature) -> Self {
        Self {
            format: SIGNATURE_FORMAT.to_string(),
            algorithm: algorithm.to_string(),
            key_id: key_id_of(&signing_key.verifying_key()).to_string(),
            signature: base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
        }
    }

    /// Sign an in-memory buffer (`ed25519`)
    pub fn sign(bytes: &[u8], signing_key: &SigningKey) -> Self {
        Self::new(SIGNATURE_ALGORITHM, signing_key, signing_key.sign(bytes))
    }

    /// Sign an artifact file without loading it (`ed25519ph`)
    pub fn sign_file(path: &Path, signing_key: &SigningKey) -> io::Result<Self> {
        let prehashed = prehash_file(path)?;
        let signature = signing_key
            .sign_prehashed(prehashed, Some(SIGNATURE_CONTEXT))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("signing failed: {}", e)))?;
        Ok(Self::new(SIGNATURE_ALGORITHM_PREHASHED, signing_key, signature))
    }

    /// Parse and validate raw container bytes
    pub fn parse(bytes: &[u8]) -> Result<ParsedSignature, SignatureError> {
        let container: DetachedSignature =
            serde_json::from_slice(bytes).map_err(|e| SignatureError::Json(e.to_string()))?;
        container.validate()
    }

    /// Check the container fields and decode the signature
    pub fn validate(&self) -> Result<ParsedSignature, SignatureError> {
        if self.format != SIGNATURE_FORMAT {
            return Err(SignatureError::UnsupportedFormat(self.format.clone()));
        }
        let scheme = SignatureScheme::from_algorithm(&self.algorithm)
            .ok_or_else(|| SignatureError::UnsupportedAlgorithm(self.algorithm.clone()))?;

        let key_id =
            KeyId::parse(&self.key_id).map_err(|e| SignatureError::InvalidKeyId(e.to_string()))?;

        let sig_bytes = base64::engine::general_purpose::STANDARD
            .decode(self.signature.trim())
            .map_err(|e| SignatureError::Base64(e.to_string()))?;
        let signature = Signature::from_slice(&sig_bytes)
            .map_err(|e| SignatureError::InvalidSignature(e.to_string()))?;

        Ok(ParsedSignature {
            key_id,
            scheme,
            signature,
        })
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }
}

/// Conventional signature location for an artifact: `<artifact>.sig`
pub fn default_signature_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(".");
    name.push(SIGNATURE_EXTENSION);
    PathBuf::from(name)
}

/// Result of signature verification for one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureOutcome {
    Verified { key_id: KeyId, origin: KeyOrigin },
    Missing,
    Malformed(String),
    UntrustedKey(KeyId),
    KeyUnresolvable { key_id: KeyId, reason: String },
    Mismatch(KeyId),
}

/// Verify an artifact against its detached signature.
///
/// The container is validated before any key is resolved. Returns `Err` only
/// when the artifact or an existing signature file cannot be read.
pub fn verify(
    artifact: &Path,
    signature: Option<&Path>,
    coordinate: &ModuleCoordinate,
    keys: &TrustedKeyStore,
) -> io::Result<SignatureOutcome> {
    let Some(signature_path) = signature else {
        return Ok(SignatureOutcome::Missing);
    };
    let raw = match fs::read(signature_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SignatureOutcome::Missing),
        Err(e) => return Err(e),
    };

    let parsed = match DetachedSignature::parse(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(path = %signature_path.display(), error = %e, "malformed signature");
            return Ok(SignatureOutcome::Malformed(e.to_string()));
        }
    };

    let resolved = match keys.resolve(&parsed.key_id, coordinate) {
        KeyResolution::Trusted(resolved) => resolved,
        KeyResolution::Untrusted => return Ok(SignatureOutcome::UntrustedKey(parsed.key_id)),
        KeyResolution::Unresolvable(reason) => {
            return Ok(SignatureOutcome::KeyUnresolvable {
                key_id: parsed.key_id,
                reason,
            })
        }
    };

    if check_signature(artifact, &resolved.key, &parsed)? {
        Ok(SignatureOutcome::Verified {
            key_id: parsed.key_id,
            origin: resolved.origin,
        })
    } else {
        Ok(SignatureOutcome::Mismatch(parsed.key_id))
    }
}

fn check_signature(artifact: &Path, key: &VerifyingKey, parsed: &ParsedSignature) -> io::Result<bool> {
    let valid = match parsed.scheme {
        SignatureScheme::Prehashed => key
            .verify_prehashed_strict(prehash_file(artifact)?, Some(SIGNATURE_CONTEXT), &parsed.signature)
            .is_ok(),
        SignatureScheme::Pure => key.verify_strict(&fs::read(artifact)?, &parsed.signature).is_ok(),
    };
    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{encode_verifying_key, generate_keypair};
    use crate::policy::PolicyStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn coord() -> ModuleCoordinate {
        ModuleCoordinate::new("com.acme", "plugin", "2.0")
    }

    fn store_trusting(key: &SigningKey) -> TrustedKeyStore {
        let verifying = key.verifying_key();
        let doc = format!(
            "[[trusted_keys]]\nid = \"{}\"\npublic_key = \"{}\"\n",
            key_id_of(&verifying),
            encode_verifying_key(&verifying)
        );
        TrustedKeyStore::new(Arc::new(PolicyStore::from_toml_str(&doc).unwrap()))
    }

    fn signed_artifact(dir: &TempDir, key: &SigningKey, content: &[u8]) -> (PathBuf, PathBuf) {
        let artifact = dir.path().join("plugin-2.0.jar");
        fs::write(&artifact, content).unwrap();
        let sig_path = default_signature_path(&artifact);
        DetachedSignature::sign_file(&artifact, key)
            .unwrap()
            .write_to_file(&sig_path)
            .unwrap();
        (artifact, sig_path)
    }

    #[test]
    fn test_default_signature_path() {
        assert_eq!(
            default_signature_path(Path::new("/repo/lib-1.0.jar")),
            PathBuf::from("/repo/lib-1.0.jar.sig")
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let dir = TempDir::new().unwrap();
        let key = generate_keypair();
        let (artifact, sig) = signed_artifact(&dir, &key, b"plugin bytes");

        let outcome = verify(&artifact, Some(sig.as_path()), &coord(), &store_trusting(&key)).unwrap();
        assert_eq!(
            outcome,
            SignatureOutcome::Verified {
                key_id: key_id_of(&key.verifying_key()),
                origin: KeyOrigin::Policy,
            }
        );
    }

    #[test]
    fn test_tampered_artifact_is_mismatch() {
        let dir = TempDir::new().unwrap();
        let key = generate_keypair();
        let (artifact, sig) = signed_artifact(&dir, &key, b"plugin bytes");
        fs::write(&artifact, b"plugin bytez").unwrap();

        let outcome = verify(&artifact, Some(sig.as_path()), &coord(), &store_trusting(&key)).unwrap();
        assert!(matches!(outcome, SignatureOutcome::Mismatch(_)));
    }

    #[test]
    fn test_corrupted_signature_is_mismatch() {
        let dir = TempDir::new().unwrap();
        let key = generate_keypair();
        let (artifact, sig) = signed_artifact(&dir, &key, b"plugin bytes");

        let mut container: DetachedSignature =
            serde_json::from_slice(&fs::read(&sig).unwrap()).unwrap();
        let mut bytes = base64::engine::general_purpose::STANDARD
            .decode(&container.signature)
            .unwrap();
        bytes[10] ^= 0xff;
        container.signature = base64::engine::general_purpose::STANDARD.encode(bytes);
        container.write_to_file(&sig).unwrap();

        let outcome = verify(&artifact, Some(sig.as_path()), &coord(), &store_trusting(&key)).unwrap();
        assert!(matches!(
            outcome,
            SignatureOutcome::Mismatch(_) | SignatureOutcome::Malformed(_)
        ));
    }

    #[test]
    fn test_untrusted_signer() {
        let dir = TempDir::new().unwrap();
        let trusted = generate_keypair();
        let stranger = generate_keypair();
        let (artifact, sig) = signed_artifact(&dir, &stranger, b"plugin bytes");

        let outcome = verify(&artifact, Some(sig.as_path()), &coord(), &store_trusting(&trusted)).unwrap();
        assert_eq!(
            outcome,
            SignatureOutcome::UntrustedKey(key_id_of(&stranger.verifying_key()))
        );
    }

    #[test]
    fn test_missing_signature() {
        let dir = TempDir::new().unwrap();
        let key = generate_keypair();
        let artifact = dir.path().join("plugin-2.0.jar");
        fs::write(&artifact, b"plugin bytes").unwrap();
        let store = store_trusting(&key);

        assert_eq!(verify(&artifact, None, &coord(), &store).unwrap(), SignatureOutcome::Missing);
        let absent = default_signature_path(&artifact);
        assert_eq!(
            verify(&artifact, Some(absent.as_path()), &coord(), &store).unwrap(),
            SignatureOutcome::Missing
        );
    }

    #[test]
    fn test_malformed_container_checked_before_resolution() {
        let dir = TempDir::new().unwrap();
        let key = generate_keypair();
        let artifact = dir.path().join("plugin-2.0.jar");
        fs::write(&artifact, b"plugin bytes").unwrap();
        let sig = default_signature_path(&artifact);
        let store = store_trusting(&key);

        for garbage in [
            "not json".to_string(),
            r#"{"format":"pgp","algorithm":"ed25519","key_id":"ABCD","signature":""}"#.to_string(),
            r#"{"format":"depgate-signature/1","algorithm":"rsa","key_id":"ABCD","signature":""}"#
                .to_string(),
            r#"{"format":"depgate-signature/1","algorithm":"ed25519","key_id":"zz","signature":""}"#
                .to_string(),
            r#"{"format":"depgate-signature/1","algorithm":"ed25519","key_id":"ABCD","signature":"AAAA"}"#
                .to_string(),
        ] {
            fs::write(&sig, &garbage).unwrap();
            let outcome = verify(&artifact, Some(sig.as_path()), &coord(), &store).unwrap();
            assert!(
                matches!(outcome, SignatureOutcome::Malformed(_)),
                "{} -> {:?}",
                garbage,
                outcome
            );
        }
        assert!(store.keyring().is_empty());
    }

    #[test]
    fn test_parse_round_trip() {
        let key = generate_keypair();
        let container = DetachedSignature::sign(b"bytes", &key);
        let parsed = DetachedSignature::parse(container.to_json().unwrap().as_bytes()).unwrap();
        assert_eq!(parsed.key_id, key_id_of(&key.verifying_key()));
    }

    #[test]
    fn test_sign_file_streams_prehashed_signature() {
        let dir = TempDir::new().unwrap();
        let key = generate_keypair();
        // Spans several read chunks.
        let content: Vec<u8> = (0..3 * READ_BUFFER_SIZE + 17).map(|i| (i % 251) as u8).collect();
        let (artifact, sig) = signed_artifact(&dir, &key, &content);

        let parsed = DetachedSignature::parse(&fs::read(&sig).unwrap()).unwrap();
        assert_eq!(parsed.scheme, SignatureScheme::Prehashed);
        key.verifying_key()
            .verify_prehashed_strict(
                Sha512::new_with_prefix(&content),
                Some(SIGNATURE_CONTEXT),
                &parsed.signature,
            )
            .unwrap();
        assert!(matches!(
            verify(&artifact, Some(sig.as_path()), &coord(), &store_trusting(&key)).unwrap(),
            SignatureOutcome::Verified { .. }
        ));

        let mut tampered = content.clone();
        tampered[2 * READ_BUFFER_SIZE + 5] ^= 0x01;
        fs::write(&artifact, &tampered).unwrap();
        assert!(matches!(
            verify(&artifact, Some(sig.as_path()), &coord(), &store_trusting(&key)).unwrap(),
            SignatureOutcome::Mismatch(_)
        ));
    }

    #[test]
    fn test_pure_container_still_verifies() {
        let dir = TempDir::new().unwrap();
        let key = generate_keypair();
        let artifact = dir.path().join("plugin-2.0.jar");
        fs::write(&artifact, b"plugin bytes").unwrap();
        let sig = default_signature_path(&artifact);
        let container = DetachedSignature::sign(b"plugin bytes", &key);
        assert_eq!(container.algorithm, SIGNATURE_ALGORITHM);
        container.write_to_file(&sig).unwrap();

        assert!(matches!(
            verify(&artifact, Some(sig.as_path()), &coord(), &store_trusting(&key)).unwrap(),
            SignatureOutcome::Verified { .. }
        ));

        // The same signature relabelled as prehashed no longer verifies.
        let mut relabelled = container;
        relabelled.algorithm = SIGNATURE_ALGORITHM_PREHASHED.to_string();
        relabelled.write_to_file(&sig).unwrap();
        assert!(matches!(
            verify(&artifact, Some(sig.as_path()), &coord(), &store_trusting(&key)).unwrap(),
            SignatureOutcome::Mismatch(_)
        ));
    }
}
