//! Ed25519 key material: fingerprints, key ids and base64 encodings

use base64::Engine as _;
use depgate_metadata::KeyId;
use ed25519_dalek::{SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors decoding key material
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyMaterialError {
    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// Compute the SHA-256 fingerprint of an Ed25519 public key (uppercase hex)
pub fn compute_key_fingerprint(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode_upper(hasher.finalize())
}

/// Long key id of a public key: the trailing 16 hex digits of its fingerprint
pub fn key_id_of(key: &VerifyingKey) -> KeyId {
    KeyId::from_digest(&Sha256::digest(key.as_bytes()))
}

/// Generate a new Ed25519 keypair
pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut rand::thread_rng())
}

/// Encode a signing key to base64 for storage
pub fn encode_signing_key(key: &SigningKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.to_bytes())
}

/// Decode a signing key from base64
pub fn decode_signing_key(encoded: &str) -> Result<SigningKey, KeyMaterialError> {
    let bytes: [u8; 32] = decode_32(encoded)?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Encode a verifying key to base64 for storage
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    base64::engine::general_purpose::STANDARD.encode(key.as_bytes())
}

/// Decode a verifying key from base64
pub fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey, KeyMaterialError> {
    let bytes: [u8; 32] = decode_32(encoded)?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| KeyMaterialError::InvalidKey(e.to_string()))
}

fn decode_32(encoded: &str) -> Result<[u8; 32], KeyMaterialError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| KeyMaterialError::Base64(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| KeyMaterialError::InvalidKey("key must be 32 bytes".to_string()))
}
