//! Local on-disk key cache (keys.jsonl)
//!
//! One JSON record per line. The file is only ever appended to; when a key id
//! appears more than once the last record wins. Writes are serialized through
//! the in-memory index lock so concurrent resolvers never append the same key
//! twice.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use depgate_metadata::KeyId;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::material::{compute_key_fingerprint, decode_verifying_key, encode_verifying_key};

/// File name of the cache inside the cache directory
pub const KEY_CACHE_FILENAME: &str = "keys.jsonl";

/// Errors from key cache operations
#[derive(Debug, Error)]
pub enum KeyCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A cached public key record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedKey {
    pub key_id: KeyId,
    /// Base64-encoded Ed25519 public key
    pub public_key: String,
    pub fingerprint: String,
    pub fetched_at: DateTime<Utc>,
}

/// Append-only key cache shared by every run on this machine
#[derive(Debug)]
pub struct KeyCache {
    path: PathBuf,
    entries: Mutex<BTreeMap<KeyId, CachedKey>>,
}

impl KeyCache {
    /// Open (creating if needed) the cache in `dir`.
    ///
    /// Unparsable lines are skipped with a warning; a damaged cache only
    /// costs a refetch.
    pub fn open(dir: &Path) -> Result<Self, KeyCacheError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(KEY_CACHE_FILENAME);

        let mut entries = BTreeMap::new();
        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            for (index, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<CachedKey>(line) {
                    Ok(record) => {
                        entries.insert(record.key_id.clone(), record);
                    }
                    Err(e) => warn!(
                        path = %path.display(),
                        line = index + 1,
                        error = %e,
                        "skipping malformed key cache record"
                    ),
                }
            }
        }

        debug!(path = %path.display(), keys = entries.len(), "opened key cache");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<KeyId, CachedKey>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Raw cached record for a key id
    pub fn record(&self, key_id: &KeyId) -> Option<CachedKey> {
        self.entries().get(key_id).cloned()
    }

    /// Cached public key for a key id.
    ///
    /// Records whose material does not match the key id are ignored.
    pub fn get(&self, key_id: &KeyId) -> Option<VerifyingKey> {
        let record = self.record(key_id)?;
        match decode_verifying_key(&record.public_key) {
            Ok(key) if key_id.matches_fingerprint(&compute_key_fingerprint(&key)) => Some(key),
            Ok(_) => {
                warn!(key_id = %key_id, "cached key material does not match key id");
                None
            }
            Err(e) => {
                warn!(key_id = %key_id, error = %e, "cached key material is invalid");
                None
            }
        }
    }

    /// Record a fetched key. Returns `false` if the identical key was
    /// already cached and nothing was written.
    pub fn insert(&self, key_id: &KeyId, key: &VerifyingKey) -> Result<bool, KeyCacheError> {
        let public_key = encode_verifying_key(key);
        let mut entries = self.entries();
        if entries
            .get(key_id)
            .map_or(false, |existing| existing.public_key == public_key)
        {
            return Ok(false);
        }

        let record = CachedKey {
            key_id: key_id.clone(),
            public_key,
            fingerprint: compute_key_fingerprint(key),
            fetched_at: Utc::now(),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;

        debug!(key_id = %key_id, path = %self.path.display(), "cached key");
        entries.insert(key_id.clone(), record);
        Ok(true)
    }
}
