//! Checksum verification
//!
//! Digests are computed in a single streaming pass over the artifact, one
//! hasher per configured algorithm. Outcomes are cached by content identity
//! and policy version, so re-verifying an unchanged artifact under an
//! unchanged policy reads nothing.
//!
//! Content identity is path, length and modification time, plus inode and
//! status-change time on unix. Any write bumps the change time and user code
//! cannot set it back, so restoring the mtime never revives a stale entry.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use depgate_metadata::{ChecksumAlgorithm, ExpectedChecksum};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use tracing::debug;

pub(crate) const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Identity of an artifact's content as observed on disk
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentIdentity {
    pub path: PathBuf,
    pub len: u64,
    pub modified: Option<SystemTime>,
    /// Inode and status-change time (seconds, nanoseconds); unix only
    pub change: Option<(u64, i64, i64)>,
}

impl ContentIdentity {
    pub fn of(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            len: metadata.len(),
            modified: metadata.modified().ok(),
            change: change_stamp(&metadata),
        })
    }
}

#[cfg(unix)]
fn change_stamp(metadata: &fs::Metadata) -> Option<(u64, i64, i64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.ino(), metadata.ctime(), metadata.ctime_nsec()))
}

#[cfg(not(unix))]
fn change_stamp(_metadata: &fs::Metadata) -> Option<(u64, i64, i64)> {
    None
}

/// One algorithm whose computed digest differs from the expected one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumMismatch {
    pub algorithm: ChecksumAlgorithm,
    pub expected: String,
    pub actual: String,
}

/// Result of checksum verification for one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumOutcome {
    /// Every configured algorithm matched
    Verified,
    /// No checksum is configured for the artifact
    Missing,
    /// At least one algorithm mismatched; every mismatch is listed
    Mismatch(Vec<ChecksumMismatch>),
}

enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Sha256(h) => h.update(bytes),
            Hasher::Sha512(h) => h.update(bytes),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Hex digest of an in-memory buffer
pub fn digest_bytes(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(bytes);
    hasher.finalize_hex()
}

/// Compute the requested digests of a file in one pass
pub fn compute_file_digests(
    path: &Path,
    algorithms: &[ChecksumAlgorithm],
) -> io::Result<BTreeMap<ChecksumAlgorithm, String>> {
    let mut hashers: Vec<(ChecksumAlgorithm, Hasher)> =
        algorithms.iter().map(|a| (*a, Hasher::new(*a))).collect();

    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        for (_, hasher) in hashers.iter_mut() {
            hasher.update(&buffer[..n]);
        }
    }

    Ok(hashers
        .into_iter()
        .map(|(algorithm, hasher)| (algorithm, hasher.finalize_hex()))
        .collect())
}

/// Compare computed digests against expectations
pub fn compare(
    expected: &[ExpectedChecksum],
    actual: &BTreeMap<ChecksumAlgorithm, String>,
) -> ChecksumOutcome {
    if expected.is_empty() {
        return ChecksumOutcome::Missing;
    }

    let mismatches: Vec<ChecksumMismatch> = expected
        .iter()
        .filter_map(|e| {
            let computed = actual.get(&e.algorithm).map(String::as_str).unwrap_or("");
            (!e.matches(computed)).then(|| ChecksumMismatch {
                algorithm: e.algorithm,
                expected: e.value.clone(),
                actual: computed.to_string(),
            })
        })
        .collect();

    if mismatches.is_empty() {
        ChecksumOutcome::Verified
    } else {
        ChecksumOutcome::Mismatch(mismatches)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    content: ContentIdentity,
    policy_version: String,
}

/// Checksum verifier with an outcome cache shared across runs
#[derive(Debug, Default)]
pub struct ChecksumVerifier {
    cache: Mutex<HashMap<CacheKey, ChecksumOutcome>>,
    computations: AtomicU64,
    hits: AtomicU64,
}

impl ChecksumVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify an artifact file against its expected checksums.
    ///
    /// Returns `Err` only if the file cannot be inspected or read; a missing
    /// file surfaces as `io::ErrorKind::NotFound`.
    pub fn verify(
        &self,
        path: &Path,
        expected: &[ExpectedChecksum],
        policy_version: &str,
    ) -> io::Result<ChecksumOutcome> {
        let content = ContentIdentity::of(path)?;
        if expected.is_empty() {
            return Ok(ChecksumOutcome::Missing);
        }

        let key = CacheKey {
            content,
            policy_version: policy_version.to_string(),
        };
        if let Some(outcome) = self.cached(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(path = %path.display(), "checksum cache hit");
            return Ok(outcome);
        }

        let algorithms: Vec<ChecksumAlgorithm> = expected.iter().map(|e| e.algorithm).collect();
        let actual = compute_file_digests(path, &algorithms)?;
        self.computations.fetch_add(1, Ordering::Relaxed);

        let outcome = compare(expected, &actual);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, outcome.clone());
        }
        Ok(outcome)
    }

    fn cached(&self, key: &CacheKey) -> Option<ChecksumOutcome> {
        self.cache.lock().ok().and_then(|c| c.get(key).cloned())
    }

    /// Number of full digest computations performed
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Relaxed)
    }

    /// Number of verifications answered from the cache
    pub fn cache_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }
}
