//! Trusted key store
//!
//! Resolution order for a key id claimed by a signature on an artifact:
//!
//! 1. ignored globally or for the artifact's coordinate: untrusted
//! 2. not trusted for the coordinate: untrusted (nothing is fetched)
//! 3. key material from the run keyring, inline policy, the on-disk cache,
//!    then the keyserver
//!
//! Keyserver fetches happen at most once per key id per run. Concurrent
//! resolvers of the same key register in the in-flight map; the first one
//! performs the fetch and the rest wait on its condition variable.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use depgate_metadata::{KeyId, ModuleCoordinate};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::cache::KeyCache;
use super::material::compute_key_fingerprint;
use super::server::{fetch_with_timeout, KeyFetchError, KeyServer};
use crate::policy::PolicyStore;

/// Default bound on a single keyserver fetch
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where resolved key material came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyOrigin {
    Policy,
    Cache,
    Keyserver,
}

/// A key trusted for verification, with its material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key_id: KeyId,
    pub key: VerifyingKey,
    pub fingerprint: String,
    pub origin: KeyOrigin,
}

/// Trust decision for a key id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolution {
    Trusted(ResolvedKey),
    Untrusted,
    Unresolvable(String),
}

type FetchResult = Result<VerifyingKey, KeyFetchError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A keyserver fetch other resolvers can wait on
struct PendingFetch {
    result: Mutex<Option<FetchResult>>,
    ready: Condvar,
}

impl PendingFetch {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: FetchResult) {
        *lock(&self.result) = Some(result);
        self.ready.notify_all();
    }

    fn wait(&self) -> FetchResult {
        let mut guard = lock(&self.result);
        loop {
            if let Some(result) = guard.as_ref() {
                return result.clone();
            }
            guard = self.ready.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Per-run trusted key store
pub struct TrustedKeyStore {
    policy: Arc<PolicyStore>,
    cache: Option<Arc<KeyCache>>,
    server: Option<Arc<dyn KeyServer>>,
    fetch_timeout: Duration,
    /// Keys resolved during this run; only ever grows
    keyring: Mutex<BTreeMap<KeyId, ResolvedKey>>,
    in_flight: Mutex<HashMap<KeyId, Arc<PendingFetch>>>,
    fetches: AtomicU64,
}

impl fmt::Debug for TrustedKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedKeyStore")
            .field("cache", &self.cache)
            .field("has_server", &self.server.is_some())
            .field("fetch_timeout", &self.fetch_timeout)
            .field("resolved", &lock(&self.keyring).len())
            .finish()
    }
}

impl TrustedKeyStore {
    /// Key store backed by inline policy keys only
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self {
            policy,
            cache: None,
            server: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            keyring: Mutex::new(BTreeMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: Arc<KeyCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_server(mut self, server: Arc<dyn KeyServer>, timeout: Duration) -> Self {
        self.server = Some(server);
        self.fetch_timeout = timeout;
        self
    }

    /// Decide whether `key_id` may vouch for an artifact of `coordinate`
    pub fn resolve(&self, key_id: &KeyId, coordinate: &ModuleCoordinate) -> KeyResolution {
        if self.policy.is_ignored(key_id, coordinate) {
            debug!(key_id = %key_id, %coordinate, "key is ignored by policy");
            return KeyResolution::Untrusted;
        }
        if !self.policy.is_trusted(key_id, coordinate) {
            debug!(key_id = %key_id, %coordinate, "key is not trusted for coordinate");
            return KeyResolution::Untrusted;
        }

        if let Some(resolved) = lock(&self.keyring).get(key_id) {
            return KeyResolution::Trusted(resolved.clone());
        }

        let (key, origin) = match self.material(key_id) {
            Ok(found) => found,
            Err(reason) => return KeyResolution::Unresolvable(reason),
        };

        let fingerprint = compute_key_fingerprint(&key);
        if !key_id.matches_fingerprint(&fingerprint) {
            warn!(key_id = %key_id, %fingerprint, "key material does not match key id");
            return KeyResolution::Unresolvable(format!(
                "key material with fingerprint {} does not match key id",
                fingerprint
            ));
        }

        // Only material that matches its id is persisted.
        if origin == KeyOrigin::Keyserver {
            if let Some(cache) = &self.cache {
                if let Err(e) = cache.insert(key_id, &key) {
                    warn!(key_id = %key_id, error = %e, "failed to persist fetched key");
                }
            }
        }

        let resolved = ResolvedKey {
            key_id: key_id.clone(),
            key,
            fingerprint,
            origin,
        };
        let resolved = lock(&self.keyring)
            .entry(key_id.clone())
            .or_insert(resolved)
            .clone();
        KeyResolution::Trusted(resolved)
    }

    fn material(&self, key_id: &KeyId) -> Result<(VerifyingKey, KeyOrigin), String> {
        if let Some(key) = self.policy.inline_key(key_id) {
            return Ok((*key, KeyOrigin::Policy));
        }
        if let Some(key) = self.cache.as_ref().and_then(|c| c.get(key_id)) {
            return Ok((key, KeyOrigin::Cache));
        }
        if self.server.is_none() {
            return Err(format!("no key material available for {}", key_id));
        }

        let key = self.fetch_once(key_id).map_err(|e| e.to_string())?;
        Ok((key, KeyOrigin::Keyserver))
    }

    /// Fetch from the keyserver, sharing one fetch among concurrent callers
    /// and remembering the result (success or failure) for the whole run
    fn fetch_once(&self, key_id: &KeyId) -> FetchResult {
        let (pending, leader) = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key_id) {
                Some(pending) => (Arc::clone(pending), false),
                None => {
                    let pending = Arc::new(PendingFetch::new());
                    in_flight.insert(key_id.clone(), Arc::clone(&pending));
                    (pending, true)
                }
            }
        };

        if !leader {
            return pending.wait();
        }

        let result = match &self.server {
            Some(server) => {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                info!(key_id = %key_id, "fetching key from keyserver");
                fetch_with_timeout(Arc::clone(server), key_id, self.fetch_timeout)
            }
            None => Err(KeyFetchError::NoKeyServer),
        };
        if let Err(e) = &result {
            warn!(key_id = %key_id, error = %e, "key fetch failed");
        }
        pending.complete(result.clone());
        result
    }

    /// Number of keyserver fetches started in this run
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Keys resolved so far in this run
    pub fn keyring(&self) -> Vec<ResolvedKey> {
        lock(&self.keyring).values().cloned().collect()
    }
}
