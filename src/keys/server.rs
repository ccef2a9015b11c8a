//! Keyserver seam
//!
//! Network keyserver clients live outside this crate; they plug in through
//! [`KeyServer`]. Every fetch runs on its own thread and is abandoned after
//! the configured timeout.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use depgate_metadata::KeyId;
use ed25519_dalek::VerifyingKey;
use thiserror::Error;

use super::material::decode_verifying_key;

/// Errors from a remote key fetch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyFetchError {
    #[error("key {0} not found on keyserver")]
    NotFound(KeyId),

    #[error("keyserver request failed: {0}")]
    Network(String),

    #[error("keyserver did not answer within {0:?}")]
    TimedOut(Duration),

    #[error("keyserver returned invalid key material: {0}")]
    InvalidKey(String),

    #[error("no keyserver configured")]
    NoKeyServer,
}

/// Source of public keys that are not available locally
pub trait KeyServer: Send + Sync {
    fn fetch(&self, key_id: &KeyId) -> Result<VerifyingKey, KeyFetchError>;
}

/// Run a fetch on a helper thread, giving up after `timeout`.
///
/// A timed-out fetch thread is detached and its late result dropped.
pub fn fetch_with_timeout(
    server: Arc<dyn KeyServer>,
    key_id: &KeyId,
    timeout: Duration,
) -> Result<VerifyingKey, KeyFetchError> {
    let (tx, rx) = mpsc::channel();
    let id = key_id.clone();
    thread::spawn(move || {
        let _ = tx.send(server.fetch(&id));
    });

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(KeyFetchError::TimedOut(timeout)),
        Err(RecvTimeoutError::Disconnected) => {
            Err(KeyFetchError::Network("key fetch aborted".to_string()))
        }
    }
}

/// Keyserver backed by a directory of exported keys (`<KEYID>.pub`, base64),
/// e.g. a mirrored keyserver export on a shared volume
#[derive(Debug, Clone)]
pub struct DirectoryKeyServer {
    root: PathBuf,
}

impl DirectoryKeyServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl KeyServer for DirectoryKeyServer {
    fn fetch(&self, key_id: &KeyId) -> Result<VerifyingKey, KeyFetchError> {
        let path = self.root.join(format!("{}.pub", key_id));
        let encoded = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(KeyFetchError::NotFound(key_id.clone()))
            }
            Err(e) => return Err(KeyFetchError::Network(e.to_string())),
        };
        decode_verifying_key(&encoded).map_err(|e| KeyFetchError::InvalidKey(e.to_string()))
    }
}
