//! Per-run context

use std::sync::Arc;

use ulid::Ulid;

use crate::cancel::CancellationToken;
use crate::keys::TrustedKeyStore;
use crate::policy::PolicyStore;

/// Everything a single run needs besides the engine itself
#[derive(Debug)]
pub struct RunContext {
    pub run_id: String,
    pub policy: Arc<PolicyStore>,
    pub keys: TrustedKeyStore,
    pub cancel: CancellationToken,
}

impl RunContext {
    /// Context with a fresh run id, inline policy keys only and no cancellation
    pub fn new(policy: Arc<PolicyStore>) -> Self {
        Self {
            run_id: Ulid::new().to_string(),
            keys: TrustedKeyStore::new(Arc::clone(&policy)),
            policy,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_keys(mut self, keys: TrustedKeyStore) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
