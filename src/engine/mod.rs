//! Verification engine
//!
//! Verifies a run's artifacts on a bounded pool of scoped worker threads.
//! Workers pull artifacts from a shared index, so completion order is
//! arbitrary; the report is sorted afterwards.
//!
//! The checksum cache lives on the engine and carries over between runs. Key
//! resolution state is per run (see [`RunContext`]).

mod context;
mod state;

pub use context::RunContext;
pub use state::{ArtifactState, EngineState, InvalidTransition, RunProgress};

use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::checksum::ChecksumVerifier;
use crate::config::{EngineConfig, EngineConfigError};
use crate::keys::{DirectoryKeyServer, KeyCache, KeyCacheError, KeyServer, TrustedKeyStore};
use crate::outcome::{ArtifactOutcome, OutcomeKind, VerificationOutcome};
use crate::policy::PolicyStore;
use crate::report::{aggregate, RunReport};
use crate::signature;

/// Errors that abort a run
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] EngineConfigError),

    #[error("key cache error: {0}")]
    KeyCache(#[from] KeyCacheError),

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("engine is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Default)]
struct Collected {
    outcomes: Vec<ArtifactOutcome>,
    error: Option<EngineError>,
}

/// Verification engine
pub struct Engine {
    config: EngineConfig,
    checksums: ChecksumVerifier,
    key_cache: Option<Arc<KeyCache>>,
    key_server: Option<Arc<dyn KeyServer>>,
    state: Mutex<EngineState>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("key_cache", &self.key_cache)
            .field("has_key_server", &self.key_server.is_some())
            .field("state", &self.state())
            .finish()
    }
}

impl Engine {
    /// Build an engine, opening the key cache and keyserver the config names
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let key_cache = match &config.key_cache_dir {
            Some(dir) => Some(Arc::new(KeyCache::open(dir)?)),
            None => None,
        };
        let key_server = config
            .keyserver_dir
            .as_ref()
            .map(|dir| Arc::new(DirectoryKeyServer::new(dir.clone())) as Arc<dyn KeyServer>);

        Ok(Self {
            config,
            checksums: ChecksumVerifier::new(),
            key_cache,
            key_server,
            state: Mutex::new(EngineState::Idle),
        })
    }

    /// Replace the keyserver
    pub fn with_key_server(mut self, server: Arc<dyn KeyServer>) -> Self {
        self.key_server = Some(server);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn checksums(&self) -> &ChecksumVerifier {
        &self.checksums
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fresh run context wired to this engine's key cache and keyserver
    pub fn context(&self, policy: Arc<PolicyStore>) -> RunContext {
        let mut keys = TrustedKeyStore::new(Arc::clone(&policy));
        if let Some(cache) = &self.key_cache {
            keys = keys.with_cache(Arc::clone(cache));
        }
        if let Some(server) = &self.key_server {
            keys = keys.with_server(Arc::clone(server), self.config.key_fetch_timeout());
        }
        RunContext::new(policy).with_keys(keys)
    }

    /// Verify artifacts under a policy with a fresh context
    pub fn run(&self, artifacts: &[Artifact], policy: Arc<PolicyStore>) -> Result<RunReport> {
        self.verify_all(artifacts, &self.context(policy))
    }

    /// Verify every artifact and aggregate the outcomes.
    ///
    /// Per-artifact failures are reported as outcomes. Only an artifact that
    /// exists but cannot be read aborts the run.
    pub fn verify_all(&self, artifacts: &[Artifact], ctx: &RunContext) -> Result<RunReport> {
        self.transition(EngineState::Running)?;
        let result = self.execute(artifacts, ctx);
        let next = if result.is_ok() {
            EngineState::Completed
        } else {
            EngineState::Idle
        };
        if let Err(e) = self.transition(next) {
            warn!(run_id = %ctx.run_id, error = %e, state = ?next, "engine state not updated");
        }
        result
    }

    fn transition(&self, to: EngineState) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.can_transition_to(to) {
            return Err(EngineError::AlreadyRunning);
        }
        *state = to;
        Ok(())
    }

    fn execute(&self, artifacts: &[Artifact], ctx: &RunContext) -> Result<RunReport> {
        let started = Instant::now();
        let workers = self.config.worker_count().min(artifacts.len()).max(1);
        info!(
            run_id = %ctx.run_id,
            artifacts = artifacts.len(),
            workers,
            mode = ?self.config.mode,
            failure_mode = ?self.config.failure_mode,
            "verification started"
        );

        let progress = RunProgress::new(artifacts.len());
        let next = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);
        let collected = Mutex::new(Collected::default());

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| self.work(artifacts, ctx, &progress, &next, &halted, &collected));
            }
        });

        let collected = collected.into_inner().unwrap_or_else(|e| e.into_inner());
        if let Some(err) = collected.error {
            warn!(run_id = %ctx.run_id, error = %err, "verification aborted");
            return Err(err);
        }

        let report = aggregate(
            &ctx.run_id,
            ctx.policy.version(),
            collected.outcomes,
            progress.unfinished(),
        );
        info!(
            run_id = %ctx.run_id,
            fatal = report.fatal_count,
            warnings = report.warning_count,
            not_verified = report.not_verified,
            duration_ms = started.elapsed().as_millis() as u64,
            "verification finished"
        );
        Ok(report)
    }

    fn should_stop(ctx: &RunContext, halted: &AtomicBool) -> bool {
        ctx.cancel.is_cancelled() || halted.load(Ordering::SeqCst)
    }

    fn work(
        &self,
        artifacts: &[Artifact],
        ctx: &RunContext,
        progress: &RunProgress,
        next: &AtomicUsize,
        halted: &AtomicBool,
        collected: &Mutex<Collected>,
    ) {
        loop {
            if Self::should_stop(ctx, halted) {
                return;
            }
            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some(artifact) = artifacts.get(index) else {
                return;
            };
            mark(progress, index, ArtifactState::Verifying);

            let result = self.verify_artifact(artifact, ctx, halted);

            // Checked under the lock so nothing lands after a fail-fast halt.
            let mut collected = collected.lock().unwrap_or_else(|e| e.into_inner());
            match result {
                Ok(Some(outcome)) if !Self::should_stop(ctx, halted) => {
                    let fatal = outcome.is_fatal();
                    debug!(
                        coordinate = %outcome.coordinate,
                        kind = outcome.outcome.kind.name(),
                        fatal,
                        "artifact verified"
                    );
                    if fatal {
                        mark(progress, index, ArtifactState::Failed);
                        if self.config.is_fail_fast() {
                            info!(coordinate = %outcome.coordinate, "fatal outcome, stopping remaining work");
                            halted.store(true, Ordering::SeqCst);
                        }
                    } else {
                        mark(progress, index, ArtifactState::Verified);
                    }
                    collected.outcomes.push(outcome);
                }
                Ok(_) => {
                    debug!(coordinate = %artifact.coordinate, "result discarded after cancellation");
                    mark(progress, index, ArtifactState::Discarded);
                }
                Err(err) => {
                    mark(progress, index, ArtifactState::Discarded);
                    collected.error.get_or_insert(err);
                    halted.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    /// Verify one artifact; `None` means the work was cancelled midway
    fn verify_artifact(
        &self,
        artifact: &Artifact,
        ctx: &RunContext,
        halted: &AtomicBool,
    ) -> Result<Option<ArtifactOutcome>> {
        let coordinate = &artifact.coordinate;
        let policy = &ctx.policy;
        let entry = policy.lookup(coordinate);

        if entry.is_skipped() {
            debug!(coordinate = %coordinate, "exempt from verification");
            return Ok(Some(ArtifactOutcome::exempt(
                coordinate.clone(),
                artifact.path.clone(),
            )));
        }

        let deleted = || ArtifactOutcome::deleted(coordinate.clone(), artifact.path.clone());
        let io_error = |source: io::Error| EngineError::Io {
            path: artifact.path.clone(),
            source,
        };

        match fs::metadata(&artifact.path) {
            Ok(metadata) => {
                if let Some(expected) = artifact.length.filter(|len| *len != metadata.len()) {
                    warn!(
                        coordinate = %coordinate,
                        expected,
                        actual = metadata.len(),
                        "artifact length changed since resolution"
                    );
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Some(deleted())),
            Err(e) => return Err(io_error(e)),
        }

        let mode = self.config.mode;
        let allow_missing = entry.allows_missing();
        let mut checks: Vec<VerificationOutcome> = Vec::new();

        if policy.requires_checksum(coordinate) {
            match self
                .checksums
                .verify(&artifact.path, &entry.checksums, policy.version())
            {
                Ok(outcome) => checks.extend(
                    OutcomeKind::from_checksum(&outcome)
                        .into_iter()
                        .map(|kind| kind.classify(mode, allow_missing)),
                ),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Some(deleted())),
                Err(e) => return Err(io_error(e)),
            }
        }

        if Self::should_stop(ctx, halted) {
            return Ok(None);
        }

        if policy.requires_signature(coordinate) {
            let signature_path = artifact.signature_path();
            match signature::verify(&artifact.path, Some(signature_path.as_path()), coordinate, &ctx.keys) {
                Ok(outcome) => {
                    checks.push(OutcomeKind::from_signature(&outcome).classify(mode, allow_missing))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Some(deleted())),
                Err(e) => return Err(io_error(e)),
            }
        }

        Ok(Some(ArtifactOutcome::from_checks(
            coordinate.clone(),
            artifact.path.clone(),
            checks,
        )))
    }
}

fn mark(progress: &RunProgress, index: usize, to: ArtifactState) {
    if let Err(e) = progress.transition(index, to) {
        warn!(error = %e, "artifact state not updated");
    }
}
