//! depgate - build-dependency supply-chain verifier
//!
//! Checks resolved dependency artifacts against a trust policy before they
//! enter a build: content checksums for integrity, detached Ed25519
//! signatures from trusted publisher keys for authenticity. Every artifact
//! gets a classified outcome and the run yields one pass/fail signal.

pub mod artifact;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod engine;
pub mod keys;
pub mod outcome;
pub mod policy;
pub mod record;
pub mod report;
pub mod signature;

pub use artifact::{load_artifact_list, Artifact, ArtifactListError};
pub use cancel::CancellationToken;
pub use checksum::{ChecksumOutcome, ChecksumVerifier};
pub use config::{EngineConfig, FailureMode, Mode};
pub use engine::{Engine, EngineError, RunContext};
pub use keys::{KeyCache, KeyResolution, KeyServer, TrustedKeyStore};
pub use outcome::{ArtifactOutcome, OutcomeKind, VerificationOutcome};
pub use policy::{ConfigError, PolicyEntry, PolicyStore};
pub use report::{render_text, RunReport};
pub use signature::{DetachedSignature, SignatureOutcome};

pub use depgate_metadata::{KeyId, ModuleCoordinate, VerificationMetadata};
