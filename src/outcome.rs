//! Verification outcomes and their fatal/non-fatal classification
//!
//! Every artifact ends a run with exactly one [`ArtifactOutcome`]. The kinds
//! form a closed set; whether a kind is fatal depends on the engine [`Mode`]
//! and the coordinate's exemption, never on the kind alone.

use std::path::PathBuf;

use depgate_metadata::{ChecksumAlgorithm, KeyId, ModuleCoordinate};
use serde::{Deserialize, Serialize};

use crate::checksum::ChecksumOutcome;
use crate::config::Mode;
use crate::signature::SignatureOutcome;

/// Outcome kind for one verification check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Verified,
    ChecksumMismatch {
        algorithm: ChecksumAlgorithm,
        expected: String,
        actual: String,
    },
    MissingChecksum,
    SignatureMissing,
    UntrustedKey {
        key_id: KeyId,
    },
    SignatureMismatch {
        key_id: KeyId,
    },
    MalformedSignature {
        reason: String,
    },
    KeyUnresolvable {
        key_id: KeyId,
        reason: String,
    },
    DeletedArtifact,
}

impl OutcomeKind {
    /// Stable name used in reports
    pub fn name(&self) -> &'static str {
        match self {
            OutcomeKind::Verified => "VERIFIED",
            OutcomeKind::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            OutcomeKind::MissingChecksum => "MISSING_CHECKSUM",
            OutcomeKind::SignatureMissing => "SIGNATURE_MISSING",
            OutcomeKind::UntrustedKey { .. } => "UNTRUSTED_KEY",
            OutcomeKind::SignatureMismatch { .. } => "SIGNATURE_MISMATCH",
            OutcomeKind::MalformedSignature { .. } => "MALFORMED_SIGNATURE",
            OutcomeKind::KeyUnresolvable { .. } => "KEY_UNRESOLVABLE",
            OutcomeKind::DeletedArtifact => "DELETED_ARTIFACT",
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            OutcomeKind::Verified => "Artifact verified",
            OutcomeKind::ChecksumMismatch { .. } => "Checksum does not match",
            OutcomeKind::MissingChecksum => "No checksum configured",
            OutcomeKind::SignatureMissing => "No signature found",
            OutcomeKind::UntrustedKey { .. } => "Signed by an untrusted key",
            OutcomeKind::SignatureMismatch { .. } => "Signature does not verify",
            OutcomeKind::MalformedSignature { .. } => "Signature is malformed",
            OutcomeKind::KeyUnresolvable { .. } => "Signing key could not be resolved",
            OutcomeKind::DeletedArtifact => "Artifact file vanished before verification",
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, OutcomeKind::Verified)
    }

    /// Kinds that report absent verification material rather than bad material
    pub fn is_missing_material(&self) -> bool {
        matches!(
            self,
            OutcomeKind::MissingChecksum
                | OutcomeKind::SignatureMissing
                | OutcomeKind::KeyUnresolvable { .. }
        )
    }

    /// Classify under a mode; `allow_missing` is the per-coordinate exemption
    pub fn classify(self, mode: Mode, allow_missing: bool) -> VerificationOutcome {
        let fatal = match &self {
            OutcomeKind::Verified => false,
            kind if kind.is_missing_material() => mode == Mode::Strict && !allow_missing,
            _ => true,
        };
        VerificationOutcome { kind: self, fatal }
    }

    /// One kind per checksum problem; a verified checksum yields `Verified`
    pub fn from_checksum(outcome: &ChecksumOutcome) -> Vec<OutcomeKind> {
        match outcome {
            ChecksumOutcome::Verified => vec![OutcomeKind::Verified],
            ChecksumOutcome::Missing => vec![OutcomeKind::MissingChecksum],
            ChecksumOutcome::Mismatch(mismatches) => mismatches
                .iter()
                .map(|m| OutcomeKind::ChecksumMismatch {
                    algorithm: m.algorithm,
                    expected: m.expected.clone(),
                    actual: m.actual.clone(),
                })
                .collect(),
        }
    }

    pub fn from_signature(outcome: &SignatureOutcome) -> OutcomeKind {
        match outcome {
            SignatureOutcome::Verified { .. } => OutcomeKind::Verified,
            SignatureOutcome::Missing => OutcomeKind::SignatureMissing,
            SignatureOutcome::Malformed(reason) => OutcomeKind::MalformedSignature {
                reason: reason.clone(),
            },
            SignatureOutcome::UntrustedKey(key_id) => OutcomeKind::UntrustedKey {
                key_id: key_id.clone(),
            },
            SignatureOutcome::KeyUnresolvable { key_id, reason } => OutcomeKind::KeyUnresolvable {
                key_id: key_id.clone(),
                reason: reason.clone(),
            },
            SignatureOutcome::Mismatch(key_id) => OutcomeKind::SignatureMismatch {
                key_id: key_id.clone(),
            },
        }
    }

    fn details(&self) -> Vec<(&'static str, String)> {
        match self {
            OutcomeKind::ChecksumMismatch {
                algorithm,
                expected,
                actual,
            } => vec![
                ("algorithm", algorithm.to_string()),
                ("expected", expected.clone()),
                ("actual", actual.clone()),
            ],
            OutcomeKind::UntrustedKey { key_id } | OutcomeKind::SignatureMismatch { key_id } => {
                vec![("key_id", key_id.to_string())]
            }
            OutcomeKind::MalformedSignature { reason } => vec![("reason", reason.clone())],
            OutcomeKind::KeyUnresolvable { key_id, reason } => vec![
                ("key_id", key_id.to_string()),
                ("reason", reason.clone()),
            ],
            OutcomeKind::Verified
            | OutcomeKind::MissingChecksum
            | OutcomeKind::SignatureMissing
            | OutcomeKind::DeletedArtifact => Vec::new(),
        }
    }
}

/// Severity ordering used when escalating sub-outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Warning,
    Fatal,
}

/// A classified outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationOutcome {
    #[serde(flatten)]
    pub kind: OutcomeKind,
    pub fatal: bool,
}

impl VerificationOutcome {
    pub fn verified() -> Self {
        Self {
            kind: OutcomeKind::Verified,
            fatal: false,
        }
    }

    pub fn severity(&self) -> Severity {
        if self.fatal {
            Severity::Fatal
        } else if self.kind.is_verified() {
            Severity::Ok
        } else {
            Severity::Warning
        }
    }

    /// Structured explanation for a renderer
    pub fn explain(&self, coordinate: &ModuleCoordinate) -> Explanation {
        Explanation {
            coordinate: coordinate.clone(),
            kind: self.kind.name(),
            severity: self.severity(),
            summary: self.kind.description(),
            details: self.kind.details(),
        }
    }

    /// The most severe outcome; the first one wins ties
    pub fn most_severe(outcomes: &[VerificationOutcome]) -> VerificationOutcome {
        let mut worst: Option<&VerificationOutcome> = None;
        for outcome in outcomes {
            match worst {
                Some(current) if current.severity() >= outcome.severity() => {}
                _ => worst = Some(outcome),
            }
        }
        worst.cloned().unwrap_or_else(VerificationOutcome::verified)
    }
}

/// Renderer-independent explanation of an outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explanation {
    pub coordinate: ModuleCoordinate,
    pub kind: &'static str,
    pub severity: Severity,
    pub summary: &'static str,
    pub details: Vec<(&'static str, String)>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Final outcome for one artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOutcome {
    pub coordinate: ModuleCoordinate,
    pub path: PathBuf,
    /// Most severe of the sub-outcomes
    pub outcome: VerificationOutcome,
    /// Every non-verified sub-outcome, in check order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<VerificationOutcome>,
    /// Verification was skipped by policy
    #[serde(default, skip_serializing_if = "is_false")]
    pub exempt: bool,
}

impl ArtifactOutcome {
    /// Combine the sub-outcomes of every check performed on an artifact
    pub fn from_checks(
        coordinate: ModuleCoordinate,
        path: PathBuf,
        checks: Vec<VerificationOutcome>,
    ) -> Self {
        let outcome = VerificationOutcome::most_severe(&checks);
        let problems = checks
            .into_iter()
            .filter(|c| !c.kind.is_verified())
            .collect();
        Self {
            coordinate,
            path,
            outcome,
            problems,
            exempt: false,
        }
    }

    pub fn exempt(coordinate: ModuleCoordinate, path: PathBuf) -> Self {
        Self {
            coordinate,
            path,
            outcome: VerificationOutcome::verified(),
            problems: Vec::new(),
            exempt: true,
        }
    }

    pub fn deleted(coordinate: ModuleCoordinate, path: PathBuf) -> Self {
        let outcome = OutcomeKind::DeletedArtifact.classify(Mode::Strict, false);
        Self {
            coordinate,
            path,
            outcome: outcome.clone(),
            problems: vec![outcome],
            exempt: false,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.outcome.fatal
    }

    pub fn is_warning(&self) -> bool {
        self.outcome.severity() == Severity::Warning
    }
}
