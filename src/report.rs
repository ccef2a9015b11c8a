//! Run report (run_report.json) and its text rendering

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use crate::outcome::{ArtifactOutcome, Severity};

/// Schema version for run_report.json
pub const RUN_REPORT_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for run_report.json
pub const RUN_REPORT_SCHEMA_ID: &str = "depgate/run_report@1";

/// Exit code for a run with fatal verification failures
pub const EXIT_CODE_VERIFICATION_FAILED: i32 = 1;

/// Result of one verification run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// Run identifier
    pub run_id: String,

    /// When the report was created
    pub created_at: DateTime<Utc>,

    /// Version of the policy the run verified against
    pub policy_version: String,

    /// One entry per artifact, sorted by coordinate then path
    pub entries: Vec<ArtifactOutcome>,

    /// Entries whose outcome is fatal
    pub fatal_count: usize,

    /// Entries with a non-fatal problem
    pub warning_count: usize,

    /// Entries skipped by an exemption
    pub exempt_count: usize,

    /// Artifacts without an outcome because the run was cut short
    #[serde(default)]
    pub not_verified: usize,

    /// Remaining work was cancelled (externally or by fail-fast)
    pub cancelled: bool,

    pub has_fatal_failure: bool,
}

/// Build a report from per-artifact outcomes in any completion order.
///
/// Entries for the same (coordinate, path) collapse into the most severe one.
pub fn aggregate(
    run_id: &str,
    policy_version: &str,
    mut outcomes: Vec<ArtifactOutcome>,
    not_verified: usize,
) -> RunReport {
    outcomes.sort_by(|a, b| {
        a.coordinate
            .cmp(&b.coordinate)
            .then_with(|| a.path.cmp(&b.path))
            .then_with(|| b.outcome.severity().cmp(&a.outcome.severity()))
    });
    outcomes.dedup_by(|later, kept| later.coordinate == kept.coordinate && later.path == kept.path);

    let fatal_count = outcomes.iter().filter(|e| e.is_fatal()).count();
    let warning_count = outcomes.iter().filter(|e| e.is_warning()).count();
    let exempt_count = outcomes.iter().filter(|e| e.exempt).count();

    RunReport {
        schema_version: RUN_REPORT_SCHEMA_VERSION,
        schema_id: RUN_REPORT_SCHEMA_ID.to_string(),
        run_id: run_id.to_string(),
        created_at: Utc::now(),
        policy_version: policy_version.to_string(),
        entries: outcomes,
        fatal_count,
        warning_count,
        exempt_count,
        not_verified,
        cancelled: not_verified > 0,
        has_fatal_failure: fatal_count > 0,
    }
}

impl RunReport {
    /// Build signal: no fatal outcome and every artifact verified
    pub fn passed(&self) -> bool {
        !self.has_fatal_failure && !self.cancelled
    }

    pub fn fatal_failures(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.entries.iter().filter(|e| e.is_fatal())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.entries.iter().filter(|e| e.is_warning())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })?;
        fs::write(path, json)
    }

    /// Load from file
    pub fn from_file(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", e))
        })
    }
}

fn headline(report: &RunReport) -> String {
    let total = report.entries.len() + report.not_verified;
    if report.has_fatal_failure {
        format!(
            "Verification failed: {} fatal, {} warning(s), {} artifact(s)",
            report.fatal_count, report.warning_count, total
        )
    } else if report.cancelled {
        format!(
            "Verification cancelled: {} of {} artifact(s) not verified",
            report.not_verified, total
        )
    } else if report.warning_count > 0 {
        format!(
            "Verification passed with {} warning(s): {} artifact(s)",
            report.warning_count, total
        )
    } else {
        format!("Verification passed: {} artifact(s)", total)
    }
}

/// Render a report as plain text: a headline, then one line per problem
pub fn render_text(report: &RunReport) -> String {
    let mut out = headline(report);
    out.push('\n');

    for entry in &report.entries {
        let problems: Vec<_> = if entry.problems.is_empty() {
            vec![&entry.outcome]
        } else {
            entry.problems.iter().collect()
        };
        for problem in problems {
            let explanation = problem.explain(&entry.coordinate);
            let tag = match explanation.severity {
                Severity::Ok => continue,
                Severity::Warning => "WARN ",
                Severity::Fatal => "FATAL",
            };
            let _ = write!(
                out,
                "  [{}] {} ({}): {}",
                tag,
                explanation.coordinate,
                entry.path.display(),
                explanation.summary
            );
            for (name, value) in &explanation.details {
                let _ = write!(out, " {}={}", name, value);
            }
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::outcome::OutcomeKind;
    use depgate_metadata::{ChecksumAlgorithm, KeyId, ModuleCoordinate};
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn entry(name: &str, kind: OutcomeKind, mode: Mode) -> ArtifactOutcome {
        ArtifactOutcome::from_checks(
            ModuleCoordinate::new("com.acme", name, "1.0"),
            PathBuf::from(format!("{}-1.0.jar", name)),
            vec![kind.classify(mode, false)],
        )
    }

    fn sample() -> Vec<ArtifactOutcome> {
        vec![
            entry("zeta", OutcomeKind::Verified, Mode::Strict),
            entry(
                "beta",
                OutcomeKind::ChecksumMismatch {
                    algorithm: ChecksumAlgorithm::Sha256,
                    expected: "abc123".into(),
                    actual: "def456".into(),
                },
                Mode::Strict,
            ),
            entry("alpha", OutcomeKind::MissingChecksum, Mode::Lenient),
            entry(
                "gamma",
                OutcomeKind::UntrustedKey {
                    key_id: KeyId::parse("0x1234").unwrap(),
                },
                Mode::Strict,
            ),
        ]
    }

    #[test]
    fn test_aggregate_counts() {
        let report = aggregate("run-1", "v1", sample(), 0);
        assert_eq!(report.entries.len(), 4);
        assert_eq!(report.fatal_count, 2);
        assert_eq!(report.warning_count, 1);
        assert!(report.has_fatal_failure);
        assert!(!report.passed());
        assert_eq!(report.fatal_failures().count(), 2);
    }

    #[test]
    fn test_aggregate_order_is_independent_of_input_order() {
        let forward = aggregate("run-1", "v1", sample(), 0);
        let mut reversed_input = sample();
        reversed_input.reverse();
        let reversed = aggregate("run-2", "v1", reversed_input, 0);

        assert_eq!(
            serde_json::to_string(&forward.entries).unwrap(),
            serde_json::to_string(&reversed.entries).unwrap()
        );
        let names: Vec<_> = forward
            .entries
            .iter()
            .map(|e| e.coordinate.name.as_str())
            .collect();
        assert_eq!(names, vec!["alpha", "beta", "gamma", "zeta"]);
    }

    #[test]
    fn test_duplicates_keep_most_severe() {
        let outcomes = vec![
            entry("lib", OutcomeKind::Verified, Mode::Strict),
            entry("lib", OutcomeKind::DeletedArtifact, Mode::Strict),
        ];
        let report = aggregate("run-1", "v1", outcomes, 0);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].outcome.kind, OutcomeKind::DeletedArtifact);
    }

    #[test]
    fn test_warnings_only_passes() {
        let outcomes = vec![
            entry("a", OutcomeKind::Verified, Mode::Lenient),
            entry("b", OutcomeKind::SignatureMissing, Mode::Lenient),
        ];
        let report = aggregate("run-1", "v1", outcomes, 0);
        assert!(report.passed());
        assert_eq!(report.warnings().count(), 1);
    }

    #[test]
    fn test_unverified_artifacts_mark_cancelled() {
        let report = aggregate("run-1", "v1", vec![entry("a", OutcomeKind::Verified, Mode::Strict)], 3);
        assert!(report.cancelled);
        assert!(!report.passed());
        assert!(render_text(&report).starts_with("Verification cancelled: 3 of 4"));
    }

    #[test]
    fn test_render_text() {
        let report = aggregate("run-1", "v1", sample(), 0);
        let text = render_text(&report);
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(
            lines[0],
            "Verification failed: 2 fatal, 1 warning(s), 4 artifact(s)"
        );
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("  [WARN ] com.acme:alpha:1.0"));
        assert!(lines[2].contains("[FATAL] com.acme:beta:1.0"));
        assert!(lines[2].contains("algorithm=sha256 expected=abc123 actual=def456"));
        assert!(lines[3].contains("key_id=1234"));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run_report.json");
        let report = aggregate("run-1", "v1", sample(), 0);
        report.write_to_file(&path).unwrap();

        let loaded = RunReport::from_file(&path).unwrap();
        assert_eq!(loaded, report);
        assert_eq!(loaded.schema_id, RUN_REPORT_SCHEMA_ID);
    }
}
