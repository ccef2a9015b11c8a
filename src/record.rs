//! Recording generated checksums into verification metadata
//!
//! Trust-on-first-use: digests are computed from the artifacts as they are now
//! and written with origin `generated`. Existing checksums are never replaced.

use std::io;
use std::path::PathBuf;

use depgate_metadata::{
    ChecksumAlgorithm, ChecksumDecl, ChecksumOrigin, ComponentDecl, Exemption, ExpectedChecksum,
    MetadataError, VerificationMetadata,
};
use thiserror::Error;
use tracing::debug;

use crate::artifact::Artifact;
use crate::checksum::compute_file_digests;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// What a recording pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSummary {
    /// Components created for previously unknown coordinates
    pub components_added: usize,
    /// Checksums written
    pub checksums_added: usize,
    /// Artifacts that already had every requested algorithm
    pub unchanged: usize,
}

/// Add generated checksums for every requested algorithm an artifact's entry
/// lacks. Exempt (`skip`) components are left alone.
pub fn record_checksums(
    metadata: &mut VerificationMetadata,
    artifacts: &[Artifact],
    algorithms: &[ChecksumAlgorithm],
) -> Result<RecordSummary, RecordError> {
    let mut summary = RecordSummary::default();

    for artifact in artifacts {
        let index = match metadata
            .components
            .iter()
            .position(|c| c.coordinate() == artifact.coordinate)
        {
            Some(index) => index,
            None => {
                metadata
                    .components
                    .push(ComponentDecl::for_coordinate(&artifact.coordinate));
                summary.components_added += 1;
                metadata.components.len() - 1
            }
        };
        let component = &mut metadata.components[index];
        if component.exemption == Some(Exemption::Skip) {
            summary.unchanged += 1;
            continue;
        }

        let present: Vec<ChecksumAlgorithm> = component
            .expected_checksums()?
            .iter()
            .map(|e| e.algorithm)
            .collect();
        let wanted: Vec<ChecksumAlgorithm> = algorithms
            .iter()
            .copied()
            .filter(|a| !present.contains(a))
            .collect();
        if wanted.is_empty() {
            summary.unchanged += 1;
            continue;
        }

        let digests = compute_file_digests(&artifact.path, &wanted).map_err(|source| {
            RecordError::Io {
                path: artifact.path.clone(),
                source,
            }
        })?;
        for (algorithm, value) in digests {
            let expected = ExpectedChecksum::new(algorithm, &value, ChecksumOrigin::Generated)?;
            component.checksums.push(ChecksumDecl::from_expected(&expected));
            summary.checksums_added += 1;
        }
        debug!(coordinate = %artifact.coordinate, algorithms = wanted.len(), "recorded checksums");
    }

    metadata.validate()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depgate_metadata::ModuleCoordinate;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_records_new_component() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib-1.0.jar");
        fs::write(&path, b"hello").unwrap();
        let artifacts = vec![Artifact::new(
            ModuleCoordinate::new("com.acme", "lib", "1.0"),
            path,
        )];

        let mut metadata = VerificationMetadata::default();
        let summary =
            record_checksums(&mut metadata, &artifacts, &[ChecksumAlgorithm::Sha256]).unwrap();

        assert_eq!(summary.components_added, 1);
        assert_eq!(summary.checksums_added, 1);
        let checksum = &metadata.components[0].checksums[0];
        assert_eq!(checksum.value, HELLO_SHA256);
        assert_eq!(checksum.origin, ChecksumOrigin::Generated);
    }

    #[test]
    fn test_declared_checksum_is_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib-1.0.jar");
        fs::write(&path, b"tampered").unwrap();
        let coordinate = ModuleCoordinate::new("com.acme", "lib", "1.0");

        let mut metadata = VerificationMetadata::parse(&format!(
            r#"
[[components]]
group = "com.acme"
name = "lib"
version = "1.0"
checksums = [{{ algorithm = "sha256", value = "{}" }}]
"#,
            HELLO_SHA256
        ))
        .unwrap();

        let summary = record_checksums(
            &mut metadata,
            &[Artifact::new(coordinate, path)],
            &[ChecksumAlgorithm::Sha256, ChecksumAlgorithm::Sha512],
        )
        .unwrap();

        assert_eq!(summary.components_added, 0);
        assert_eq!(summary.checksums_added, 1);
        let checksums = &metadata.components[0].checksums;
        assert_eq!(checksums[0].value, HELLO_SHA256);
        assert_eq!(checksums[0].origin, ChecksumOrigin::Declared);
        assert_eq!(checksums[1].algorithm, "sha512");
    }

    #[test]
    fn test_missing_artifact_is_an_error() {
        let dir = TempDir::new().unwrap();
        let artifacts = vec![Artifact::new(
            ModuleCoordinate::new("com.acme", "lib", "1.0"),
            dir.path().join("absent.jar"),
        )];
        let err = record_checksums(
            &mut VerificationMetadata::default(),
            &artifacts,
            &[ChecksumAlgorithm::Sha256],
        )
        .unwrap_err();
        assert!(matches!(err, RecordError::Io { .. }));
    }
}
