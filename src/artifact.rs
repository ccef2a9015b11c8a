//! Resolved artifacts handed to the engine
//!
//! The resolver supplies artifacts per run. The CLI reads them from a JSON
//! artifact list:
//!
//! ```json
//! {
//!   "artifacts": [
//!     {"coordinate": "com.acme:lib:1.0", "path": "lib-1.0.jar", "signature": "lib-1.0.jar.sig"}
//!   ]
//! }
//! ```
//!
//! Relative paths are resolved against the directory holding the list.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use depgate_metadata::{MetadataError, ModuleCoordinate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signature::default_signature_path;

/// A resolved artifact: coordinate plus local content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub coordinate: ModuleCoordinate,
    pub path: PathBuf,
    /// Content length observed at resolution time
    pub length: Option<u64>,
    /// Detached signature location; `<path>.sig` when unset
    pub signature: Option<PathBuf>,
}

impl Artifact {
    pub fn new(coordinate: ModuleCoordinate, path: impl Into<PathBuf>) -> Self {
        Self {
            coordinate,
            path: path.into(),
            length: None,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<PathBuf>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    /// Where the detached signature is expected
    pub fn signature_path(&self) -> PathBuf {
        self.signature
            .clone()
            .unwrap_or_else(|| default_signature_path(&self.path))
    }
}

/// Errors loading an artifact list
#[derive(Debug, Error)]
pub enum ArtifactListError {
    #[error("cannot read artifact list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid artifact list: {0}")]
    Json(#[from] serde_json::Error),

    #[error("artifact #{index}: {source}")]
    Coordinate {
        index: usize,
        #[source]
        source: MetadataError,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArtifactListFile {
    artifacts: Vec<ArtifactEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ArtifactEntry {
    coordinate: String,
    path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<PathBuf>,
}

/// Parse an artifact list, resolving relative paths against `base`
pub fn parse_artifact_list(json: &str, base: &Path) -> Result<Vec<Artifact>, ArtifactListError> {
    let file: ArtifactListFile = serde_json::from_str(json)?;
    file.artifacts
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let coordinate = entry
                .coordinate
                .parse::<ModuleCoordinate>()
                .map_err(|source| ArtifactListError::Coordinate { index, source })?;
            Ok(Artifact {
                coordinate,
                path: base.join(entry.path),
                length: entry.length,
                signature: entry.signature.map(|s| base.join(s)),
            })
        })
        .collect()
}

/// Load an artifact list file
pub fn load_artifact_list(path: &Path) -> Result<Vec<Artifact>, ArtifactListError> {
    let json = fs::read_to_string(path).map_err(|source| ArtifactListError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_artifact_list(&json, base)
}

/// Serialize artifacts as an artifact list
pub fn artifact_list_to_json(artifacts: &[Artifact]) -> Result<String, serde_json::Error> {
    let file = ArtifactListFile {
        artifacts: artifacts
            .iter()
            .map(|a| ArtifactEntry {
                coordinate: a.coordinate.to_string(),
                path: a.path.clone(),
                length: a.length,
                signature: a.signature.clone(),
            })
            .collect(),
    };
    serde_json::to_string_pretty(&file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_resolves_relative_paths() {
        let json = r#"{"artifacts": [
            {"coordinate": "com.acme:lib:1.0", "path": "lib-1.0.jar"},
            {"coordinate": "com.acme:lib:1.0:sources@jar", "path": "/abs/lib-sources.jar",
             "signature": "sigs/lib-sources.jar.sig", "length": 42}
        ]}"#;

        let artifacts = parse_artifact_list(json, Path::new("/repo")).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].path, PathBuf::from("/repo/lib-1.0.jar"));
        assert_eq!(
            artifacts[0].signature_path(),
            PathBuf::from("/repo/lib-1.0.jar.sig")
        );
        assert_eq!(artifacts[1].path, PathBuf::from("/abs/lib-sources.jar"));
        assert_eq!(
            artifacts[1].signature_path(),
            PathBuf::from("/repo/sigs/lib-sources.jar.sig")
        );
        assert_eq!(artifacts[1].length, Some(42));
        assert_eq!(artifacts[1].coordinate.classifier.as_deref(), Some("sources"));
    }

    #[test]
    fn test_bad_coordinate_reports_index() {
        let json = r#"{"artifacts": [
            {"coordinate": "com.acme:lib:1.0", "path": "a.jar"},
            {"coordinate": "not-a-coordinate", "path": "b.jar"}
        ]}"#;
        let err = parse_artifact_list(json, Path::new(".")).unwrap_err();
        assert!(matches!(err, ArtifactListError::Coordinate { index: 1, .. }));
    }

    #[test]
    fn test_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let artifacts = vec![
            Artifact::new(
                ModuleCoordinate::new("com.acme", "lib", "1.0"),
                dir.path().join("lib-1.0.jar"),
            )
            .with_length(7),
            Artifact::new(
                ModuleCoordinate::new("org.example", "util", "2.3"),
                dir.path().join("util-2.3.jar"),
            )
            .with_signature(dir.path().join("util.sig")),
        ];
        let path = dir.path().join("artifacts.json");
        fs::write(&path, artifact_list_to_json(&artifacts).unwrap()).unwrap();

        assert_eq!(load_artifact_list(&path).unwrap(), artifacts);
    }

    #[test]
    fn test_missing_list_file() {
        let dir = TempDir::new().unwrap();
        let err = load_artifact_list(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ArtifactListError::Io { .. }));
    }
}
