//! Module coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::MetadataError;

/// Identity of the logical dependency an artifact belongs to.
///
/// Textual form is `group:name:version[:classifier][@extension]`. Ordering is
/// field-wise in declaration order, with an absent classifier or extension
/// sorting before any present one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleCoordinate {
    pub group: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl ModuleCoordinate {
    pub fn new(
        group: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            version: version.into(),
            classifier: None,
            extension: None,
        }
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    fn valid_part(part: &str) -> bool {
        !part.is_empty()
            && !part
                .chars()
                .any(|c| c.is_whitespace() || c == ':' || c == '@')
    }

    /// Check that every present component is non-empty and free of separators.
    pub fn is_well_formed(&self) -> bool {
        Self::valid_part(&self.group)
            && Self::valid_part(&self.name)
            && Self::valid_part(&self.version)
            && self.classifier.as_deref().map_or(true, Self::valid_part)
            && self.extension.as_deref().map_or(true, Self::valid_part)
    }
}

impl fmt::Display for ModuleCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.name, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        if let Some(extension) = &self.extension {
            write!(f, "@{}", extension)?;
        }
        Ok(())
    }
}

impl FromStr for ModuleCoordinate {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MetadataError::InvalidCoordinate(s.to_string());

        let (body, extension) = match s.split_once('@') {
            Some((body, ext)) => (body, Some(ext.to_string())),
            None => (s, None),
        };

        let parts: Vec<&str> = body.split(':').collect();
        let coordinate = match parts.as_slice() {
            [group, name, version] => ModuleCoordinate::new(*group, *name, *version),
            [group, name, version, classifier] => {
                ModuleCoordinate::new(*group, *name, *version).with_classifier(*classifier)
            }
            _ => return Err(invalid()),
        };
        let coordinate = ModuleCoordinate {
            extension,
            ..coordinate
        };

        if coordinate.is_well_formed() {
            Ok(coordinate)
        } else {
            Err(invalid())
        }
    }
}
