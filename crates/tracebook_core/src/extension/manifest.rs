//! Plugin manifest declaration and validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// What a plugin is for. Roles group plugins for batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginRole {
    #[default]
    None,
    /// Derives or rewrites node placement.
    Pathing,
    /// Brings external artifacts into the workspace.
    Import,
    /// Writes workspace content to external formats.
    Export,
}

impl PluginRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pathing => "pathing",
            Self::Import => "import",
            Self::Export => "export",
        }
    }
}

impl Display for PluginRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative plugin manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Stable plugin identifier, e.g. `reqif.export`.
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Semantic version string (`major.minor.patch`).
    pub version: String,
    /// Names of plugins that must be registered first.
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub role: PluginRole,
}

impl PluginManifest {
    /// Checks the id, version and requirement list.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        let name = self.name.trim();
        match name {
            "" => return Err(ManifestValidationError::EmptyName),
            _ if !is_valid_plugin_name(name) => {
                return Err(ManifestValidationError::InvalidName(self.name.clone()))
            }
            _ => {}
        }
        match self.version.trim() {
            "" => return Err(ManifestValidationError::EmptyVersion),
            version if !is_semver_triplet(version) => {
                return Err(ManifestValidationError::InvalidVersion(self.version.clone()))
            }
            _ => {}
        }

        let mut seen = BTreeSet::new();
        self.requires.iter().map(|r| r.trim()).try_for_each(|requirement| {
            if requirement.is_empty() {
                Err(ManifestValidationError::EmptyRequirement)
            } else if requirement == name {
                Err(ManifestValidationError::SelfRequirement(requirement.to_owned()))
            } else if !seen.insert(requirement) {
                Err(ManifestValidationError::DuplicateRequirement(requirement.to_owned()))
            } else {
                Ok(())
            }
        })
    }
}

/// Dotted plugin ids: lowercase alphanumeric segments joined by `.`, `_` or `-`.
fn is_valid_plugin_name(value: &str) -> bool {
    value
        .split(['.', '_', '-'])
        .all(|segment| is_segment(segment, |c| c.is_ascii_lowercase()))
}

fn is_semver_triplet(value: &str) -> bool {
    let mut count = 0;
    let digits_only = value.split('.').all(|part| {
        count += 1;
        is_segment(part, |_| false)
    });
    digits_only && count == 3
}

fn is_segment(segment: &str, extra: impl Fn(char) -> bool) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit() || extra(c))
}

/// Manifest validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    EmptyName,
    InvalidName(String),
    EmptyVersion,
    InvalidVersion(String),
    EmptyRequirement,
    SelfRequirement(String),
    DuplicateRequirement(String),
}

impl Display for ManifestValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "plugin name must not be empty"),
            Self::InvalidName(value) => write!(f, "plugin name is invalid: {value}"),
            Self::EmptyVersion => write!(f, "plugin version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "plugin version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::EmptyRequirement => write!(f, "plugin requirement must not be empty"),
            Self::SelfRequirement(value) => write!(f, "plugin requires itself: {value}"),
            Self::DuplicateRequirement(value) => {
                write!(f, "plugin requirement is duplicated: {value}")
            }
        }
    }
}

impl Error for ManifestValidationError {}
