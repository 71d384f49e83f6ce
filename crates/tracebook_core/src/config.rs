//! Workspace configuration (`tracebook.json` at the workspace root).
//!
//! # Invariants
//! - A missing file or missing keys fall back to defaults.
//! - `file_prefix` is at most 32 chars of `[A-Za-z0-9_-]`, so node file
//!   extensions stay single path components.

use crate::model::rules::RulePolicy;
use crate::model::NodeKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file name looked up in the workspace root.
pub const CONFIG_FILE_NAME: &str = "tracebook.json";
pub const DEFAULT_FILE_PREFIX: &str = "bb";

static FILE_PREFIX_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{0,32}$").expect("valid file prefix regex"));

/// Errors from loading or validating workspace configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    InvalidFilePrefix(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "cannot read config `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "invalid config `{}`: {source}", path.display())
            }
            Self::InvalidFilePrefix(prefix) => write!(
                f,
                "file prefix `{prefix}` must be at most 32 characters of [A-Za-z0-9_-]"
            ),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::InvalidFilePrefix(_) => None,
        }
    }
}

/// Per-workspace settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Prepended to the kind suffix in node file extensions (`bbdef`).
    pub file_prefix: String,
    pub rule_policy: RulePolicy,
    /// Register discovered nodes without reading them until first access.
    pub lazy_load: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            rule_policy: RulePolicy::default(),
            lazy_load: true,
        }
    }
}

impl WorkspaceConfig {
    /// Reads `<root>/tracebook.json`, or defaults when it does not exist.
    pub fn load(root: &Path) -> Result<Self, ConfigError> {
        let path = root.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if FILE_PREFIX_PATTERN.is_match(&self.file_prefix) {
            Ok(())
        } else {
            Err(ConfigError::InvalidFilePrefix(self.file_prefix.clone()))
        }
    }

    /// File extension for nodes of `kind`, e.g. `bbitem`.
    pub fn extension(&self, kind: NodeKind) -> String {
        format!("{}{}", self.file_prefix, kind.suffix())
    }
}
