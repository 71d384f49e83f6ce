//! Persistence layer: JSON node files, lazy registries and the node tree.
//!
//! # Responsibility
//! - Read/write one structured record per node file.
//! - Track every known node by id with its file path, loaded or not.
//! - Keep parent links and synthetic paths for the workspace hierarchy.
//!
//! # Invariants
//! - Repository APIs report semantic errors (`NodeNotFound`,
//!   `DuplicateNode`, `IdMismatch`) in addition to I/O and decode errors.
//! - Registry file paths are stored relative to the workspace root.

pub mod file_store;
pub mod registry;
pub mod tree_repo;

use crate::model::record::RecordError;
use crate::model::NodeId;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Result type used by repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// File system failure at `path`.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// File at `path` is not valid JSON.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// File at `path` is JSON but not a valid node record.
    Record { path: PathBuf, source: RecordError },
    /// No registry entry for this id.
    NodeNotFound(NodeId),
    /// Registry already has an entry for this id.
    DuplicateNode(NodeId),
    /// File at `path` holds a different id than its registry entry.
    IdMismatch {
        path: PathBuf,
        expected: NodeId,
        found: NodeId,
    },
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "i/o error at `{}`: {source}", path.display()),
            Self::Json { path, source } => {
                write!(f, "invalid json in `{}`: {source}", path.display())
            }
            Self::Record { path, source } => {
                write!(f, "invalid record in `{}`: {source}", path.display())
            }
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::DuplicateNode(id) => write!(f, "node already registered: {id}"),
            Self::IdMismatch {
                path,
                expected,
                found,
            } => write!(
                f,
                "file `{}` holds node {found}, expected {expected}",
                path.display()
            ),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::Record { source, .. } => Some(source),
            Self::NodeNotFound(_) => None,
            Self::DuplicateNode(_) => None,
            Self::IdMismatch { .. } => None,
        }
    }
}
