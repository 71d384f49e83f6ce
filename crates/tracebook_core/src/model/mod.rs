//! Traceability domain model.
//!
//! # Responsibility
//! - Define fields, entities, definitions (templates) and work items
//!   (instances), plus their document/project containers.
//! - Keep template/instance reconciliation and rule symmetry inside the model.
//!
//! # Invariants
//! - Every node is identified by a stable, non-nil `Uuid`.
//! - Definition rule edges are always mirrored on both definitions.
//! - Work items never own traceability rules; rules live on definitions.

pub mod defaults;
pub mod definition;
pub mod diff;
pub mod document;
pub mod entity;
pub mod field;
pub mod project;
pub mod record;
pub mod rules;
pub mod timestamp;
pub mod work_item;

use crate::notify::ChannelError;
use field::FieldKind;
use record::RecordError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of every workspace node.
pub type NodeId = Uuid;

/// Persisted node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeKind {
    Definition,
    WorkItem,
    Document,
    Project,
}

impl NodeKind {
    /// Fixed file-name suffix appended after the configurable prefix.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Definition => "def",
            Self::WorkItem => "item",
            Self::Document => "doc",
            Self::Project => "proj",
        }
    }

    /// Documents and projects own a directory and may parent other nodes.
    pub fn is_container(self) -> bool {
        matches!(self, Self::Document | Self::Project)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::WorkItem => "work_item",
            Self::Document => "document",
            Self::Project => "project",
        }
    }
}

impl Display for NodeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can be resolved to a node id: the id itself or the node.
pub trait NodeRef {
    fn node_id(&self) -> NodeId;
}

impl NodeRef for Uuid {
    fn node_id(&self) -> NodeId {
        *self
    }
}

impl<T: NodeRef + ?Sized> NodeRef for &T {
    fn node_id(&self) -> NodeId {
        (**self).node_id()
    }
}

/// Which of an entity's two field lists an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldList {
    /// Visible in views and to plugins.
    Public,
    /// Panel-only.
    Private,
}

impl FieldList {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

/// Field lookup key: first field with a name, or a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKey<'a> {
    Name(&'a str),
    Index(usize),
}

impl<'a> From<&'a str> for FieldKey<'a> {
    fn from(value: &'a str) -> Self {
        Self::Name(value)
    }
}

impl<'a> From<&'a String> for FieldKey<'a> {
    fn from(value: &'a String) -> Self {
        Self::Name(value.as_str())
    }
}

impl From<usize> for FieldKey<'_> {
    fn from(value: usize) -> Self {
        Self::Index(value)
    }
}

/// Errors from model operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// No field with this name in the targeted list.
    FieldNotFound(String),
    /// Positional lookup past the end of the targeted list.
    IndexOutOfRange { index: usize, len: usize },
    /// Operation needs a different field kind.
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: FieldKind,
    },
    /// Choice value or option key is not declared on the field.
    OptionNotFound { field: String, option: String },
    /// Structured record could not be decoded.
    Record(RecordError),
    /// Work item operation received a definition it is not bound to.
    TemplateMismatch { expected: NodeId, found: NodeId },
    /// Subscription bookkeeping failed.
    Channel(ChannelError),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FieldNotFound(name) => write!(f, "field not found: {name}"),
            Self::IndexOutOfRange { index, len } => {
                write!(f, "field index {index} out of range (len {len})")
            }
            Self::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` is {found}, expected {expected}"),
            Self::OptionNotFound { field, option } => {
                write!(f, "field `{field}` has no option `{option}`")
            }
            Self::TemplateMismatch { expected, found } => {
                write!(f, "work item is bound to definition {expected}, got {found}")
            }
            Self::Record(err) => write!(f, "{err}"),
            Self::Channel(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ModelError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Record(err) => Some(err),
            Self::Channel(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RecordError> for ModelError {
    fn from(value: RecordError) -> Self {
        Self::Record(value)
    }
}

impl From<ChannelError> for ModelError {
    fn from(value: ChannelError) -> Self {
        Self::Channel(value)
    }
}
