//! Rule policy for instance-level traceability links.
//!
//! # Responsibility
//! - Define the workspace-wide `RulePolicy` and the decision it makes for one
//!   candidate link.
//! - Report refusals and warnings as values, never as errors.

use crate::model::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// How instance links are checked against their definitions' rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulePolicy {
    /// Disallowed links are refused.
    #[default]
    Strict,
    /// Disallowed links are created and reported.
    Warn,
    /// Links are never checked.
    #[serde(rename = "none")]
    Unchecked,
}

impl RulePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Warn => "warn",
            Self::Unchecked => "none",
        }
    }
}

impl Display for RulePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a link as seen from the item that initiates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkDirection {
    Downstream,
    Upstream,
}

impl LinkDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Downstream => "downstream",
            Self::Upstream => "upstream",
        }
    }
}

/// A link between two work items that their definitions do not allow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleViolation {
    pub direction: LinkDirection,
    pub from_item: NodeId,
    pub to_item: NodeId,
    pub from_template: NodeId,
    pub to_template: NodeId,
}

impl Display for RuleViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "definition {} does not allow {} links to definition {} (items {} -> {})",
            self.from_template,
            self.direction.as_str(),
            self.to_template,
            self.from_item,
            self.to_item
        )
    }
}

/// Result of one link request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// Edge created on both items.
    Linked,
    /// Edge was already present; nothing changed.
    AlreadyLinked,
    /// Edge created although the definitions do not allow it (`Warn`).
    LinkedWithWarning(RuleViolation),
    /// Edge refused; both items untouched (`Strict`).
    Refused(RuleViolation),
}

impl LinkOutcome {
    /// Whether the edge exists after the request.
    pub fn is_linked(&self) -> bool {
        !matches!(self, Self::Refused(_))
    }

    pub fn violation(&self) -> Option<&RuleViolation> {
        match self {
            Self::LinkedWithWarning(violation) | Self::Refused(violation) => Some(violation),
            Self::Linked | Self::AlreadyLinked => None,
        }
    }
}

/// Decides the outcome of a new link under `policy`.
///
/// `allowed` is the definitions' verdict; `violation` builds the report
/// lazily so the allowed path allocates nothing.
pub(crate) fn decide(
    policy: RulePolicy,
    allowed: bool,
    violation: impl FnOnce() -> RuleViolation,
) -> LinkOutcome {
    match policy {
        RulePolicy::Unchecked => LinkOutcome::Linked,
        _ if allowed => LinkOutcome::Linked,
        RulePolicy::Warn => LinkOutcome::LinkedWithWarning(violation()),
        RulePolicy::Strict => LinkOutcome::Refused(violation()),
    }
}
