//! Core traceability engine for tracebook.
//! This crate is the single source of truth for template, rule and tree
//! invariants.

pub mod config;
pub mod extension;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod service;

pub use config::{ConfigError, WorkspaceConfig};
pub use extension::{Plugin, PluginError, PluginManifest, PluginRegistry, PluginRole};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::definition::WorkItemDefinition;
pub use model::document::Document;
pub use model::entity::{Entity, EntityChange, EntityEvent};
pub use model::field::{Field, FieldKind, FieldValue};
pub use model::project::Project;
pub use model::record::{Record, RecordError};
pub use model::rules::{LinkDirection, LinkOutcome, RulePolicy, RuleViolation};
pub use model::work_item::WorkItem;
pub use model::{FieldKey, FieldList, ModelError, NodeId, NodeKind};
pub use notify::{Channel, ChannelError, SubscriptionId};
pub use repo::{RepoError, RepoResult};
pub use service::workspace_service::{
    DefinitionEdit, Workspace, WorkspaceError, WorkspaceResult,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
