//! In-process plugin registry.

use crate::extension::manifest::{ManifestValidationError, PluginManifest, PluginRole};
use crate::service::workspace_service::{Workspace, WorkspaceError};
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Plugin contract. Every hook receives the workspace explicitly.
pub trait Plugin {
    fn manifest(&self) -> &PluginManifest;

    fn initialize(&mut self, _workspace: &mut Workspace) -> Result<(), WorkspaceError> {
        Ok(())
    }

    fn run(&mut self, _workspace: &mut Workspace) -> Result<(), WorkspaceError> {
        Ok(())
    }

    fn on_exit(&mut self, _workspace: &mut Workspace) -> Result<(), WorkspaceError> {
        Ok(())
    }
}

/// Lifecycle hook that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStage {
    Initialize,
    Run,
    Exit,
}

impl PluginStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Run => "run",
            Self::Exit => "exit",
        }
    }
}

/// Plugin registration and execution errors.
#[derive(Debug)]
pub enum PluginError {
    InvalidManifest(ManifestValidationError),
    DuplicatePlugin(String),
    MissingRequirement { plugin: String, requirement: String },
    PluginNotFound(String),
    Failed {
        plugin: String,
        stage: PluginStage,
        source: WorkspaceError,
    },
}

impl Display for PluginError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidManifest(err) => write!(f, "invalid plugin manifest: {err}"),
            Self::DuplicatePlugin(name) => write!(f, "plugin already registered: {name}"),
            Self::MissingRequirement {
                plugin,
                requirement,
            } => write!(
                f,
                "plugin {plugin} requires {requirement}, which is not registered"
            ),
            Self::PluginNotFound(name) => write!(f, "plugin not found: {name}"),
            Self::Failed {
                plugin,
                stage,
                source,
            } => write!(f, "plugin {plugin} failed during {}: {source}", stage.as_str()),
        }
    }
}

impl Error for PluginError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidManifest(err) => Some(err),
            Self::Failed { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Registered plugins in registration order, indexed by role.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: IndexMap<String, Box<dyn Plugin>>,
    role_index: BTreeMap<PluginRole, Vec<String>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one plugin after manifest validation.
    ///
    /// Every declared requirement must already be registered.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<(), PluginError> {
        let manifest = plugin.manifest();
        manifest.validate().map_err(PluginError::InvalidManifest)?;
        let name = manifest.name.trim().to_string();
        if self.plugins.contains_key(&name) {
            return Err(PluginError::DuplicatePlugin(name));
        }
        if let Some(missing) = manifest
            .requires
            .iter()
            .map(|requirement| requirement.trim())
            .find(|requirement| !self.plugins.contains_key(*requirement))
        {
            return Err(PluginError::MissingRequirement {
                plugin: name,
                requirement: missing.to_string(),
            });
        }

        let role = manifest.role;
        info!(
            "event=plugin_register module=extension status=ok plugin={} role={} version={}",
            name, role, manifest.version
        );
        self.role_index.entry(role).or_default().push(name.clone());
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins.get(name).map(|plugin| plugin.as_ref())
    }

    pub fn manifests(&self) -> impl Iterator<Item = &PluginManifest> + '_ {
        self.plugins.values().map(|plugin| plugin.manifest())
    }

    pub fn list_by_role(&self, role: PluginRole) -> Vec<&PluginManifest> {
        let Some(names) = self.role_index.get(&role) else {
            return vec![];
        };
        names
            .iter()
            .filter_map(|name| self.plugins.get(name))
            .map(|plugin| plugin.manifest())
            .collect()
    }

    /// Calls `initialize` on every plugin in registration order.
    pub fn initialize_all(&mut self, workspace: &mut Workspace) -> Result<(), PluginError> {
        let names: Vec<String> = self.plugins.keys().cloned().collect();
        for name in names {
            self.invoke(&name, PluginStage::Initialize, workspace)?;
        }
        Ok(())
    }

    /// Runs one plugin by name.
    pub fn run(&mut self, name: &str, workspace: &mut Workspace) -> Result<(), PluginError> {
        self.invoke(name, PluginStage::Run, workspace)
    }

    /// Runs every plugin of `role` in registration order. Returns how many
    /// ran; the first failure stops the batch.
    pub fn run_role(
        &mut self,
        role: PluginRole,
        workspace: &mut Workspace,
    ) -> Result<usize, PluginError> {
        let names = self.role_index.get(&role).cloned().unwrap_or_default();
        for name in &names {
            self.invoke(name, PluginStage::Run, workspace)?;
        }
        Ok(names.len())
    }

    /// Calls `on_exit` on every plugin, last registered first. Every plugin
    /// gets its call; the first failure is returned.
    pub fn shutdown(&mut self, workspace: &mut Workspace) -> Result<(), PluginError> {
        let names: Vec<String> = self.plugins.keys().rev().cloned().collect();
        let mut first_error = None;
        for name in names {
            if let Err(err) = self.invoke(&name, PluginStage::Exit, workspace) {
                warn!(
                    "event=plugin_exit module=extension status=error plugin={} error={}",
                    name, err
                );
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn invoke(
        &mut self,
        name: &str,
        stage: PluginStage,
        workspace: &mut Workspace,
    ) -> Result<(), PluginError> {
        let plugin = self
            .plugins
            .get_mut(name)
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;
        let result = match stage {
            PluginStage::Initialize => plugin.initialize(workspace),
            PluginStage::Run => plugin.run(workspace),
            PluginStage::Exit => plugin.on_exit(workspace),
        };
        result.map_err(|source| PluginError::Failed {
            plugin: name.to_string(),
            stage,
            source,
        })
    }
}
