//! Workspace use-case service.
//!
//! # Responsibility
//! - Own the four node registries and the node tree of one workspace root.
//! - Create, discover, lazily load, move and save nodes.
//! - Enforce hierarchy rules and the rule policy for instance links.
//! - Keep work items in step with their definitions.
//!
//! # Invariants
//! - Parents must exist and be containers (document or project).
//! - Moves never create parent-child cycles.
//! - A move touches memory only after the files were relocated.
//! - Every node id appears once across all registries and the tree.
//! - A materialized work item has been reconciled against its definition.

use crate::config::{ConfigError, WorkspaceConfig};
use crate::model::defaults::default_definitions;
use crate::model::definition::WorkItemDefinition;
use crate::model::document::Document;
use crate::model::project::Project;
use crate::model::rules::{LinkDirection, LinkOutcome, RulePolicy, RuleViolation};
use crate::model::work_item::{opposite, WorkItem};
use crate::model::{ModelError, NodeId, NodeKind, NodeRef};
use crate::notify::{Channel, SubscriptionId};
use crate::repo::file_store::{
    list_files_with_extension, load_record, relocate, remove_empty_dirs, save_record,
};
use crate::repo::registry::{Registry, StoredNode};
use crate::repo::tree_repo::{WorkspaceNode, WorkspaceTree};
use crate::repo::RepoError;
use log::{debug, error, info, warn};
use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use uuid::Uuid;

/// Result type used by workspace operations.
pub type WorkspaceResult<T> = Result<T, WorkspaceError>;

/// Errors from workspace operations.
#[derive(Debug)]
pub enum WorkspaceError {
    /// Display name is blank after trim.
    InvalidDisplayName,
    /// No node with this id in the workspace.
    NodeNotFound(NodeId),
    /// Parent node does not exist.
    ParentNotFound(NodeId),
    /// Parent exists but is not a document or project.
    ParentMustBeContainer(NodeId),
    /// Node exists but has another kind than the operation needs.
    WrongNodeKind {
        id: NodeId,
        expected: NodeKind,
        found: NodeKind,
    },
    /// Move would place a node under itself or a descendant.
    CycleDetected { node: NodeId, parent: NodeId },
    /// A work item cannot link to itself.
    SelfLink(NodeId),
    /// Relocating files failed; memory was left untouched.
    MoveFailed {
        id: NodeId,
        from: PathBuf,
        to: PathBuf,
        source: RepoError,
    },
    /// Repository-level failure.
    Repo(RepoError),
    /// Model-level failure.
    Model(ModelError),
    /// Configuration failure.
    Config(ConfigError),
}

impl Display for WorkspaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDisplayName => write!(f, "display name must not be blank"),
            Self::NodeNotFound(id) => write!(f, "workspace node not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "workspace parent not found: {id}"),
            Self::ParentMustBeContainer(id) => {
                write!(f, "workspace parent must be a document or project: {id}")
            }
            Self::WrongNodeKind {
                id,
                expected,
                found,
            } => write!(f, "workspace node {id} is a {found}, expected {expected}"),
            Self::CycleDetected { node, parent } => write!(
                f,
                "move would create cycle: node {node} under parent {parent}"
            ),
            Self::SelfLink(id) => write!(f, "work item cannot link to itself: {id}"),
            Self::MoveFailed {
                id,
                from,
                to,
                source,
            } => write!(
                f,
                "moving node {id} from `{}` to `{}` failed: {source}",
                from.display(),
                to.display()
            ),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Model(err) => write!(f, "{err}"),
            Self::Config(err) => write!(f, "{err}"),
        }
    }
}

impl Error for WorkspaceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::MoveFailed { source, .. } => Some(source),
            Self::Repo(err) => Some(err),
            Self::Model(err) => Some(err),
            Self::Config(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for WorkspaceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NodeNotFound(id) => Self::NodeNotFound(id),
            other => Self::Repo(other),
        }
    }
}

impl From<ModelError> for WorkspaceError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

impl From<ConfigError> for WorkspaceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

/// Node types with a registry inside [`Workspace`].
trait Registered: StoredNode + Sized {
    fn registry(workspace: &Workspace) -> &Registry<Self>;
    fn registry_mut(workspace: &mut Workspace) -> &mut Registry<Self>;
}

impl Registered for WorkItemDefinition {
    fn registry(workspace: &Workspace) -> &Registry<Self> {
        &workspace.definitions
    }

    fn registry_mut(workspace: &mut Workspace) -> &mut Registry<Self> {
        &mut workspace.definitions
    }
}

impl Registered for WorkItem {
    fn registry(workspace: &Workspace) -> &Registry<Self> {
        &workspace.work_items
    }

    fn registry_mut(workspace: &mut Workspace) -> &mut Registry<Self> {
        &mut workspace.work_items
    }
}

impl Registered for Document {
    fn registry(workspace: &Workspace) -> &Registry<Self> {
        &workspace.documents
    }

    fn registry_mut(workspace: &mut Workspace) -> &mut Registry<Self> {
        &mut workspace.documents
    }
}

impl Registered for Project {
    fn registry(workspace: &Workspace) -> &Registry<Self> {
        &workspace.projects
    }

    fn registry_mut(workspace: &mut Workspace) -> &mut Registry<Self> {
        &mut workspace.projects
    }
}

/// Membership edits one move implies, resolved before anything changes.
struct MembershipPlan {
    document: Option<(Option<NodeId>, Option<NodeId>)>,
    projects: Vec<(NodeId, NodeKind, Option<NodeId>, Option<NodeId>)>,
}

/// One node file relocated by a move, paths relative to the root.
struct FileMove {
    member: NodeId,
    from: PathBuf,
    to: PathBuf,
}

/// File-backed traceability workspace rooted at one directory.
pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
    tree: WorkspaceTree,
    definitions: Registry<WorkItemDefinition>,
    work_items: Registry<WorkItem>,
    documents: Registry<Document>,
    projects: Registry<Project>,
    rule_warnings: Channel<RuleViolation>,
}

impl Workspace {
    /// Opens `root` with the configuration found in it.
    ///
    /// Creates `root` when missing, scans it for node files and infers the
    /// hierarchy from the directory layout.
    pub fn open(root: impl Into<PathBuf>) -> WorkspaceResult<Self> {
        let root = root.into();
        let config = WorkspaceConfig::load(&root)?;
        Self::open_with_config(root, config)
    }

    pub fn open_with_config(
        root: impl Into<PathBuf>,
        config: WorkspaceConfig,
    ) -> WorkspaceResult<Self> {
        let root = root.into();
        config.validate()?;
        info!(
            "event=workspace_open module=workspace status=start root={} lazy={}",
            root.display(),
            config.lazy_load
        );
        std::fs::create_dir_all(&root).map_err(|source| RepoError::Io {
            path: root.clone(),
            source,
        })?;

        let eager = !config.lazy_load;
        let mut workspace = Self {
            root,
            config,
            tree: WorkspaceTree::new(),
            definitions: Registry::new(),
            work_items: Registry::new(),
            documents: Registry::new(),
            projects: Registry::new(),
            rule_warnings: Channel::new(),
        };
        workspace.scan_all(eager)?;
        workspace.update_structure_from_file_structure();
        info!(
            "event=workspace_open module=workspace status=ok definitions={} work_items={} documents={} projects={}",
            workspace.definitions.len(),
            workspace.work_items.len(),
            workspace.documents.len(),
            workspace.projects.len()
        );
        Ok(workspace)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn rule_policy(&self) -> RulePolicy {
        self.config.rule_policy
    }

    pub fn set_rule_policy(&mut self, policy: RulePolicy) {
        info!(
            "event=rule_policy_set module=workspace status=ok policy={}",
            policy
        );
        self.config.rule_policy = policy;
    }

    /// Violations accepted under [`RulePolicy::Warn`].
    pub fn rule_warnings(&self) -> &Channel<RuleViolation> {
        &self.rule_warnings
    }

    pub fn tree(&self) -> &WorkspaceTree {
        &self.tree
    }

    pub fn definitions(&self) -> &Registry<WorkItemDefinition> {
        &self.definitions
    }

    pub fn work_items(&self) -> &Registry<WorkItem> {
        &self.work_items
    }

    pub fn documents(&self) -> &Registry<Document> {
        &self.documents
    }

    pub fn projects(&self) -> &Registry<Project> {
        &self.projects
    }

    // ---- discovery -------------------------------------------------------

    /// Registers every node file under the root without reading it (when
    /// its name carries the id). Returns the number of new entries.
    pub fn index_all(&mut self) -> WorkspaceResult<usize> {
        self.scan_all(false)
    }

    /// Reads every node file under the root. Returns the number of new
    /// entries.
    pub fn discover_all(&mut self) -> WorkspaceResult<usize> {
        self.scan_all(true)
    }

    pub fn discover_definitions(&mut self) -> WorkspaceResult<usize> {
        self.scan::<WorkItemDefinition>(true)
    }

    pub fn discover_projects(&mut self) -> WorkspaceResult<usize> {
        self.scan::<Project>(true)
    }

    pub fn discover_documents(&mut self) -> WorkspaceResult<usize> {
        self.scan::<Document>(true)
    }

    pub fn discover_work_items(&mut self) -> WorkspaceResult<usize> {
        let count = self.scan::<WorkItem>(true)?;
        let loaded: Vec<_> = self.work_items.loaded_nodes().map(|item| item.id()).collect();
        for id in loaded {
            self.sync_work_item(id)?;
        }
        Ok(count)
    }

    fn scan_all(&mut self, eager: bool) -> WorkspaceResult<usize> {
        let mut count = self.scan::<WorkItemDefinition>(eager)?;
        count += self.scan::<Project>(eager)?;
        count += self.scan::<Document>(eager)?;
        count += if eager {
            self.discover_work_items()?
        } else {
            self.scan::<WorkItem>(false)?
        };
        Ok(count)
    }

    fn scan<T: Registered>(&mut self, eager: bool) -> WorkspaceResult<usize> {
        let extension = self.config.extension(T::KIND);
        let files = list_files_with_extension(&self.root, &extension)?;
        let known: BTreeMap<PathBuf, NodeId> = T::registry(self)
            .entries()
            .map(|(id, entry)| (entry.file().to_path_buf(), id))
            .collect();

        let mut count = 0;
        for path in files {
            let relative = path
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            if let Some(id) = known.get(&relative) {
                if eager {
                    self.ensure::<T>(*id)?;
                }
                continue;
            }

            let stem_id = if eager { None } else { id_from_file_name(&path) };
            let (id, node) = match stem_id {
                Some(id) => (id, None),
                None => {
                    let node: T = load_record(&path)?;
                    (node.node_id(), Some(node))
                }
            };
            if self.tree.contains(id) {
                warn!(
                    "event=node_discover module=workspace status=warn reason=duplicate_id kind={} id={} path={}",
                    T::KIND,
                    id,
                    relative.display()
                );
                continue;
            }

            let display_name = node.as_ref().map(|node| node.display_name().to_string());
            match node {
                Some(node) => {
                    T::registry_mut(self).insert(node, relative)?;
                }
                None => T::registry_mut(self).register(id, relative)?,
            }
            self.tree.add_node(WorkspaceNode {
                id,
                kind: T::KIND,
                parent: None,
                display_name,
            })?;
            count += 1;
        }
        debug!(
            "event=node_discover module=workspace status=ok kind={} eager={} count={}",
            T::KIND,
            eager,
            count
        );
        Ok(count)
    }

    /// Re-derives every parent link from where the node files sit.
    ///
    /// Definitions and work items belong to the container whose directory
    /// holds their file; containers belong to the container whose directory
    /// holds their own directory.
    pub fn update_structure_from_file_structure(&mut self) {
        let mut containers: BTreeMap<PathBuf, NodeId> = BTreeMap::new();
        for (id, entry) in self.documents.entries() {
            containers.insert(dir_of(entry.file()), id);
        }
        for (id, entry) in self.projects.entries() {
            containers.insert(dir_of(entry.file()), id);
        }

        let mut links = Vec::new();
        let leaves = self
            .definitions
            .entries()
            .map(|(id, entry)| (id, entry.file().to_path_buf()))
            .chain(
                self.work_items
                    .entries()
                    .map(|(id, entry)| (id, entry.file().to_path_buf())),
            );
        for (id, file) in leaves {
            links.push((id, containers.get(&dir_of(&file)).copied()));
        }
        let nested = self
            .documents
            .entries()
            .map(|(id, entry)| (id, entry.file().to_path_buf()))
            .chain(
                self.projects
                    .entries()
                    .map(|(id, entry)| (id, entry.file().to_path_buf())),
            );
        for (id, file) in nested {
            let outer = dir_of(&dir_of(&file));
            let parent = containers.get(&outer).copied().filter(|parent| *parent != id);
            links.push((id, parent));
        }

        for (id, parent) in links {
            if let Err(err) = self.tree.set_parent(id, parent) {
                warn!(
                    "event=structure_update module=workspace status=warn id={} error={}",
                    id, err
                );
            }
        }
    }

    // ---- lookup ------------------------------------------------------------

    pub fn node_kind(&self, id: impl NodeRef) -> Option<NodeKind> {
        self.tree.get(id.node_id()).map(|node| node.kind)
    }

    /// Returns the definition, loading it on first access.
    ///
    /// Field edits go through [`Workspace::edit_definition`].
    pub fn definition(&mut self, id: impl NodeRef) -> WorkspaceResult<&WorkItemDefinition> {
        let id = id.node_id();
        self.ensure::<WorkItemDefinition>(id)?;
        self.definitions
            .loaded(id)
            .ok_or(WorkspaceError::NodeNotFound(id))
    }

    /// Returns the work item, loading and reconciling it on first access.
    pub fn work_item(&mut self, id: impl NodeRef) -> WorkspaceResult<&mut WorkItem> {
        let id = id.node_id();
        self.ensure_work_item(id)?;
        self.work_items
            .loaded_mut(id)
            .ok_or(WorkspaceError::NodeNotFound(id))
    }

    pub fn document(&mut self, id: impl NodeRef) -> WorkspaceResult<&mut Document> {
        let id = id.node_id();
        self.ensure::<Document>(id)?;
        self.documents
            .loaded_mut(id)
            .ok_or(WorkspaceError::NodeNotFound(id))
    }

    pub fn project(&mut self, id: impl NodeRef) -> WorkspaceResult<&mut Project> {
        let id = id.node_id();
        self.ensure::<Project>(id)?;
        self.projects
            .loaded_mut(id)
            .ok_or(WorkspaceError::NodeNotFound(id))
    }

    /// Opens a definition for editing.
    ///
    /// When the returned guard drops after a field-level change, every
    /// materialized work item bound to the definition is reconciled.
    pub fn edit_definition(&mut self, id: impl NodeRef) -> WorkspaceResult<DefinitionEdit<'_>> {
        let id = id.node_id();
        self.ensure::<WorkItemDefinition>(id)?;
        let definition = self
            .definitions
            .loaded_mut(id)
            .ok_or(WorkspaceError::NodeNotFound(id))?;
        Ok(DefinitionEdit::new(definition, &mut self.work_items))
    }

    /// Reconciles every materialized work item bound to `definition`.
    /// Returns how many changed.
    pub fn sync_work_items(&mut self, definition: impl NodeRef) -> WorkspaceResult<usize> {
        let id = definition.node_id();
        self.ensure::<WorkItemDefinition>(id)?;
        let definition = self
            .definitions
            .loaded(id)
            .ok_or(WorkspaceError::NodeNotFound(id))?;
        Ok(sync_bound_items(definition, &mut self.work_items))
    }

    pub fn children(&self, parent: Option<NodeId>) -> Vec<&WorkspaceNode> {
        self.tree.children(parent)
    }

    pub fn parent_of(&self, id: impl NodeRef) -> WorkspaceResult<Option<NodeId>> {
        Ok(self.tree.require(id.node_id())?.parent)
    }

    /// Synthetic path `root/.../parent/id`.
    pub fn node_path(&self, id: impl NodeRef) -> WorkspaceResult<PathBuf> {
        Ok(self.tree.path(id.node_id())?)
    }

    /// Absolute path of the node's file.
    pub fn file_path(&self, id: impl NodeRef) -> WorkspaceResult<PathBuf> {
        let id = id.node_id();
        let file = self
            .recorded_file(id)
            .ok_or(WorkspaceError::NodeNotFound(id))?;
        Ok(self.root.join(file))
    }

    /// Printable outline of the workspace.
    pub fn render_tree(&self) -> String {
        self.tree.render_with(|node| {
            let name = match node.kind {
                NodeKind::Definition => self.definitions.loaded(node.id).map(StoredNode::display_name),
                NodeKind::WorkItem => self.work_items.loaded(node.id).map(StoredNode::display_name),
                NodeKind::Document => self.documents.loaded(node.id).map(StoredNode::display_name),
                NodeKind::Project => self.projects.loaded(node.id).map(StoredNode::display_name),
            };
            name.map(str::to_string).unwrap_or_else(|| node.label())
        })
    }

    // ---- creation ----------------------------------------------------------

    pub fn create_new_definition(
        &mut self,
        name: impl Into<String>,
        parent: Option<NodeId>,
    ) -> WorkspaceResult<&WorkItemDefinition> {
        let name = normalize_display_name(name.into())?;
        let id = self.insert_new(WorkItemDefinition::new(name), parent)?;
        self.definitions
            .loaded(id)
            .ok_or(WorkspaceError::NodeNotFound(id))
    }

    /// Creates a work item whose fields are copies of `template`'s fields.
    pub fn create_new_work_item(
        &mut self,
        name: impl Into<String>,
        template: impl NodeRef,
        parent: Option<NodeId>,
    ) -> WorkspaceResult<&mut WorkItem> {
        let name = normalize_display_name(name.into())?;
        let template = template.node_id();
        self.expect_kind(template, NodeKind::Definition)?;
        self.validate_parent(parent)?;
        let item = WorkItem::from_template(name, self.definition(template)?);
        let id = self.insert_new(item, parent)?;
        self.work_items
            .loaded_mut(id)
            .ok_or(WorkspaceError::NodeNotFound(id))
    }

    pub fn create_new_document(
        &mut self,
        name: impl Into<String>,
        parent: Option<NodeId>,
    ) -> WorkspaceResult<&mut Document> {
        let name = normalize_display_name(name.into())?;
        let id = self.insert_new(Document::new(name), parent)?;
        self.documents
            .loaded_mut(id)
            .ok_or(WorkspaceError::NodeNotFound(id))
    }

    pub fn create_new_project(
        &mut self,
        name: impl Into<String>,
        parent: Option<NodeId>,
    ) -> WorkspaceResult<&mut Project> {
        let name = normalize_display_name(name.into())?;
        let id = self.insert_new(Project::new(name), parent)?;
        self.projects
            .loaded_mut(id)
            .ok_or(WorkspaceError::NodeNotFound(id))
    }

    /// Creates Feature, Requirement and Test Case definitions chained
    /// downstream in that order. Returns their ids in the same order.
    pub fn install_default_definitions(
        &mut self,
        parent: Option<NodeId>,
    ) -> WorkspaceResult<[NodeId; 3]> {
        self.validate_parent(parent)?;
        let mut ids = [Uuid::nil(); 3];
        for (slot, definition) in ids.iter_mut().zip(default_definitions()) {
            *slot = self.insert_new(definition, parent)?;
        }
        Ok(ids)
    }

    fn insert_new<T: Registered>(
        &mut self,
        node: T,
        parent: Option<NodeId>,
    ) -> WorkspaceResult<NodeId> {
        self.validate_parent(parent)?;
        let id = node.node_id();
        let kind = T::KIND;
        let file = self.file_for(kind, id, parent)?;
        save_record(&self.root.join(&file), &node)?;

        let display_name = node.display_name().to_string();
        T::registry_mut(self).insert(node, file)?;
        self.tree.add_node(WorkspaceNode {
            id,
            kind,
            parent,
            display_name: Some(display_name),
        })?;
        self.add_membership(id, kind)?;
        info!(
            "event=node_create module=workspace status=ok kind={} id={} parent={}",
            kind,
            id,
            parent.map(|value| value.to_string()).unwrap_or_default()
        );
        Ok(id)
    }

    // ---- structure -------------------------------------------------------

    /// Moves a node (and, for containers, every node below it) under
    /// `new_parent`.
    ///
    /// Each node file of the subtree is relocated on its own, so unrelated
    /// files sharing a directory stay put. Files are relocated first; parent links, recorded file paths and
    /// container membership change only after that succeeded.
    pub fn move_item(
        &mut self,
        id: impl NodeRef,
        new_parent: Option<NodeId>,
    ) -> WorkspaceResult<()> {
        let id = id.node_id();
        let node = self.tree.require(id)?.clone();
        if let Some(parent) = new_parent {
            self.validate_parent(Some(parent))?;
            if self.tree.would_create_cycle(id, parent) {
                return Err(WorkspaceError::CycleDetected { node: id, parent });
            }
        }
        if node.parent == new_parent {
            return Ok(());
        }
        info!(
            "event=node_move module=workspace status=start kind={} id={}",
            node.kind, id
        );

        let moves = self.plan_relocation(&node, new_parent)?;
        let plan = self.plan_membership(&node, new_parent);
        self.prepare_membership(&plan)?;

        let mut done: Vec<&FileMove> = Vec::with_capacity(moves.len());
        for step in &moves {
            if let Err(source) = relocate(&self.root.join(&step.from), &self.root.join(&step.to)) {
                warn!(
                    "event=node_move module=workspace status=error id={} member={} error={}",
                    id, step.member, source
                );
                for undo in done.iter().rev() {
                    if let Err(err) =
                        relocate(&self.root.join(&undo.to), &self.root.join(&undo.from))
                    {
                        error!(
                            "event=node_move_rollback module=workspace status=error member={} error={}",
                            undo.member, err
                        );
                    }
                    if let Some(dir) = undo.to.parent() {
                        remove_empty_dirs(&self.root, &self.root.join(dir));
                    }
                }
                return Err(WorkspaceError::MoveFailed {
                    id,
                    from: step.from.clone(),
                    to: step.to.clone(),
                    source,
                });
            }
            done.push(step);
        }
        for step in &moves {
            if let Some(dir) = step.from.parent() {
                remove_empty_dirs(&self.root, &self.root.join(dir));
            }
        }

        self.tree.set_parent(id, new_parent)?;
        for step in moves {
            self.set_recorded_file(step.member, step.to)?;
        }
        self.apply_membership(id, plan)?;
        info!(
            "event=node_move module=workspace status=ok kind={} id={}",
            node.kind, id
        );
        Ok(())
    }

    /// One file move per node in the moved subtree, parents first.
    ///
    /// Only the subtree's own files move; other files sharing a directory
    /// with them stay where they are.
    fn plan_relocation(
        &self,
        node: &WorkspaceNode,
        new_parent: Option<NodeId>,
    ) -> WorkspaceResult<Vec<FileMove>> {
        let mut targets: HashMap<NodeId, PathBuf> = HashMap::new();
        let mut moves = Vec::new();
        let mut members = vec![node.id];
        if node.kind.is_container() {
            members.extend(self.tree.descendants(node.id));
        }
        for member in members {
            let current = self.tree.require(member)?;
            let from = self
                .recorded_file(member)
                .ok_or(WorkspaceError::NodeNotFound(member))?
                .to_path_buf();
            let to = if member == node.id {
                self.file_for(current.kind, member, new_parent)?
            } else {
                let base = current
                    .parent
                    .and_then(|parent| targets.get(&parent))
                    .map(|file| dir_of(file))
                    .unwrap_or_default();
                self.file_in(&base, current.kind, member)
            };
            targets.insert(member, to.clone());
            if from != to {
                moves.push(FileMove { member, from, to });
            }
        }
        Ok(moves)
    }

    fn plan_membership(&self, node: &WorkspaceNode, new_parent: Option<NodeId>) -> MembershipPlan {
        let document_of = |parent: Option<NodeId>| {
            parent.filter(|id| self.node_kind(*id) == Some(NodeKind::Document))
        };
        let document = (node.kind == NodeKind::WorkItem)
            .then(|| (document_of(node.parent), document_of(new_parent)));

        let mut subtree = vec![node.id];
        subtree.extend(self.tree.descendants(node.id));
        let inside: HashSet<NodeId> = subtree.iter().copied().collect();
        let new_project = new_parent.and_then(|parent| {
            if self.node_kind(parent) == Some(NodeKind::Project) {
                Some(parent)
            } else {
                self.tree.nearest_ancestor(parent, NodeKind::Project)
            }
        });

        let mut projects = Vec::new();
        for member in subtree {
            let Some(kind) = self.node_kind(member) else {
                continue;
            };
            if kind == NodeKind::Project {
                continue;
            }
            let old_project = self.tree.nearest_ancestor(member, NodeKind::Project);
            if old_project.is_some_and(|project| inside.contains(&project)) {
                continue;
            }
            if old_project != new_project {
                projects.push((member, kind, old_project, new_project));
            }
        }
        MembershipPlan { document, projects }
    }

    fn prepare_membership(&mut self, plan: &MembershipPlan) -> WorkspaceResult<()> {
        if let Some((old, new)) = plan.document {
            for document in old.into_iter().chain(new) {
                self.ensure::<Document>(document)?;
            }
        }
        for (_, _, old, new) in &plan.projects {
            for project in old.iter().chain(new.iter()) {
                self.ensure::<Project>(*project)?;
            }
        }
        Ok(())
    }

    fn apply_membership(&mut self, id: NodeId, plan: MembershipPlan) -> WorkspaceResult<()> {
        let mut dirty_documents = HashSet::new();
        let mut dirty_projects = HashSet::new();
        if let Some((old, new)) = plan.document {
            if let Some(document) = old.and_then(|doc| self.documents.loaded_mut(doc)) {
                if document.remove_work_item(id) {
                    dirty_documents.insert(document.id());
                }
            }
            if let Some(document) = new.and_then(|doc| self.documents.loaded_mut(doc)) {
                if document.add_work_item(id) {
                    dirty_documents.insert(document.id());
                }
            }
        }
        for (member, kind, old, new) in plan.projects {
            if let Some(project) = old.and_then(|project| self.projects.loaded_mut(project)) {
                if project.remove_member(kind, member) {
                    dirty_projects.insert(project.id());
                }
            }
            if let Some(project) = new.and_then(|project| self.projects.loaded_mut(project)) {
                if project.add_member(kind, member) {
                    dirty_projects.insert(project.id());
                }
            }
        }
        for document in dirty_documents {
            self.documents.save(document, &self.root)?;
        }
        for project in dirty_projects {
            self.projects.save(project, &self.root)?;
        }
        Ok(())
    }

    /// Lists a freshly created node in its document and project.
    fn add_membership(&mut self, id: NodeId, kind: NodeKind) -> WorkspaceResult<()> {
        let parent = self.tree.require(id)?.parent;
        if kind == NodeKind::WorkItem {
            if let Some(document) =
                parent.filter(|parent| self.node_kind(*parent) == Some(NodeKind::Document))
            {
                if self.document(document)?.add_work_item(id) {
                    self.documents.save(document, &self.root)?;
                }
            }
        }
        if kind != NodeKind::Project {
            if let Some(project) = self.tree.nearest_ancestor(id, NodeKind::Project) {
                if self.project(project)?.add_member(kind, id) {
                    self.projects.save(project, &self.root)?;
                }
            }
        }
        Ok(())
    }

    // ---- rules and links -----------------------------------------------------

    /// Allows (or retracts) items of `to` downstream of items of `from`.
    /// Both definitions are updated; `from == to` sets a self rule.
    pub fn add_downstream_rule(
        &mut self,
        from: impl NodeRef,
        to: impl NodeRef,
        allow: bool,
    ) -> WorkspaceResult<bool> {
        let (from, to) = (from.node_id(), to.node_id());
        self.ensure::<WorkItemDefinition>(from)?;
        self.ensure::<WorkItemDefinition>(to)?;
        let forward = self
            .definitions
            .loaded_mut(from)
            .ok_or(WorkspaceError::NodeNotFound(from))?
            .set_downstream_edge(to, allow);
        let backward = self
            .definitions
            .loaded_mut(to)
            .ok_or(WorkspaceError::NodeNotFound(to))?
            .set_upstream_edge(from, allow);
        Ok(forward || backward)
    }

    pub fn add_upstream_rule(
        &mut self,
        from: impl NodeRef,
        to: impl NodeRef,
        allow: bool,
    ) -> WorkspaceResult<bool> {
        self.add_downstream_rule(to, from, allow)
    }

    /// Links `to` downstream of `from` under the active rule policy.
    pub fn add_downstream(
        &mut self,
        from: impl NodeRef,
        to: impl NodeRef,
    ) -> WorkspaceResult<LinkOutcome> {
        self.link(from.node_id(), to.node_id(), LinkDirection::Downstream)
    }

    pub fn add_upstream(
        &mut self,
        from: impl NodeRef,
        to: impl NodeRef,
    ) -> WorkspaceResult<LinkOutcome> {
        self.link(from.node_id(), to.node_id(), LinkDirection::Upstream)
    }

    /// Removes the downstream edge between two items. Unchecked.
    pub fn remove_downstream(
        &mut self,
        from: impl NodeRef,
        to: impl NodeRef,
    ) -> WorkspaceResult<bool> {
        self.unlink(from.node_id(), to.node_id(), LinkDirection::Downstream)
    }

    pub fn remove_upstream(
        &mut self,
        from: impl NodeRef,
        to: impl NodeRef,
    ) -> WorkspaceResult<bool> {
        self.unlink(from.node_id(), to.node_id(), LinkDirection::Upstream)
    }

    fn link(
        &mut self,
        from: NodeId,
        to: NodeId,
        direction: LinkDirection,
    ) -> WorkspaceResult<LinkOutcome> {
        if from == to {
            return Err(WorkspaceError::SelfLink(from));
        }
        self.expect_kind(from, NodeKind::WorkItem)?;
        self.expect_kind(to, NodeKind::WorkItem)?;
        let other_template = self.work_item(to)?.template();
        let template = self.work_item(from)?.template();
        self.ensure::<WorkItemDefinition>(template)?;

        let policy = self.config.rule_policy;
        let outcome = {
            let item = self
                .work_items
                .loaded(from)
                .ok_or(WorkspaceError::NodeNotFound(from))?;
            let definition = self
                .definitions
                .loaded(template)
                .ok_or(WorkspaceError::NodeNotFound(template))?;
            item.evaluate_link(definition, direction, to, other_template, policy)?
        };

        match &outcome {
            LinkOutcome::Refused(violation) => info!(
                "event=link_add module=workspace status=refused direction={} from={} to={}",
                direction.as_str(),
                violation.from_item,
                violation.to_item
            ),
            LinkOutcome::LinkedWithWarning(violation) => {
                warn!(
                    "event=link_add module=workspace status=warn direction={} from={} to={} from_template={} to_template={}",
                    direction.as_str(),
                    violation.from_item,
                    violation.to_item,
                    violation.from_template,
                    violation.to_template
                );
                self.rule_warnings.publish(violation);
            }
            LinkOutcome::Linked | LinkOutcome::AlreadyLinked => {}
        }
        if matches!(outcome, LinkOutcome::Refused(_) | LinkOutcome::AlreadyLinked) {
            return Ok(outcome);
        }

        self.set_item_link(from, direction, to, true)?;
        self.set_item_link(to, opposite(direction), from, true)?;
        debug!(
            "event=link_add module=workspace status=ok direction={} from={} to={}",
            direction.as_str(),
            from,
            to
        );
        Ok(outcome)
    }

    fn unlink(&mut self, from: NodeId, to: NodeId, direction: LinkDirection) -> WorkspaceResult<bool> {
        self.expect_kind(from, NodeKind::WorkItem)?;
        self.expect_kind(to, NodeKind::WorkItem)?;
        self.ensure_work_item(from)?;
        self.ensure_work_item(to)?;
        let forward = self.set_item_link(from, direction, to, false)?;
        let backward = self.set_item_link(to, opposite(direction), from, false)?;
        Ok(forward || backward)
    }

    fn set_item_link(
        &mut self,
        id: NodeId,
        direction: LinkDirection,
        other: NodeId,
        present: bool,
    ) -> WorkspaceResult<bool> {
        let item = self
            .work_items
            .loaded_mut(id)
            .ok_or(WorkspaceError::NodeNotFound(id))?;
        Ok(item.set_link(direction, other, present))
    }

    // ---- persistence -------------------------------------------------------

    pub fn save_definition(&self, id: impl NodeRef) -> WorkspaceResult<bool> {
        Ok(self.definitions.save(id.node_id(), &self.root)?)
    }

    pub fn save_work_item(&self, id: impl NodeRef) -> WorkspaceResult<bool> {
        Ok(self.work_items.save(id.node_id(), &self.root)?)
    }

    pub fn save_document(&self, id: impl NodeRef) -> WorkspaceResult<bool> {
        Ok(self.documents.save(id.node_id(), &self.root)?)
    }

    pub fn save_project(&self, id: impl NodeRef) -> WorkspaceResult<bool> {
        Ok(self.projects.save(id.node_id(), &self.root)?)
    }

    /// Writes every materialized node. Returns how many files were written.
    pub fn save_all(&self) -> WorkspaceResult<usize> {
        let mut written = 0;
        written += save_loaded(&self.definitions, &self.root)?;
        written += save_loaded(&self.work_items, &self.root)?;
        written += save_loaded(&self.documents, &self.root)?;
        written += save_loaded(&self.projects, &self.root)?;
        info!(
            "event=workspace_save module=workspace status=ok written={}",
            written
        );
        Ok(written)
    }

    // ---- helpers -------------------------------------------------------------

    fn ensure<T: Registered>(&mut self, id: NodeId) -> WorkspaceResult<bool> {
        self.expect_kind(id, T::KIND)?;
        let root = self.root.clone();
        let loaded = T::registry_mut(self).materialize(id, &root)?;
        if loaded {
            let name = T::registry(self)
                .loaded(id)
                .map(|node| node.display_name().to_string());
            if let Some(name) = name {
                self.tree.set_display_name(id, name)?;
            }
        }
        Ok(loaded)
    }

    fn ensure_work_item(&mut self, id: NodeId) -> WorkspaceResult<()> {
        if self.ensure::<WorkItem>(id)? {
            self.sync_work_item(id)?;
        }
        Ok(())
    }

    /// Reconciles one materialized work item against its definition.
    fn sync_work_item(&mut self, id: NodeId) -> WorkspaceResult<bool> {
        let Some(template) = self.work_items.loaded(id).map(WorkItem::template) else {
            return Ok(false);
        };
        if !self.definitions.contains(template) {
            warn!(
                "event=template_sync module=workspace status=warn reason=missing_definition item={} definition={}",
                id, template
            );
            return Ok(false);
        }
        self.ensure::<WorkItemDefinition>(template)?;
        let (Some(definition), Some(item)) = (
            self.definitions.loaded(template),
            self.work_items.loaded_mut(id),
        ) else {
            return Ok(false);
        };
        Ok(item.populate_from_template(definition))
    }

    fn expect_kind(&self, id: NodeId, expected: NodeKind) -> WorkspaceResult<()> {
        let found = self.tree.require(id)?.kind;
        if found != expected {
            return Err(WorkspaceError::WrongNodeKind {
                id,
                expected,
                found,
            });
        }
        Ok(())
    }

    fn validate_parent(&self, parent: Option<NodeId>) -> WorkspaceResult<()> {
        let Some(parent) = parent else {
            return Ok(());
        };
        let node = self
            .tree
            .get(parent)
            .ok_or(WorkspaceError::ParentNotFound(parent))?;
        if !node.kind.is_container() {
            return Err(WorkspaceError::ParentMustBeContainer(parent));
        }
        Ok(())
    }

    /// Relative file for a node of `kind` placed under `parent`.
    fn file_for(
        &self,
        kind: NodeKind,
        id: NodeId,
        parent: Option<NodeId>,
    ) -> WorkspaceResult<PathBuf> {
        let base = match parent {
            None => PathBuf::new(),
            Some(parent) => {
                let file = self
                    .recorded_file(parent)
                    .ok_or(WorkspaceError::ParentNotFound(parent))?;
                dir_of(file)
            }
        };
        Ok(self.file_in(&base, kind, id))
    }

    /// `<base>/<id>.<ext>`, or `<base>/<id>/<id>.<ext>` for containers.
    fn file_in(&self, base: &Path, kind: NodeKind, id: NodeId) -> PathBuf {
        let file_name = format!("{id}.{}", self.config.extension(kind));
        if kind.is_container() {
            base.join(id.to_string()).join(file_name)
        } else {
            base.join(file_name)
        }
    }

    fn recorded_file(&self, id: NodeId) -> Option<&Path> {
        match self.tree.get(id)?.kind {
            NodeKind::Definition => self.definitions.file(id),
            NodeKind::WorkItem => self.work_items.file(id),
            NodeKind::Document => self.documents.file(id),
            NodeKind::Project => self.projects.file(id),
        }
    }

    fn set_recorded_file(&mut self, id: NodeId, file: PathBuf) -> WorkspaceResult<()> {
        let kind = self.tree.require(id)?.kind;
        match kind {
            NodeKind::Definition => self.definitions.set_file(id, file)?,
            NodeKind::WorkItem => self.work_items.set_file(id, file)?,
            NodeKind::Document => self.documents.set_file(id, file)?,
            NodeKind::Project => self.projects.set_file(id, file)?,
        }
        Ok(())
    }
}

/// Mutable access to one definition; resynchronizes bound work items on
/// drop when the template changed.
pub struct DefinitionEdit<'a> {
    definition: &'a mut WorkItemDefinition,
    work_items: &'a mut Registry<WorkItem>,
    dirty: Rc<Cell<bool>>,
    subscription: SubscriptionId,
}

impl<'a> DefinitionEdit<'a> {
    fn new(definition: &'a mut WorkItemDefinition, work_items: &'a mut Registry<WorkItem>) -> Self {
        let dirty = Rc::new(Cell::new(false));
        let flag = Rc::clone(&dirty);
        let subscription = definition
            .template_changed()
            .subscribe(move |_| flag.set(true));
        Self {
            definition,
            work_items,
            dirty,
            subscription,
        }
    }
}

impl Deref for DefinitionEdit<'_> {
    type Target = WorkItemDefinition;

    fn deref(&self) -> &Self::Target {
        &*self.definition
    }
}

impl DerefMut for DefinitionEdit<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.definition
    }
}

impl Drop for DefinitionEdit<'_> {
    fn drop(&mut self) {
        if let Err(err) = self
            .definition
            .template_changed()
            .unsubscribe(self.subscription)
        {
            warn!(
                "event=definition_edit module=workspace status=warn id={} error={}",
                self.definition.id(),
                err
            );
        }
        if self.dirty.get() {
            sync_bound_items(&*self.definition, &mut *self.work_items);
        }
    }
}

fn sync_bound_items(definition: &WorkItemDefinition, work_items: &mut Registry<WorkItem>) -> usize {
    let id = definition.id();
    let changed = work_items
        .loaded_nodes_mut()
        .filter(|item| item.template() == id)
        .map(|item| item.populate_from_template(definition))
        .filter(|changed| *changed)
        .count();
    info!(
        "event=template_sync module=workspace status=ok definition={} changed={}",
        id, changed
    );
    changed
}

fn save_loaded<T: StoredNode>(registry: &Registry<T>, root: &Path) -> WorkspaceResult<usize> {
    let mut written = 0;
    for id in registry.ids() {
        if registry.save(id, root)? {
            written += 1;
        }
    }
    Ok(written)
}

/// Directory holding `file`; empty for root-level files.
fn dir_of(file: &Path) -> PathBuf {
    file.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// Id carried by a node file name (`<uuid>.<ext>`), if any.
fn id_from_file_name(path: &Path) -> Option<NodeId> {
    let stem = path.file_stem()?.to_str()?;
    Uuid::parse_str(stem).ok().filter(|id| !id.is_nil())
}

fn normalize_display_name(value: String) -> WorkspaceResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WorkspaceError::InvalidDisplayName);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::{dir_of, id_from_file_name, normalize_display_name, WorkspaceError};
    use std::path::{Path, PathBuf};
    use uuid::Uuid;

    #[test]
    fn display_names_are_trimmed_and_non_blank() {
        assert_eq!(normalize_display_name("  Hardware ".into()).unwrap(), "Hardware");
        assert!(matches!(
            normalize_display_name("   ".into()),
            Err(WorkspaceError::InvalidDisplayName)
        ));
    }

    #[test]
    fn file_names_yield_ids_only_for_uuid_stems() {
        let id = Uuid::new_v4();
        assert_eq!(
            id_from_file_name(Path::new(&format!("a/b/{id}.bbitem"))),
            Some(id)
        );
        assert_eq!(id_from_file_name(Path::new("a/readme.bbitem")), None);
    }

    #[test]
    fn dir_of_root_level_file_is_empty() {
        assert_eq!(dir_of(Path::new("x.bbdef")), PathBuf::new());
        assert_eq!(dir_of(Path::new("p/x.bbdef")), PathBuf::from("p"));
    }
}
