//! Lazily materialized node registries keyed by id.
//!
//! # Responsibility
//! - Map every known node id to its file path and, once loaded, the node.
//! - Load a registered node from disk on first access.
//!
//! # Invariants
//! - Each id has at most one entry.
//! - A materialized node's id equals its entry id; a file holding another id
//!   is rejected with `IdMismatch` and the entry stays unloaded.

use crate::model::definition::WorkItemDefinition;
use crate::model::document::Document;
use crate::model::project::Project;
use crate::model::record::Record;
use crate::model::work_item::WorkItem;
use crate::model::{NodeId, NodeKind, NodeRef};
use crate::repo::file_store::{load_record, save_record};
use crate::repo::{RepoError, RepoResult};
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Node types persisted one per file.
pub trait StoredNode: Record + NodeRef {
    const KIND: NodeKind;

    fn display_name(&self) -> &str;
}

impl StoredNode for WorkItemDefinition {
    const KIND: NodeKind = NodeKind::Definition;

    fn display_name(&self) -> &str {
        self.name()
    }
}

impl StoredNode for WorkItem {
    const KIND: NodeKind = NodeKind::WorkItem;

    fn display_name(&self) -> &str {
        self.name()
    }
}

impl StoredNode for Document {
    const KIND: NodeKind = NodeKind::Document;

    fn display_name(&self) -> &str {
        self.name()
    }
}

impl StoredNode for Project {
    const KIND: NodeKind = NodeKind::Project;

    fn display_name(&self) -> &str {
        self.name()
    }
}

/// One registry slot: where the node lives and, if loaded, the node.
#[derive(Debug)]
pub struct RegistryEntry<T> {
    file: PathBuf,
    node: Option<T>,
}

impl<T> RegistryEntry<T> {
    /// File path relative to the workspace root.
    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn node(&self) -> Option<&T> {
        self.node.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.node.is_some()
    }
}

/// Id -> (relative file, node-or-absent) table for one node type.
#[derive(Debug)]
pub struct Registry<T> {
    entries: BTreeMap<NodeId, RegistryEntry<T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T: StoredNode> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.keys().copied()
    }

    pub fn entry(&self, id: NodeId) -> Option<&RegistryEntry<T>> {
        self.entries.get(&id)
    }

    pub fn file(&self, id: NodeId) -> Option<&Path> {
        self.entries.get(&id).map(RegistryEntry::file)
    }

    pub fn is_loaded(&self, id: NodeId) -> bool {
        self.entries.get(&id).is_some_and(RegistryEntry::is_loaded)
    }

    /// Records an unloaded node.
    pub fn register(&mut self, id: NodeId, file: PathBuf) -> RepoResult<()> {
        if self.entries.contains_key(&id) {
            return Err(RepoError::DuplicateNode(id));
        }
        self.entries.insert(id, RegistryEntry { file, node: None });
        Ok(())
    }

    /// Records a materialized node.
    pub fn insert(&mut self, node: T, file: PathBuf) -> RepoResult<&mut T> {
        let id = node.node_id();
        if self.entries.contains_key(&id) {
            return Err(RepoError::DuplicateNode(id));
        }
        let entry = self.entries.entry(id).or_insert(RegistryEntry {
            file,
            node: Some(node),
        });
        entry.node.as_mut().ok_or(RepoError::NodeNotFound(id))
    }

    pub fn loaded(&self, id: NodeId) -> Option<&T> {
        self.entries.get(&id).and_then(|entry| entry.node.as_ref())
    }

    pub fn loaded_mut(&mut self, id: NodeId) -> Option<&mut T> {
        self.entries.get_mut(&id).and_then(|entry| entry.node.as_mut())
    }

    /// Loads `id` from `root`/file if it is not in memory yet.
    ///
    /// Returns `true` when this call read the file.
    pub fn materialize(&mut self, id: NodeId, root: &Path) -> RepoResult<bool> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(RepoError::NodeNotFound(id))?;
        if entry.node.is_some() {
            return Ok(false);
        }
        let path = root.join(&entry.file);
        let node: T = load_record(&path)?;
        if node.node_id() != id {
            return Err(RepoError::IdMismatch {
                path,
                expected: id,
                found: node.node_id(),
            });
        }
        debug!(
            "event=node_load module=repo status=ok kind={} id={}",
            T::KIND,
            id
        );
        entry.node = Some(node);
        Ok(true)
    }

    /// Updates the recorded file path of `id`.
    pub fn set_file(&mut self, id: NodeId, file: PathBuf) -> RepoResult<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(RepoError::NodeNotFound(id))?;
        entry.file = file;
        Ok(())
    }

    /// Writes a materialized node back to its file.
    ///
    /// Returns `false` for an unloaded entry; its file is already current.
    pub fn save(&self, id: NodeId, root: &Path) -> RepoResult<bool> {
        let entry = self.entries.get(&id).ok_or(RepoError::NodeNotFound(id))?;
        match &entry.node {
            Some(node) => {
                save_record(&root.join(&entry.file), node)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn loaded_nodes(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.values().filter_map(|entry| entry.node.as_ref())
    }

    pub fn loaded_nodes_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.entries
            .values_mut()
            .filter_map(|entry| entry.node.as_mut())
    }

    pub fn entries(&self) -> impl Iterator<Item = (NodeId, &RegistryEntry<T>)> + '_ {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::model::document::Document;
    use crate::repo::file_store::save_record;
    use crate::repo::RepoError;
    use std::path::PathBuf;

    #[test]
    fn lazy_entry_loads_on_first_access() {
        let dir = tempfile::tempdir().unwrap();
        let document = Document::new("Standards");
        let file = PathBuf::from(format!("{}.bbdoc", document.id()));
        save_record(&dir.path().join(&file), &document).unwrap();

        let mut registry = Registry::<Document>::new();
        registry.register(document.id(), file).unwrap();
        assert!(!registry.is_loaded(document.id()));

        assert!(registry.materialize(document.id(), dir.path()).unwrap());
        assert!(!registry.materialize(document.id(), dir.path()).unwrap());
        assert_eq!(registry.loaded(document.id()).unwrap(), &document);
    }

    #[test]
    fn mismatched_file_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stored = Document::new("A");
        let claimed = Document::new("B").id();
        let file = PathBuf::from("a.bbdoc");
        save_record(&dir.path().join(&file), &stored).unwrap();

        let mut registry = Registry::<Document>::new();
        registry.register(claimed, file).unwrap();
        assert!(matches!(
            registry.materialize(claimed, dir.path()),
            Err(RepoError::IdMismatch { .. })
        ));
        assert!(!registry.is_loaded(claimed));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = Registry::<Document>::new();
        let document = Document::new("A");
        let id = document.id();
        registry.insert(document, PathBuf::from("a.bbdoc")).unwrap();
        assert!(matches!(
            registry.register(id, PathBuf::from("b.bbdoc")),
            Err(RepoError::DuplicateNode(found)) if found == id
        ));
    }
}
