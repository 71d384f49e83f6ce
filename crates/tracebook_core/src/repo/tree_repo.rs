//! In-memory workspace node tree.
//!
//! # Responsibility
//! - Hold every registered node's kind, parent id and display name.
//! - Derive synthetic paths (`parent/.../uuid`) and printable trees.
//!
//! # Invariants
//! - Parents are plain ids; the tree never owns node payloads.
//! - Child listing is deterministic: `display label ASC, id ASC`.
//! - Parent chains are walked with a visited set, so a corrupted cycle ends
//!   the walk instead of looping.

use crate::model::{NodeId, NodeKind};
use crate::repo::{RepoError, RepoResult};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// Tree read model for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceNode {
    pub id: NodeId,
    pub kind: NodeKind,
    /// `None` means root-level node.
    pub parent: Option<NodeId>,
    /// Known once the node has been loaded or created in this session.
    pub display_name: Option<String>,
}

impl WorkspaceNode {
    /// Display name, or the id for a node that was never loaded.
    pub fn label(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Flat id -> node table with parent links.
#[derive(Debug, Default)]
pub struct WorkspaceTree {
    nodes: BTreeMap<NodeId, WorkspaceNode>,
}

impl WorkspaceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add_node(&mut self, node: WorkspaceNode) -> RepoResult<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(RepoError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> Option<&WorkspaceNode> {
        self.nodes.get(&id)
    }

    pub fn require(&self, id: NodeId) -> RepoResult<&WorkspaceNode> {
        self.nodes.get(&id).ok_or(RepoError::NodeNotFound(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn set_parent(&mut self, id: NodeId, parent: Option<NodeId>) -> RepoResult<()> {
        let node = self.nodes.get_mut(&id).ok_or(RepoError::NodeNotFound(id))?;
        node.parent = parent;
        Ok(())
    }

    pub fn set_display_name(&mut self, id: NodeId, name: impl Into<String>) -> RepoResult<()> {
        let node = self.nodes.get_mut(&id).ok_or(RepoError::NodeNotFound(id))?;
        node.display_name = Some(name.into());
        Ok(())
    }

    /// Direct children of `parent` (`None` for root level).
    pub fn children(&self, parent: Option<NodeId>) -> Vec<&WorkspaceNode> {
        let mut children: Vec<_> = self
            .nodes
            .values()
            .filter(|node| node.parent == parent)
            .collect();
        children.sort_by(|a, b| a.label().cmp(&b.label()).then(a.id.cmp(&b.id)));
        children
    }

    /// Parent chain of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut visited = HashSet::from([id]);
        let mut cursor = self.nodes.get(&id).and_then(|node| node.parent);
        while let Some(current) = cursor {
            if !visited.insert(current) {
                break;
            }
            chain.push(current);
            cursor = self.nodes.get(&current).and_then(|node| node.parent);
        }
        chain
    }

    /// Every node below `id`, depth first.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut visited = HashSet::from([id]);
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for child in self.children(Some(current)) {
                if visited.insert(child.id) {
                    found.push(child.id);
                    stack.push(child.id);
                }
            }
        }
        found
    }

    /// Synthetic path `root/.../parent/id`.
    pub fn path(&self, id: NodeId) -> RepoResult<PathBuf> {
        self.require(id)?;
        let mut path: PathBuf = self
            .ancestors(id)
            .into_iter()
            .rev()
            .map(|ancestor| ancestor.to_string())
            .collect();
        path.push(id.to_string());
        Ok(path)
    }

    /// Whether placing `node` under `candidate_parent` would close a loop.
    pub fn would_create_cycle(&self, node: NodeId, candidate_parent: NodeId) -> bool {
        if node == candidate_parent {
            return true;
        }
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate_parent);
        while let Some(current) = cursor {
            if current == node || !visited.insert(current) {
                return true;
            }
            cursor = self.nodes.get(&current).and_then(|entry| entry.parent);
        }
        false
    }

    /// Closest ancestor of `id` with the given kind.
    pub fn nearest_ancestor(&self, id: NodeId, kind: NodeKind) -> Option<NodeId> {
        self.ancestors(id)
            .into_iter()
            .find(|ancestor| self.nodes.get(ancestor).is_some_and(|node| node.kind == kind))
    }

    /// Indented outline of the whole tree, one node per line, labelled by
    /// `label`.
    pub fn render_with(&self, label: impl Fn(&WorkspaceNode) -> String) -> String {
        let mut out = String::new();
        let mut visited = HashSet::new();
        for root in self.children(None) {
            self.render_node(root, 0, &label, &mut visited, &mut out);
        }
        out
    }

    fn render_node(
        &self,
        node: &WorkspaceNode,
        depth: usize,
        label: &dyn Fn(&WorkspaceNode) -> String,
        visited: &mut HashSet<NodeId>,
        out: &mut String,
    ) {
        if !visited.insert(node.id) {
            return;
        }
        out.push_str(&"  ".repeat(depth));
        out.push_str(&label(node));
        out.push_str(" [");
        out.push_str(node.kind.as_str());
        out.push_str("]\n");
        for child in self.children(Some(node.id)) {
            self.render_node(child, depth + 1, label, visited, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{WorkspaceNode, WorkspaceTree};
    use crate::model::{NodeId, NodeKind};
    use std::path::PathBuf;
    use uuid::Uuid;

    fn node(kind: NodeKind, parent: Option<NodeId>, name: &str) -> WorkspaceNode {
        WorkspaceNode {
            id: Uuid::new_v4(),
            kind,
            parent,
            display_name: Some(name.to_string()),
        }
    }

    #[test]
    fn path_and_ancestors_follow_parent_chain() {
        let mut tree = WorkspaceTree::new();
        let project = node(NodeKind::Project, None, "Example");
        let document = node(NodeKind::Document, Some(project.id), "Hardware");
        let item = node(NodeKind::WorkItem, Some(document.id), "Cap Size");
        let (p, d, i) = (project.id, document.id, item.id);
        for entry in [project, document, item] {
            tree.add_node(entry).unwrap();
        }

        let expected: PathBuf = [p.to_string(), d.to_string(), i.to_string()]
            .iter()
            .collect();
        assert_eq!(tree.path(i).unwrap(), expected);
        assert_eq!(tree.ancestors(i), vec![d, p]);
        assert_eq!(tree.nearest_ancestor(i, NodeKind::Project), Some(p));
        assert_eq!(tree.descendants(p).len(), 2);
    }

    #[test]
    fn cycle_check_rejects_self_and_descendants() {
        let mut tree = WorkspaceTree::new();
        let outer = node(NodeKind::Document, None, "Outer");
        let inner = node(NodeKind::Document, Some(outer.id), "Inner");
        let (o, i) = (outer.id, inner.id);
        tree.add_node(outer).unwrap();
        tree.add_node(inner).unwrap();

        assert!(tree.would_create_cycle(o, o));
        assert!(tree.would_create_cycle(o, i));
        assert!(!tree.would_create_cycle(i, o));
    }

    #[test]
    fn render_uses_labels_and_indentation() {
        let mut tree = WorkspaceTree::new();
        let project = node(NodeKind::Project, None, "Example");
        let mut unnamed = node(NodeKind::Definition, Some(project.id), "");
        unnamed.display_name = None;
        let unnamed_id = unnamed.id;
        tree.add_node(project).unwrap();
        tree.add_node(unnamed).unwrap();

        assert_eq!(
            tree.render_with(WorkspaceNode::label),
            format!("Example [project]\n  {unnamed_id} [definition]\n")
        );
    }
}
