//! Projects: top-level containers with optional fields of their own.
//!
//! # Invariants
//! - Each member list holds an id at most once, in insertion order.
//! - Only definitions, work items and documents are members.

use crate::model::entity::{Entity, EntityChange};
use crate::model::record::{uuid_list, Record, RecordError, RecordReader};
use crate::model::{NodeId, NodeKind, NodeRef};
use serde_json::{Map, Value};

/// Named container of definitions, work items and documents.
#[derive(Debug)]
pub struct Project {
    entity: Entity,
    name: String,
    definitions: Vec<NodeId>,
    work_items: Vec<NodeId>,
    documents: Vec<NodeId>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            entity: Entity::new(),
            name: name.into(),
            definitions: Vec::new(),
            work_items: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.entity.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if name != self.name {
            self.name = name;
            self.entity.mark_changed(EntityChange::Attribute("name"));
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }

    pub fn definitions(&self) -> &[NodeId] {
        &self.definitions
    }

    pub fn work_items(&self) -> &[NodeId] {
        &self.work_items
    }

    pub fn documents(&self) -> &[NodeId] {
        &self.documents
    }

    /// Member ids of one kind; projects are never members.
    pub fn members(&self, kind: NodeKind) -> &[NodeId] {
        match kind {
            NodeKind::Definition => &self.definitions,
            NodeKind::WorkItem => &self.work_items,
            NodeKind::Document => &self.documents,
            NodeKind::Project => &[],
        }
    }

    /// Lists `member` under `kind`. Returns whether the list changed.
    pub fn add_member(&mut self, kind: NodeKind, member: impl NodeRef) -> bool {
        let id = member.node_id();
        let Some(list) = self.list_mut(kind) else {
            return false;
        };
        if list.contains(&id) {
            return false;
        }
        list.push(id);
        self.entity.mark_changed(EntityChange::Attribute(list_name(kind)));
        true
    }

    pub fn remove_member(&mut self, kind: NodeKind, member: impl NodeRef) -> bool {
        let id = member.node_id();
        let Some(list) = self.list_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|existing| *existing != id);
        let changed = list.len() != before;
        if changed {
            self.entity.mark_changed(EntityChange::Attribute(list_name(kind)));
        }
        changed
    }

    fn list_mut(&mut self, kind: NodeKind) -> Option<&mut Vec<NodeId>> {
        match kind {
            NodeKind::Definition => Some(&mut self.definitions),
            NodeKind::WorkItem => Some(&mut self.work_items),
            NodeKind::Document => Some(&mut self.documents),
            NodeKind::Project => None,
        }
    }
}

fn list_name(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Definition => "definitions",
        NodeKind::WorkItem => "workitems",
        NodeKind::Document => "documents",
        NodeKind::Project => "projects",
    }
}

impl NodeRef for Project {
    fn node_id(&self) -> NodeId {
        self.id()
    }
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.to_record() == other.to_record()
    }
}

impl PartialEq<Value> for Project {
    fn eq(&self, other: &Value) -> bool {
        self.to_record() == *other
    }
}

impl Record for Project {
    const RECORD_KIND: &'static str = "Project";

    fn to_record(&self) -> Value {
        let mut map = Map::new();
        self.entity.write_record(&mut map);
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("definitions".into(), uuid_list(&self.definitions));
        map.insert("workitems".into(), uuid_list(&self.work_items));
        map.insert("documents".into(), uuid_list(&self.documents));
        Value::Object(map)
    }

    fn from_record(record: &Value) -> Result<Self, RecordError> {
        let reader = RecordReader::new(Self::RECORD_KIND, record)?;
        Ok(Self {
            entity: Entity::read_record(&reader)?,
            name: reader.string("name")?,
            definitions: reader.uuids("definitions")?,
            work_items: reader.uuids("workitems")?,
            documents: reader.uuids("documents")?,
        })
    }
}
