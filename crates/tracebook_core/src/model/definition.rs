//! Work item definitions: field templates plus traceability rules.
//!
//! # Responsibility
//! - Hold the template field lists bound work items are reconciled against.
//! - Hold the allowed downstream/upstream definition pairs.
//! - Announce field-shape edits on `template_changed`.
//!
//! # Invariants
//! - A rule edge is reciprocal: `b` in `a.downstream` iff `a` in
//!   `b.upstream`.
//! - `template_changed` fires for field-level and field-list changes only.

use crate::model::entity::{Entity, EntityChange};
use crate::model::field::Field;
use crate::model::record::{uuid_list, Record, RecordError, RecordReader};
use crate::model::{NodeId, NodeRef};
use crate::notify::Channel;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Payload published on a definition's `template_changed` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateChanged {
    pub definition: NodeId,
    pub change: EntityChange,
}

/// Template entity for one class of work items.
#[derive(Debug)]
pub struct WorkItemDefinition {
    entity: Entity,
    name: String,
    downstream: BTreeSet<NodeId>,
    upstream: BTreeSet<NodeId>,
    template_changed: Channel<TemplateChanged>,
}

impl WorkItemDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_parts(Entity::new(), name.into(), BTreeSet::new(), BTreeSet::new())
    }

    fn from_parts(
        entity: Entity,
        name: String,
        downstream: BTreeSet<NodeId>,
        upstream: BTreeSet<NodeId>,
    ) -> Self {
        let template_changed = Channel::new();
        let relay = template_changed.clone();
        entity.attribute_changed().subscribe(move |event| {
            if event.change.is_field_change() {
                relay.publish(&TemplateChanged {
                    definition: event.entity,
                    change: event.change.clone(),
                });
            }
        });
        Self {
            entity,
            name,
            downstream,
            upstream,
            template_changed,
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

    /// Field edits made here reach bound work items via `template_changed`.
    pub fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }

    pub fn template_changed(&self) -> &Channel<TemplateChanged> {
        &self.template_changed
    }

    pub fn add_public_field(&mut self, field: Field) {
        self.entity.add_public_field(field);
    }

    pub fn add_private_field(&mut self, field: Field) {
        self.entity.add_private_field(field);
    }

    pub fn add_public_fields(&mut self, fields: impl IntoIterator<Item = Field>) {
        self.entity.add_public_fields(fields);
    }

    pub fn add_private_fields(&mut self, fields: impl IntoIterator<Item = Field>) {
        self.entity.add_private_fields(fields);
    }

    pub fn downstream(&self) -> &BTreeSet<NodeId> {
        &self.downstream
    }

    pub fn upstream(&self) -> &BTreeSet<NodeId> {
        &self.upstream
    }

    /// Whether items of this definition may link downstream to items of
    /// `other`.
    pub fn allows_downstream(&self, other: impl NodeRef) -> bool {
        self.downstream.contains(&other.node_id())
    }

    pub fn allows_upstream(&self, other: impl NodeRef) -> bool {
        self.upstream.contains(&other.node_id())
    }

    /// Allows (or retracts) `other` downstream of `self`, on both sides.
    ///
    /// Returns whether either side changed.
    pub fn add_downstream_rule(&mut self, other: &mut WorkItemDefinition, allow: bool) -> bool {
        let forward = self.set_downstream_edge(other.id(), allow);
        let backward = other.set_upstream_edge(self.id(), allow);
        forward || backward
    }

    /// Mirror of [`Self::add_downstream_rule`].
    pub fn add_upstream_rule(&mut self, other: &mut WorkItemDefinition, allow: bool) -> bool {
        other.add_downstream_rule(self, allow)
    }

    /// Allows (or retracts) links between two items of this same definition.
    pub fn set_self_rule(&mut self, allow: bool) -> bool {
        let id = self.id();
        let forward = self.set_downstream_edge(id, allow);
        let backward = self.set_upstream_edge(id, allow);
        forward || backward
    }

    /// One side of a rule edge. Callers keep the other side in step.
    pub(crate) fn set_downstream_edge(&mut self, other: NodeId, allow: bool) -> bool {
        let changed = toggle(&mut self.downstream, other, allow);
        if changed {
            self.entity.mark_changed(EntityChange::Attribute("downstream"));
        }
        changed
    }

    pub(crate) fn set_upstream_edge(&mut self, other: NodeId, allow: bool) -> bool {
        let changed = toggle(&mut self.upstream, other, allow);
        if changed {
            self.entity.mark_changed(EntityChange::Attribute("upstream"));
        }
        changed
    }

    /// Independent copy with the same identity and fresh channels.
    pub fn duplicate(&self) -> Self {
        Self::from_parts(
            self.entity.duplicate(),
            self.name.clone(),
            self.downstream.clone(),
            self.upstream.clone(),
        )
    }
}

fn toggle(set: &mut BTreeSet<NodeId>, id: NodeId, allow: bool) -> bool {
    if allow {
        set.insert(id)
    } else {
        set.remove(&id)
    }
}

impl NodeRef for WorkItemDefinition {
    fn node_id(&self) -> NodeId {
        self.id()
    }
}

impl PartialEq for WorkItemDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.to_record() == other.to_record()
    }
}

impl PartialEq<Value> for WorkItemDefinition {
    fn eq(&self, other: &Value) -> bool {
        self.to_record() == *other
    }
}

impl Record for WorkItemDefinition {
    const RECORD_KIND: &'static str = "WorkItemDefinition";

    fn to_record(&self) -> Value {
        let mut map = Map::new();
        self.entity.write_record(&mut map);
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("downstream".into(), uuid_list(&self.downstream));
        map.insert("upstream".into(), uuid_list(&self.upstream));
        Value::Object(map)
    }

    fn from_record(record: &Value) -> Result<Self, RecordError> {
        let reader = RecordReader::new(Self::RECORD_KIND, record)?;
        let entity = Entity::read_record(&reader)?;
        let name = reader.string("name")?;
        let downstream = reader.uuids("downstream")?.into_iter().collect();
        let upstream = reader.uuids("upstream")?.into_iter().collect();
        Ok(Self::from_parts(entity, name, downstream, upstream))
    }
}
