//! Work items: instances bound to one definition.
//!
//! # Responsibility
//! - Mirror the bound definition's field shape while owning the values.
//! - Hold instance-level downstream/upstream links, checked against the
//!   bound definitions' rules under a `RulePolicy`.
//!
//! # Invariants
//! - A link edge is reciprocal across the two items.
//! - Under `Strict`, a refused link leaves both items untouched.
//! - `populate_from_template` is idempotent.

use crate::model::definition::WorkItemDefinition;
use crate::model::entity::{Entity, EntityChange};
use crate::model::record::{uuid_list, Record, RecordError, RecordReader};
use crate::model::rules::{decide, LinkDirection, LinkOutcome, RulePolicy, RuleViolation};
use crate::model::{FieldList, ModelError, NodeId, NodeRef};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Concrete item (requirement, test case, ...) bound to a definition.
#[derive(Debug)]
pub struct WorkItem {
    entity: Entity,
    name: String,
    template: NodeId,
    downstream: BTreeSet<NodeId>,
    upstream: BTreeSet<NodeId>,
}

impl WorkItem {
    /// Creates an item bound to `template` with no fields yet.
    pub fn new(name: impl Into<String>, template: impl NodeRef) -> Self {
        Self {
            entity: Entity::new(),
            name: name.into(),
            template: template.node_id(),
            downstream: BTreeSet::new(),
            upstream: BTreeSet::new(),
        }
    }

    /// Creates an item whose fields are copies of the template's fields.
    pub fn from_template(name: impl Into<String>, template: &WorkItemDefinition) -> Self {
        let mut item = Self::new(name, template);
        item.populate_from_template(template);
        item
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

    /// Id of the bound definition.
    pub fn template(&self) -> NodeId {
        self.template
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }

    pub fn downstream(&self) -> &BTreeSet<NodeId> {
        &self.downstream
    }

    pub fn upstream(&self) -> &BTreeSet<NodeId> {
        &self.upstream
    }

    /// Re-shapes both field lists after `template` and binds to it.
    ///
    /// Returns whether anything changed. Calling it again with the same
    /// template changes nothing and publishes nothing.
    pub fn populate_from_template(&mut self, template: &WorkItemDefinition) -> bool {
        let mut changed = false;
        if self.template != template.id() {
            self.template = template.id();
            self.entity.mark_changed(EntityChange::Attribute("template"));
            changed = true;
        }
        for list in [FieldList::Public, FieldList::Private] {
            let fields: Vec<_> = template.entity().fields(list).collect();
            changed |= self.entity.reconcile_list(list, &fields);
        }
        changed
    }

    /// Links `other` downstream of `self` under `policy`.
    ///
    /// `template` must be the definition `self` is bound to. A refused link
    /// is reported through the outcome, not as an error.
    pub fn add_downstream(
        &mut self,
        template: &WorkItemDefinition,
        other: &mut WorkItem,
        policy: RulePolicy,
    ) -> Result<LinkOutcome, ModelError> {
        self.link(template, other, LinkDirection::Downstream, policy)
    }

    /// Mirror of [`Self::add_downstream`].
    pub fn add_upstream(
        &mut self,
        template: &WorkItemDefinition,
        other: &mut WorkItem,
        policy: RulePolicy,
    ) -> Result<LinkOutcome, ModelError> {
        self.link(template, other, LinkDirection::Upstream, policy)
    }

    /// Removes the downstream edge to `other` on both items. Unchecked.
    pub fn remove_downstream(&mut self, other: &mut WorkItem) -> bool {
        let forward = self.set_link(LinkDirection::Downstream, other.id(), false);
        let backward = other.set_link(LinkDirection::Upstream, self.id(), false);
        forward || backward
    }

    pub fn remove_upstream(&mut self, other: &mut WorkItem) -> bool {
        other.remove_downstream(self)
    }

    fn link(
        &mut self,
        template: &WorkItemDefinition,
        other: &mut WorkItem,
        direction: LinkDirection,
        policy: RulePolicy,
    ) -> Result<LinkOutcome, ModelError> {
        let outcome = self.evaluate_link(template, direction, other.id(), other.template, policy)?;
        if outcome.is_linked() && outcome != LinkOutcome::AlreadyLinked {
            self.set_link(direction, other.id(), true);
            other.set_link(opposite(direction), self.id(), true);
        }
        Ok(outcome)
    }

    /// Decides one link request without touching either item.
    pub(crate) fn evaluate_link(
        &self,
        template: &WorkItemDefinition,
        direction: LinkDirection,
        other: NodeId,
        other_template: NodeId,
        policy: RulePolicy,
    ) -> Result<LinkOutcome, ModelError> {
        if template.id() != self.template {
            return Err(ModelError::TemplateMismatch {
                expected: self.template,
                found: template.id(),
            });
        }
        if self.links(direction).contains(&other) {
            return Ok(LinkOutcome::AlreadyLinked);
        }
        let allowed = match direction {
            LinkDirection::Downstream => template.allows_downstream(other_template),
            LinkDirection::Upstream => template.allows_upstream(other_template),
        };
        Ok(decide(policy, allowed, || RuleViolation {
            direction,
            from_item: self.id(),
            to_item: other,
            from_template: self.template,
            to_template: other_template,
        }))
    }

    /// One side of a link edge. Callers keep the other side in step.
    pub(crate) fn set_link(&mut self, direction: LinkDirection, other: NodeId, present: bool) -> bool {
        let set = match direction {
            LinkDirection::Downstream => &mut self.downstream,
            LinkDirection::Upstream => &mut self.upstream,
        };
        let changed = if present {
            set.insert(other)
        } else {
            set.remove(&other)
        };
        if changed {
            self.entity
                .mark_changed(EntityChange::Attribute(direction.as_str()));
        }
        changed
    }

    fn links(&self, direction: LinkDirection) -> &BTreeSet<NodeId> {
        match direction {
            LinkDirection::Downstream => &self.downstream,
            LinkDirection::Upstream => &self.upstream,
        }
    }

    pub fn duplicate(&self) -> Self {
        Self {
            entity: self.entity.duplicate(),
            name: self.name.clone(),
            template: self.template,
            downstream: self.downstream.clone(),
            upstream: self.upstream.clone(),
        }
    }
}

pub(crate) fn opposite(direction: LinkDirection) -> LinkDirection {
    match direction {
        LinkDirection::Downstream => LinkDirection::Upstream,
        LinkDirection::Upstream => LinkDirection::Downstream,
    }
}

impl NodeRef for WorkItem {
    fn node_id(&self) -> NodeId {
        self.id()
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.to_record() == other.to_record()
    }
}

impl PartialEq<Value> for WorkItem {
    fn eq(&self, other: &Value) -> bool {
        self.to_record() == *other
    }
}

impl Record for WorkItem {
    const RECORD_KIND: &'static str = "WorkItem";

    fn to_record(&self) -> Value {
        let mut map = Map::new();
        self.entity.write_record(&mut map);
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("template".into(), Value::String(self.template.to_string()));
        map.insert("downstream".into(), uuid_list(&self.downstream));
        map.insert("upstream".into(), uuid_list(&self.upstream));
        Value::Object(map)
    }

    fn from_record(record: &Value) -> Result<Self, RecordError> {
        let reader = RecordReader::new(Self::RECORD_KIND, record)?;
        Ok(Self {
            entity: Entity::read_record(&reader)?,
            name: reader.string("name")?,
            template: reader.uuid("template")?,
            downstream: reader.uuids("downstream")?.into_iter().collect(),
            upstream: reader.uuids("upstream")?.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::WorkItem;
    use crate::model::definition::WorkItemDefinition;
    use crate::model::field::Field;
    use crate::model::rules::{LinkOutcome, RulePolicy};
    use crate::model::ModelError;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn requirement_definition() -> WorkItemDefinition {
        let mut definition = WorkItemDefinition::new("Requirement");
        definition.add_public_field(Field::long_text("Req", ""));
        definition.add_public_field(
            Field::single_choice("Owner", ["EE", "SW"], "EE").unwrap(),
        );
        definition.add_private_field(Field::multi_choice("Flags", [("Safety", false)]));
        definition
    }

    #[test]
    fn from_template_copies_shape_not_channels() {
        let definition = requirement_definition();
        let mut item = WorkItem::from_template("R1", &definition);
        assert_eq!(item.template(), definition.id());
        assert_eq!(item.entity().field_count(crate::model::FieldList::Public), 2);

        item.entity_mut()
            .public_field_mut("Req")
            .unwrap()
            .set_text("The system shall boot.")
            .unwrap();
        assert_eq!(
            definition.entity().public_field("Req").unwrap().text().unwrap(),
            ""
        );
    }

    #[test]
    fn second_populate_is_silent() {
        let mut definition = requirement_definition();
        let mut item = WorkItem::from_template("R1", &definition);
        definition.add_public_field(Field::plain_text("Rationale", ""));

        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        item.entity()
            .attribute_changed()
            .subscribe(move |_| *counter.borrow_mut() += 1);

        assert!(item.populate_from_template(&definition));
        let after_first = *hits.borrow();
        let stamp = item.entity().update_date();
        assert!(after_first > 0);

        assert!(!item.populate_from_template(&definition));
        assert_eq!(*hits.borrow(), after_first);
        assert_eq!(item.entity().update_date(), stamp);
    }

    #[test]
    fn populate_drops_removed_fields_and_keeps_values() {
        let mut definition = requirement_definition();
        let mut item = WorkItem::from_template("R1", &definition);
        item.entity_mut()
            .public_field_mut("Req")
            .unwrap()
            .set_text("kept")
            .unwrap();

        definition.entity_mut().remove_public_field("Owner").unwrap();
        item.populate_from_template(&definition);

        let names: Vec<_> = item.entity().public_fields().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["Req".to_string()]);
        assert_eq!(
            item.entity().public_field("Req").unwrap().text().unwrap(),
            "kept"
        );
    }

    #[test]
    fn strict_policy_refuses_disallowed_direction() {
        let mut d1 = WorkItemDefinition::new("D1");
        let mut d2 = WorkItemDefinition::new("D2");
        d1.add_downstream_rule(&mut d2, true);
        let mut w1 = WorkItem::from_template("w1", &d1);
        let mut w2 = WorkItem::from_template("w2", &d2);

        let outcome = w1.add_downstream(&d1, &mut w2, RulePolicy::Strict).unwrap();
        assert_eq!(outcome, LinkOutcome::Linked);
        assert!(w1.downstream().contains(&w2.id()));
        assert!(w2.upstream().contains(&w1.id()));

        let refused = w2.add_downstream(&d2, &mut w1, RulePolicy::Strict).unwrap();
        assert!(matches!(refused, LinkOutcome::Refused(_)));
        assert!(w2.downstream().is_empty());
        assert!(w1.upstream().is_empty());
    }

    #[test]
    fn warn_policy_links_and_reports() {
        let d1 = WorkItemDefinition::new("D1");
        let d2 = WorkItemDefinition::new("D2");
        let mut w1 = WorkItem::from_template("w1", &d1);
        let mut w2 = WorkItem::from_template("w2", &d2);

        let outcome = w1.add_upstream(&d1, &mut w2, RulePolicy::Warn).unwrap();
        let violation = outcome.violation().cloned().unwrap();
        assert_eq!(violation.to_template, d2.id());
        assert!(w1.upstream().contains(&w2.id()));
        assert!(w2.downstream().contains(&w1.id()));

        assert_eq!(
            w1.add_upstream(&d1, &mut w2, RulePolicy::Warn).unwrap(),
            LinkOutcome::AlreadyLinked
        );
        assert!(w2.remove_downstream(&mut w1));
        assert!(w1.upstream().is_empty());
    }

    #[test]
    fn linking_with_foreign_template_fails() {
        let d1 = WorkItemDefinition::new("D1");
        let d2 = WorkItemDefinition::new("D2");
        let mut w1 = WorkItem::from_template("w1", &d1);
        let mut w2 = WorkItem::from_template("w2", &d2);
        let err = w1
            .add_downstream(&d2, &mut w2, RulePolicy::Unchecked)
            .unwrap_err();
        assert!(matches!(err, ModelError::TemplateMismatch { .. }));
    }
}
