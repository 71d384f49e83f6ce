//! Collection element: identity, timestamps, public/private fields, tags.
//!
//! # Responsibility
//! - Own the public and private field lists of one node.
//! - Forward every field-level change to the entity's own channel.
//! - Encode/decode the shared part of every node record.
//!
//! # Invariants
//! - Each attached field carries exactly one forwarding subscription; it is
//!   removed when the field leaves the entity.
//! - Every published change refreshes `updateDate`.
//! - Tags are trimmed, lowercase, unique and sorted.

use crate::model::field::{Field, FieldEvent};
use crate::model::record::{Record, RecordError, RecordReader};
use crate::model::timestamp::current_timestamp;
use crate::model::{FieldKey, FieldList, ModelError, NodeId};
use crate::notify::{Channel, SubscriptionId};
use log::warn;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use uuid::Uuid;

/// What changed on an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityChange {
    /// A field value inside one of the lists changed.
    Field { list: FieldList, field: String },
    FieldAdded { list: FieldList, field: String },
    FieldRemoved { list: FieldList, field: String },
    /// A non-field attribute changed (`name`, `tags`, `downstream`, ...).
    Attribute(&'static str),
}

impl EntityChange {
    /// Whether the change touches field lists or field values.
    pub fn is_field_change(&self) -> bool {
        !matches!(self, Self::Attribute(_))
    }
}

/// Payload published on an entity's `attribute_changed` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEvent {
    pub entity: NodeId,
    pub change: EntityChange,
}

#[derive(Debug)]
struct FieldSlot {
    field: Field,
    subscription: SubscriptionId,
}

/// Common base for every node with identity, timestamps and fields.
#[derive(Debug)]
pub struct Entity {
    id: NodeId,
    public: Vec<FieldSlot>,
    private: Vec<FieldSlot>,
    tags: Vec<String>,
    create_date: String,
    update_date: Rc<RefCell<String>>,
    attribute_changed: Channel<EntityEvent>,
}

impl Entity {
    /// Creates an empty entity with a generated id.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    /// Creates an empty entity with a caller-provided id.
    pub fn with_id(id: NodeId) -> Self {
        let now = current_timestamp();
        Self::assemble(id, now.clone(), now, Vec::new())
    }

    fn assemble(id: NodeId, create_date: String, update_date: String, tags: Vec<String>) -> Self {
        Self {
            id,
            public: Vec::new(),
            private: Vec::new(),
            tags,
            create_date,
            update_date: Rc::new(RefCell::new(update_date)),
            attribute_changed: Channel::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn create_date(&self) -> &str {
        &self.create_date
    }

    pub fn update_date(&self) -> String {
        self.update_date.borrow().clone()
    }

    /// Channel carrying every change of this entity, field-level included.
    pub fn attribute_changed(&self) -> &Channel<EntityEvent> {
        &self.attribute_changed
    }

    pub fn fields(&self, list: FieldList) -> impl Iterator<Item = &Field> + '_ {
        self.slots(list).iter().map(|slot| &slot.field)
    }

    pub fn public_fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.fields(FieldList::Public)
    }

    pub fn private_fields(&self) -> impl Iterator<Item = &Field> + '_ {
        self.fields(FieldList::Private)
    }

    pub fn field_count(&self, list: FieldList) -> usize {
        self.slots(list).len()
    }

    /// Appends one field and starts forwarding its changes.
    pub fn add_field(&mut self, list: FieldList, field: Field) {
        let name = field.name().to_string();
        let slot = self.attach(list, field);
        self.slots_mut(list).push(slot);
        self.mark_changed(EntityChange::FieldAdded { list, field: name });
    }

    pub fn add_public_field(&mut self, field: Field) {
        self.add_field(FieldList::Public, field);
    }

    pub fn add_private_field(&mut self, field: Field) {
        self.add_field(FieldList::Private, field);
    }

    pub fn add_public_fields(&mut self, fields: impl IntoIterator<Item = Field>) {
        for field in fields {
            self.add_public_field(field);
        }
    }

    pub fn add_private_fields(&mut self, fields: impl IntoIterator<Item = Field>) {
        for field in fields {
            self.add_private_field(field);
        }
    }

    /// Looks up a field by first matching name or by position.
    ///
    /// # Errors
    /// - `FieldNotFound` for an unknown name.
    /// - `IndexOutOfRange` for a position past the end.
    pub fn field<'k>(
        &self,
        list: FieldList,
        key: impl Into<FieldKey<'k>>,
    ) -> Result<&Field, ModelError> {
        let slots = self.slots(list);
        let index = resolve(slots, key.into())?;
        Ok(&slots[index].field)
    }

    pub fn field_mut<'k>(
        &mut self,
        list: FieldList,
        key: impl Into<FieldKey<'k>>,
    ) -> Result<&mut Field, ModelError> {
        let slots = self.slots_mut(list);
        let index = resolve(slots.as_slice(), key.into())?;
        Ok(&mut slots[index].field)
    }

    pub fn public_field<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<&Field, ModelError> {
        self.field(FieldList::Public, key)
    }

    pub fn public_field_mut<'k>(
        &mut self,
        key: impl Into<FieldKey<'k>>,
    ) -> Result<&mut Field, ModelError> {
        self.field_mut(FieldList::Public, key)
    }

    pub fn private_field<'k>(&self, key: impl Into<FieldKey<'k>>) -> Result<&Field, ModelError> {
        self.field(FieldList::Private, key)
    }

    pub fn private_field_mut<'k>(
        &mut self,
        key: impl Into<FieldKey<'k>>,
    ) -> Result<&mut Field, ModelError> {
        self.field_mut(FieldList::Private, key)
    }

    /// Detaches one field and returns it.
    ///
    /// The returned field no longer forwards changes to this entity.
    pub fn remove_field<'k>(
        &mut self,
        list: FieldList,
        key: impl Into<FieldKey<'k>>,
    ) -> Result<Field, ModelError> {
        let slots = self.slots_mut(list);
        let index = resolve(slots.as_slice(), key.into())?;
        let slot = slots.remove(index);
        slot.field.changed().unsubscribe(slot.subscription)?;
        let field = slot.field;
        self.mark_changed(EntityChange::FieldRemoved {
            list,
            field: field.name().to_string(),
        });
        Ok(field)
    }

    pub fn remove_public_field<'k>(
        &mut self,
        key: impl Into<FieldKey<'k>>,
    ) -> Result<Field, ModelError> {
        self.remove_field(FieldList::Public, key)
    }

    pub fn remove_private_field<'k>(
        &mut self,
        key: impl Into<FieldKey<'k>>,
    ) -> Result<Field, ModelError> {
        self.remove_field(FieldList::Private, key)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Adds one normalized tag. Returns `false` for blank or known tags.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        let Some(tag) = normalize_tag(tag) else {
            return false;
        };
        match self.tags.binary_search(&tag) {
            Ok(_) => false,
            Err(position) => {
                self.tags.insert(position, tag);
                self.mark_changed(EntityChange::Attribute("tags"));
                true
            }
        }
    }

    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let Some(tag) = normalize_tag(tag) else {
            return false;
        };
        match self.tags.binary_search(&tag) {
            Ok(position) => {
                self.tags.remove(position);
                self.mark_changed(EntityChange::Attribute("tags"));
                true
            }
            Err(_) => false,
        }
    }

    /// Builds an independent copy with the same identity and fresh channels.
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::assemble(
            self.id,
            self.create_date.clone(),
            self.update_date(),
            self.tags.clone(),
        );
        for list in [FieldList::Public, FieldList::Private] {
            for field in self.fields(list) {
                let slot = copy.attach(list, field.clone());
                copy.slots_mut(list).push(slot);
            }
        }
        copy
    }

    /// Refreshes `updateDate` and publishes one change.
    pub(crate) fn mark_changed(&self, change: EntityChange) {
        *self.update_date.borrow_mut() = current_timestamp();
        self.attribute_changed.publish(&EntityEvent {
            entity: self.id,
            change,
        });
    }

    /// Re-shapes one list after `template`: fields are matched by name and
    /// kind, reconciled in place, added as copies when missing, dropped when
    /// the template no longer declares them, and ordered like the template.
    ///
    /// Returns whether anything changed. A no-change call publishes nothing.
    pub(crate) fn reconcile_list(&mut self, list: FieldList, template: &[&Field]) -> bool {
        let previous = std::mem::take(self.slots_mut(list));
        let mut remaining: Vec<Option<FieldSlot>> = previous.into_iter().map(Some).collect();
        let mut ordered = Vec::with_capacity(template.len());
        let mut kept_positions = Vec::new();
        let mut structural = Vec::new();
        let mut changed = false;

        for template_field in template {
            let matched = remaining.iter().position(|slot| {
                slot.as_ref().is_some_and(|slot| {
                    slot.field.name() == template_field.name()
                        && slot.field.kind() == template_field.kind()
                })
            });
            match matched.and_then(|index| remaining[index].take().map(|slot| (index, slot))) {
                Some((index, mut slot)) => {
                    changed |= slot.field.merge_template(template_field);
                    kept_positions.push(index);
                    ordered.push(slot);
                }
                None => {
                    structural.push(EntityChange::FieldAdded {
                        list,
                        field: template_field.name().to_string(),
                    });
                    ordered.push(self.attach(list, (*template_field).clone()));
                }
            }
        }

        for slot in remaining.into_iter().flatten() {
            if let Err(err) = slot.field.changed().unsubscribe(slot.subscription) {
                warn!(
                    "event=field_detach module=model status=warn entity={} error={}",
                    self.id, err
                );
            }
            structural.push(EntityChange::FieldRemoved {
                list,
                field: slot.field.name().to_string(),
            });
        }

        let reordered = kept_positions.windows(2).any(|pair| pair[0] > pair[1]);
        *self.slots_mut(list) = ordered;

        if reordered {
            structural.push(EntityChange::Attribute(list.as_str()));
        }
        changed |= !structural.is_empty();
        for change in structural {
            self.mark_changed(change);
        }
        changed
    }

    pub(crate) fn write_record(&self, map: &mut Map<String, Value>) {
        map.insert("uuid".into(), Value::String(self.id.to_string()));
        map.insert("public".into(), fields_record(&self.public));
        map.insert("private".into(), fields_record(&self.private));
        map.insert(
            "tags".into(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        map.insert("createDate".into(), Value::String(self.create_date.clone()));
        map.insert("updateDate".into(), Value::String(self.update_date()));
    }

    pub(crate) fn read_record(reader: &RecordReader<'_>) -> Result<Self, RecordError> {
        let id = reader.uuid("uuid")?;
        let public = decode_fields(reader, "public")?;
        let private = decode_fields(reader, "private")?;
        let tags = if reader.has("tags") {
            normalize_tags(&reader.strings("tags")?)
        } else {
            Vec::new()
        };
        let create_date = reader.string("createDate")?;
        let update_date = reader.string("updateDate")?;

        let mut entity = Self::assemble(id, create_date, update_date, tags);
        for (list, fields) in [(FieldList::Public, public), (FieldList::Private, private)] {
            for field in fields {
                let slot = entity.attach(list, field);
                entity.slots_mut(list).push(slot);
            }
        }
        Ok(entity)
    }

    fn attach(&self, list: FieldList, field: Field) -> FieldSlot {
        let entity = self.id;
        let channel = self.attribute_changed.clone();
        let update_date = Rc::clone(&self.update_date);
        let subscription = field.changed().subscribe(move |event: &FieldEvent| {
            *update_date.borrow_mut() = current_timestamp();
            channel.publish(&EntityEvent {
                entity,
                change: EntityChange::Field {
                    list,
                    field: event.field.clone(),
                },
            });
        });
        FieldSlot {
            field,
            subscription,
        }
    }

    fn slots(&self, list: FieldList) -> &Vec<FieldSlot> {
        match list {
            FieldList::Public => &self.public,
            FieldList::Private => &self.private,
        }
    }

    fn slots_mut(&mut self, list: FieldList) -> &mut Vec<FieldSlot> {
        match list {
            FieldList::Public => &mut self.public,
            FieldList::Private => &mut self.private,
        }
    }
}

impl Default for Entity {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.to_record() == other.to_record()
    }
}

impl PartialEq<Value> for Entity {
    fn eq(&self, other: &Value) -> bool {
        self.to_record() == *other
    }
}

impl Record for Entity {
    const RECORD_KIND: &'static str = "Entity";

    fn to_record(&self) -> Value {
        let mut map = Map::new();
        self.write_record(&mut map);
        Value::Object(map)
    }

    fn from_record(record: &Value) -> Result<Self, RecordError> {
        let reader = RecordReader::new(Self::RECORD_KIND, record)?;
        Self::read_record(&reader)
    }
}

fn resolve(slots: &[FieldSlot], key: FieldKey<'_>) -> Result<usize, ModelError> {
    match key {
        FieldKey::Name(name) => slots
            .iter()
            .position(|slot| slot.field.name() == name)
            .ok_or_else(|| ModelError::FieldNotFound(name.to_string())),
        FieldKey::Index(index) if index < slots.len() => Ok(index),
        FieldKey::Index(index) => Err(ModelError::IndexOutOfRange {
            index,
            len: slots.len(),
        }),
    }
}

fn fields_record(slots: &[FieldSlot]) -> Value {
    Value::Array(slots.iter().map(|slot| slot.field.to_record()).collect())
}

fn decode_fields(reader: &RecordReader<'_>, key: &'static str) -> Result<Vec<Field>, RecordError> {
    reader.array(key)?.iter().map(Field::from_record).collect()
}

/// Normalizes one tag. Returns `None` for blank input.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes, deduplicates and sorts tag values.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .filter_map(|tag| normalize_tag(tag))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
