//! Documents: named folders listing the work items placed under them.

use crate::model::record::{uuid_list, Record, RecordError, RecordReader};
use crate::model::timestamp::current_timestamp;
use crate::model::{NodeId, NodeRef};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Named container of work items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    id: NodeId,
    name: String,
    create_date: String,
    update_date: String,
    work_items: Vec<NodeId>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        let now = current_timestamp();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            create_date: now.clone(),
            update_date: now,
            work_items: Vec::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    pub fn create_date(&self) -> &str {
        &self.create_date
    }

    pub fn update_date(&self) -> &str {
        &self.update_date
    }

    /// Work item ids in insertion order.
    pub fn work_items(&self) -> &[NodeId] {
        &self.work_items
    }

    pub fn contains(&self, item: impl NodeRef) -> bool {
        self.work_items.contains(&item.node_id())
    }

    /// Appends a work item id. Returns `false` if it was already listed.
    pub fn add_work_item(&mut self, item: impl NodeRef) -> bool {
        let id = item.node_id();
        if self.work_items.contains(&id) {
            return false;
        }
        self.work_items.push(id);
        self.touch();
        true
    }

    pub fn remove_work_item(&mut self, item: impl NodeRef) -> bool {
        let id = item.node_id();
        let before = self.work_items.len();
        self.work_items.retain(|existing| *existing != id);
        let changed = self.work_items.len() != before;
        if changed {
            self.touch();
        }
        changed
    }

    fn touch(&mut self) {
        self.update_date = current_timestamp();
    }
}

impl NodeRef for Document {
    fn node_id(&self) -> NodeId {
        self.id
    }
}

impl PartialEq<Value> for Document {
    fn eq(&self, other: &Value) -> bool {
        self.to_record() == *other
    }
}

impl Record for Document {
    const RECORD_KIND: &'static str = "Document";

    fn to_record(&self) -> Value {
        let mut map = Map::new();
        map.insert("uuid".into(), Value::String(self.id.to_string()));
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("createDate".into(), Value::String(self.create_date.clone()));
        map.insert("updateDate".into(), Value::String(self.update_date.clone()));
        map.insert("workitems".into(), uuid_list(&self.work_items));
        Value::Object(map)
    }

    fn from_record(record: &Value) -> Result<Self, RecordError> {
        let reader = RecordReader::new(Self::RECORD_KIND, record)?;
        Ok(Self {
            id: reader.uuid("uuid")?,
            name: reader.string("name")?,
            create_date: reader.string("createDate")?,
            update_date: reader.string("updateDate")?,
            work_items: reader.uuids("workitems")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Document;
    use crate::model::record::{Record, RecordError};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn membership_is_unique_and_ordered() {
        let mut document = Document::new("System Requirements");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(document.add_work_item(a));
        assert!(document.add_work_item(b));
        assert!(!document.add_work_item(a));
        assert_eq!(document.work_items(), [a, b]);
        assert!(document.remove_work_item(a));
        assert!(!document.contains(a));
    }

    #[test]
    fn record_round_trip_keeps_identity_dates_and_order() {
        let mut document = Document::new("Sub-system Requirements");
        let items = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        for item in items.iter().rev() {
            document.add_work_item(*item);
        }

        let record = document.to_record();
        let restored = Document::from_record(&record).unwrap();
        assert_eq!(restored, document);
        assert_eq!(restored, record);
        assert_eq!(restored.work_items(), [items[2], items[1], items[0]]);
        assert_eq!(restored.update_date(), document.update_date());
    }

    #[test]
    fn missing_workitems_key_is_reported() {
        let record = json!({
            "uuid": Uuid::new_v4().to_string(),
            "name": "Hardware",
            "createDate": "01/01/26 00:00:00",
            "updateDate": "01/01/26 00:00:00"
        });
        assert_eq!(
            Document::from_record(&record).unwrap_err(),
            RecordError::MissingKey {
                record: "Document",
                key: "workitems"
            }
        );
    }
}
