//! Structured record codec shared by every persisted model type.
//!
//! # Responsibility
//! - Define the `Record` contract (`to_record` / `from_record`).
//! - Read typed values out of JSON objects with errors that name the record
//!   kind and the offending key.
//!
//! # Invariants
//! - Records are JSON objects; anything else is `RecordError::NotAnObject`.
//! - A missing required key is reported as `MissingKey`, never as a panic.

use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Deserialization failure for one structured record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Record value is not a JSON object.
    NotAnObject { record: &'static str },
    /// Required key is absent.
    MissingKey {
        record: &'static str,
        key: &'static str,
    },
    /// Key is present but holds the wrong shape.
    InvalidValue {
        record: &'static str,
        key: &'static str,
        expected: &'static str,
    },
    /// Field `type` tag is not one of the registered kinds.
    UnknownKind(String),
}

impl Display for RecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject { record } => write!(f, "{record} record must be an object"),
            Self::MissingKey { record, key } => {
                write!(f, "{record} record is missing required key `{key}`")
            }
            Self::InvalidValue {
                record,
                key,
                expected,
            } => write!(f, "{record} record key `{key}` must be {expected}"),
            Self::UnknownKind(tag) => write!(f, "unknown field kind `{tag}`"),
        }
    }
}

impl Error for RecordError {}

/// Two-way conversion between a model value and its structured record.
pub trait Record: Sized {
    /// Record kind name used in error reporting.
    const RECORD_KIND: &'static str;

    fn to_record(&self) -> Value;

    fn from_record(record: &Value) -> Result<Self, RecordError>;
}

/// Typed read access to one record object.
pub(crate) struct RecordReader<'a> {
    record: &'static str,
    map: &'a Map<String, Value>,
}

impl<'a> RecordReader<'a> {
    pub(crate) fn new(record: &'static str, value: &'a Value) -> Result<Self, RecordError> {
        let map = value
            .as_object()
            .ok_or(RecordError::NotAnObject { record })?;
        Ok(Self { record, map })
    }

    pub(crate) fn map(&self) -> &'a Map<String, Value> {
        self.map
    }

    pub(crate) fn value(&self, key: &'static str) -> Result<&'a Value, RecordError> {
        self.map.get(key).ok_or(RecordError::MissingKey {
            record: self.record,
            key,
        })
    }

    pub(crate) fn has(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub(crate) fn str(&self, key: &'static str) -> Result<&'a str, RecordError> {
        self.value(key)?
            .as_str()
            .ok_or_else(|| self.invalid(key, "a string"))
    }

    pub(crate) fn string(&self, key: &'static str) -> Result<String, RecordError> {
        self.str(key).map(str::to_string)
    }

    pub(crate) fn i64(&self, key: &'static str) -> Result<i64, RecordError> {
        self.value(key)?
            .as_i64()
            .ok_or_else(|| self.invalid(key, "an integer"))
    }

    pub(crate) fn array(&self, key: &'static str) -> Result<&'a Vec<Value>, RecordError> {
        self.value(key)?
            .as_array()
            .ok_or_else(|| self.invalid(key, "an array"))
    }

    pub(crate) fn object(
        &self,
        key: &'static str,
    ) -> Result<&'a Map<String, Value>, RecordError> {
        self.value(key)?
            .as_object()
            .ok_or_else(|| self.invalid(key, "an object"))
    }

    pub(crate) fn uuid(&self, key: &'static str) -> Result<Uuid, RecordError> {
        let raw = self.str(key)?;
        match Uuid::parse_str(raw) {
            Ok(id) if !id.is_nil() => Ok(id),
            _ => Err(self.invalid(key, "a non-nil uuid string")),
        }
    }

    pub(crate) fn strings(&self, key: &'static str) -> Result<Vec<String>, RecordError> {
        self.array(key)?
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(key, "an array of strings"))
            })
            .collect()
    }

    pub(crate) fn uuids(&self, key: &'static str) -> Result<Vec<Uuid>, RecordError> {
        self.array(key)?
            .iter()
            .map(|item| {
                item.as_str()
                    .and_then(|raw| Uuid::parse_str(raw).ok())
                    .ok_or_else(|| self.invalid(key, "an array of uuid strings"))
            })
            .collect()
    }

    pub(crate) fn invalid(&self, key: &'static str, expected: &'static str) -> RecordError {
        RecordError::InvalidValue {
            record: self.record,
            key,
            expected,
        }
    }
}

pub(crate) fn uuid_list<'a>(ids: impl IntoIterator<Item = &'a Uuid>) -> Value {
    Value::Array(
        ids.into_iter()
            .map(|id| Value::String(id.to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::{RecordError, RecordReader};
    use serde_json::json;

    #[test]
    fn missing_key_names_record_and_key() {
        let value = json!({ "name": "Req" });
        let reader = RecordReader::new("WorkItem", &value).unwrap();
        let err = reader.str("template").unwrap_err();
        assert_eq!(
            err,
            RecordError::MissingKey {
                record: "WorkItem",
                key: "template"
            }
        );
        assert_eq!(
            err.to_string(),
            "WorkItem record is missing required key `template`"
        );
    }

    #[test]
    fn rejects_non_object_records() {
        let value = json!(["not", "an", "object"]);
        let err = RecordReader::new("Document", &value).err().unwrap();
        assert_eq!(err, RecordError::NotAnObject { record: "Document" });
    }

    #[test]
    fn rejects_nil_uuid() {
        let value = json!({ "uuid": "00000000-0000-0000-0000-000000000000" });
        let reader = RecordReader::new("Entity", &value).unwrap();
        assert!(matches!(
            reader.uuid("uuid"),
            Err(RecordError::InvalidValue { key: "uuid", .. })
        ));
    }
}
