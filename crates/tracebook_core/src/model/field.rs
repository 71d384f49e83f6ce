//! Typed, named field slots attachable to entities.
//!
//! # Responsibility
//! - Model the closed set of field kinds and their payloads.
//! - Encode/decode field records, dispatching on the `type` tag through a
//!   single kind registry.
//! - Merge template structure into instance fields (`reconcile`).
//!
//! # Invariants
//! - Exactly one kind per field; the kind fixes the payload shape.
//! - Every successful mutator publishes one `FieldEvent` after the new state
//!   is settled. `ExclusiveChoice` never exposes the intermediate state.
//! - Reconciliation never drops an instance option and never turns an
//!   instance `true` back into `false`.
//! - Deep copies (`Clone`) start with an empty change channel.

use crate::model::record::{Record, RecordError, RecordReader};
use crate::model::ModelError;
use crate::notify::Channel;
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

/// Field kind tag persisted as the record `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// Single-line text.
    PlainText,
    /// Multi-line text.
    LongText,
    /// One value out of an option list.
    SingleChoice,
    /// Independent checkboxes.
    MultiChoice,
    /// Radio set: setting one option clears the others.
    ExclusiveChoice,
}

impl FieldKind {
    /// Stable tag used in persisted records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlainText => "PlainText",
            Self::LongText => "LongText",
            Self::SingleChoice => "SingleChoice",
            Self::MultiChoice => "MultiChoice",
            Self::ExclusiveChoice => "ExclusiveChoice",
        }
    }

    /// Resolves a persisted tag through the kind registry.
    pub fn parse(tag: &str) -> Result<Self, RecordError> {
        FIELD_KIND_REGISTRY
            .iter()
            .find(|entry| entry.kind.as_str() == tag)
            .map(|entry| entry.kind)
            .ok_or_else(|| RecordError::UnknownKind(tag.to_string()))
    }
}

impl Display for FieldKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type PayloadDecoder = fn(&RecordReader<'_>) -> Result<FieldValue, RecordError>;

struct FieldKindEntry {
    kind: FieldKind,
    decode: PayloadDecoder,
}

/// Tag -> payload decoder. Adding a kind means adding one entry here.
const FIELD_KIND_REGISTRY: &[FieldKindEntry] = &[
    FieldKindEntry {
        kind: FieldKind::PlainText,
        decode: decode_plain_text,
    },
    FieldKindEntry {
        kind: FieldKind::LongText,
        decode: decode_long_text,
    },
    FieldKindEntry {
        kind: FieldKind::SingleChoice,
        decode: decode_single_choice,
    },
    FieldKindEntry {
        kind: FieldKind::MultiChoice,
        decode: decode_multi_choice,
    },
    FieldKindEntry {
        kind: FieldKind::ExclusiveChoice,
        decode: decode_exclusive_choice,
    },
];

/// Kind-specific field payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    PlainText {
        text: String,
    },
    LongText {
        text: String,
    },
    SingleChoice {
        options: Vec<String>,
        default: String,
        current: String,
    },
    MultiChoice {
        options: IndexMap<String, bool>,
    },
    ExclusiveChoice {
        options: IndexMap<String, bool>,
        max_allowed: usize,
    },
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::PlainText { .. } => FieldKind::PlainText,
            Self::LongText { .. } => FieldKind::LongText,
            Self::SingleChoice { .. } => FieldKind::SingleChoice,
            Self::MultiChoice { .. } => FieldKind::MultiChoice,
            Self::ExclusiveChoice { .. } => FieldKind::ExclusiveChoice,
        }
    }
}

/// What changed inside one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldChange {
    Text,
    Current(String),
    Option { key: String, state: bool },
    Renamed { from: String },
    Reconciled,
}

/// Payload published on a field's change channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEvent {
    /// Field name after the change.
    pub field: String,
    pub change: FieldChange,
}

/// One typed, named, editable value slot.
#[derive(Debug)]
pub struct Field {
    name: String,
    value: FieldValue,
    changed: Channel<FieldEvent>,
}

impl Field {
    /// Creates a field from an explicit payload.
    pub fn from_value(name: impl Into<String>, value: FieldValue) -> Self {
        Self {
            name: name.into(),
            value,
            changed: Channel::new(),
        }
    }

    pub fn plain_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::from_value(name, FieldValue::PlainText { text: text.into() })
    }

    pub fn long_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::from_value(name, FieldValue::LongText { text: text.into() })
    }

    /// Creates a single-choice field whose current value starts at `default`.
    ///
    /// # Errors
    /// - `OptionNotFound` when `options` is non-empty and does not contain
    ///   `default`.
    pub fn single_choice<I, S>(
        name: impl Into<String>,
        options: I,
        default: impl Into<String>,
    ) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let options: Vec<String> = options.into_iter().map(Into::into).collect();
        let default = default.into();
        if !options.is_empty() && !options.contains(&default) {
            return Err(ModelError::OptionNotFound {
                field: name,
                option: default,
            });
        }
        Ok(Self::from_value(
            name,
            FieldValue::SingleChoice {
                options,
                current: default.clone(),
                default,
            },
        ))
    }

    pub fn multi_choice<I, S>(name: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let options = collect_options(options);
        Self::from_value(name, FieldValue::MultiChoice { options })
    }

    /// Creates a radio set. `max_allowed = None` derives the limit from the
    /// number of initially selected options.
    pub fn exclusive_choice<I, S>(
        name: impl Into<String>,
        options: I,
        max_allowed: Option<usize>,
    ) -> Self
    where
        I: IntoIterator<Item = (S, bool)>,
        S: Into<String>,
    {
        let options = collect_options(options);
        let max_allowed = max_allowed.unwrap_or_else(|| count_selected(&options));
        Self::from_value(
            name,
            FieldValue::ExclusiveChoice {
                options,
                max_allowed,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.value.kind()
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    /// Change channel for this field.
    pub fn changed(&self) -> &Channel<FieldEvent> {
        &self.changed
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let from = std::mem::replace(&mut self.name, name.into());
        self.notify(FieldChange::Renamed { from });
    }

    pub fn text(&self) -> Result<&str, ModelError> {
        match &self.value {
            FieldValue::PlainText { text } | FieldValue::LongText { text } => Ok(text),
            _ => Err(self.mismatch("PlainText or LongText")),
        }
    }

    pub fn set_text(&mut self, value: impl Into<String>) -> Result<(), ModelError> {
        match &mut self.value {
            FieldValue::PlainText { text } | FieldValue::LongText { text } => {
                *text = value.into();
            }
            _ => return Err(self.mismatch("PlainText or LongText")),
        }
        self.notify(FieldChange::Text);
        Ok(())
    }

    /// Current selection of a single-choice field.
    pub fn current(&self) -> Result<&str, ModelError> {
        match &self.value {
            FieldValue::SingleChoice { current, .. } => Ok(current),
            _ => Err(self.mismatch("SingleChoice")),
        }
    }

    /// Option list of a single-choice field.
    pub fn choices(&self) -> Result<&[String], ModelError> {
        match &self.value {
            FieldValue::SingleChoice { options, .. } => Ok(options),
            _ => Err(self.mismatch("SingleChoice")),
        }
    }

    pub fn set_current(&mut self, value: &str) -> Result<(), ModelError> {
        match &mut self.value {
            FieldValue::SingleChoice {
                options, current, ..
            } => {
                if !options.iter().any(|option| option == value) {
                    return Err(ModelError::OptionNotFound {
                        field: self.name.clone(),
                        option: value.to_string(),
                    });
                }
                *current = value.to_string();
            }
            _ => return Err(self.mismatch("SingleChoice")),
        }
        self.notify(FieldChange::Current(value.to_string()));
        Ok(())
    }

    /// Option states of a multi/exclusive choice field, in declaration order.
    pub fn options(&self) -> Result<&IndexMap<String, bool>, ModelError> {
        match &self.value {
            FieldValue::MultiChoice { options } | FieldValue::ExclusiveChoice { options, .. } => {
                Ok(options)
            }
            _ => Err(self.mismatch("MultiChoice or ExclusiveChoice")),
        }
    }

    pub fn option(&self, key: &str) -> Result<bool, ModelError> {
        self.options()?
            .get(key)
            .copied()
            .ok_or_else(|| ModelError::OptionNotFound {
                field: self.name.clone(),
                option: key.to_string(),
            })
    }

    /// Sets one option state.
    ///
    /// For `ExclusiveChoice`, selecting an option clears every other option
    /// before the change is published.
    pub fn set_option(&mut self, key: &str, state: bool) -> Result<(), ModelError> {
        let (options, exclusive) = match &mut self.value {
            FieldValue::MultiChoice { options } => (options, false),
            FieldValue::ExclusiveChoice { options, .. } => (options, true),
            _ => return Err(self.mismatch("MultiChoice or ExclusiveChoice")),
        };
        if !options.contains_key(key) {
            return Err(ModelError::OptionNotFound {
                field: self.name.clone(),
                option: key.to_string(),
            });
        }
        if exclusive && state {
            for (candidate, selected) in options.iter_mut() {
                *selected = candidate == key;
            }
        } else if let Some(selected) = options.get_mut(key) {
            *selected = state;
        }
        self.notify(FieldChange::Option {
            key: key.to_string(),
            state,
        });
        Ok(())
    }

    /// Selection limit of an exclusive choice field.
    pub fn max_allowed(&self) -> Option<usize> {
        match &self.value {
            FieldValue::ExclusiveChoice { max_allowed, .. } => Some(*max_allowed),
            _ => None,
        }
    }

    /// Merges template-owned structure into this field.
    ///
    /// Returns whether anything changed; a publish happens only then.
    ///
    /// # Errors
    /// - `TypeMismatch` when `template` is a different kind.
    pub fn reconcile(&mut self, template: &Field) -> Result<bool, ModelError> {
        if self.kind() != template.kind() {
            return Err(ModelError::TypeMismatch {
                field: self.name.clone(),
                expected: template.kind().as_str(),
                found: self.kind(),
            });
        }

        Ok(self.merge_template(template))
    }

    /// Same-kind merge behind [`Field::reconcile`]. Payloads of different
    /// kinds are left untouched.
    pub(crate) fn merge_template(&mut self, template: &Field) -> bool {
        let mut changed = false;
        if self.name != template.name {
            self.name = template.name.clone();
            changed = true;
        }

        match (&mut self.value, &template.value) {
            (FieldValue::PlainText { .. }, FieldValue::PlainText { .. })
            | (FieldValue::LongText { .. }, FieldValue::LongText { .. }) => {}
            (
                FieldValue::SingleChoice {
                    options,
                    default,
                    current,
                },
                FieldValue::SingleChoice {
                    options: template_options,
                    default: template_default,
                    ..
                },
            ) => {
                if options != template_options {
                    options.clone_from(template_options);
                    changed = true;
                }
                if default != template_default {
                    default.clone_from(template_default);
                    changed = true;
                }
                if !options.contains(current) && current != default {
                    current.clone_from(default);
                    changed = true;
                }
            }
            (
                FieldValue::MultiChoice { options },
                FieldValue::MultiChoice {
                    options: template_options,
                },
            ) => {
                changed |= merge_options(options, template_options, false);
            }
            (
                FieldValue::ExclusiveChoice {
                    options,
                    max_allowed,
                },
                FieldValue::ExclusiveChoice {
                    options: template_options,
                    max_allowed: template_max,
                },
            ) => {
                changed |= merge_options(options, template_options, true);
                if max_allowed != template_max {
                    *max_allowed = *template_max;
                    changed = true;
                }
            }
            _ => {}
        }

        if changed {
            self.notify(FieldChange::Reconciled);
        }
        changed
    }

    fn notify(&self, change: FieldChange) {
        self.changed.publish(&FieldEvent {
            field: self.name.clone(),
            change,
        });
    }

    fn mismatch(&self, expected: &'static str) -> ModelError {
        ModelError::TypeMismatch {
            field: self.name.clone(),
            expected,
            found: self.kind(),
        }
    }
}

impl Clone for Field {
    fn clone(&self) -> Self {
        Self::from_value(self.name.clone(), self.value.clone())
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.to_record() == other.to_record()
    }
}

impl PartialEq<Value> for Field {
    fn eq(&self, other: &Value) -> bool {
        self.to_record() == *other
    }
}

impl Record for Field {
    const RECORD_KIND: &'static str = "Field";

    fn to_record(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("type".into(), Value::String(self.kind().as_str().into()));
        match &self.value {
            FieldValue::PlainText { text } | FieldValue::LongText { text } => {
                map.insert("text".into(), Value::String(text.clone()));
            }
            FieldValue::SingleChoice {
                options,
                default,
                current,
            } => {
                map.insert(
                    "options".into(),
                    Value::Array(options.iter().cloned().map(Value::String).collect()),
                );
                map.insert("default".into(), Value::String(default.clone()));
                map.insert("current".into(), Value::String(current.clone()));
            }
            FieldValue::MultiChoice { options } => {
                map.insert("options".into(), options_record(options));
            }
            FieldValue::ExclusiveChoice {
                options,
                max_allowed,
            } => {
                map.insert("options".into(), options_record(options));
                map.insert("maxallowed".into(), Value::from(*max_allowed as u64));
            }
        }
        Value::Object(map)
    }

    fn from_record(record: &Value) -> Result<Self, RecordError> {
        let reader = RecordReader::new(Self::RECORD_KIND, record)?;
        let tag = reader.str("type")?;
        let entry = FIELD_KIND_REGISTRY
            .iter()
            .find(|entry| entry.kind.as_str() == tag)
            .ok_or_else(|| RecordError::UnknownKind(tag.to_string()))?;

        let typed = RecordReader::new(entry.kind.as_str(), record)?;
        let name = typed.string("name")?;
        let value = (entry.decode)(&typed)?;
        Ok(Self::from_value(name, value))
    }
}

fn collect_options<I, S>(options: I) -> IndexMap<String, bool>
where
    I: IntoIterator<Item = (S, bool)>,
    S: Into<String>,
{
    options
        .into_iter()
        .map(|(key, state)| (key.into(), state))
        .collect()
}

fn count_selected(options: &IndexMap<String, bool>) -> usize {
    options.values().filter(|selected| **selected).count()
}

fn options_record(options: &IndexMap<String, bool>) -> Value {
    Value::Object(
        options
            .iter()
            .map(|(key, state)| (key.clone(), Value::Bool(*state)))
            .collect(),
    )
}

// New template keys are added; existing keys keep the instance state.
fn merge_options(
    current: &mut IndexMap<String, bool>,
    template: &IndexMap<String, bool>,
    exclusive: bool,
) -> bool {
    let mut changed = false;
    for (key, template_state) in template {
        if current.contains_key(key) {
            continue;
        }
        let occupied = exclusive && current.values().any(|selected| *selected);
        current.insert(key.clone(), *template_state && !occupied);
        changed = true;
    }
    changed
}

fn decode_plain_text(reader: &RecordReader<'_>) -> Result<FieldValue, RecordError> {
    Ok(FieldValue::PlainText {
        text: reader.string("text")?,
    })
}

fn decode_long_text(reader: &RecordReader<'_>) -> Result<FieldValue, RecordError> {
    Ok(FieldValue::LongText {
        text: reader.string("text")?,
    })
}

fn decode_single_choice(reader: &RecordReader<'_>) -> Result<FieldValue, RecordError> {
    let options = reader.strings("options")?;
    let default = reader.string("default")?;
    let current = if reader.has("current") {
        reader.string("current")?
    } else {
        default.clone()
    };
    Ok(FieldValue::SingleChoice {
        options,
        default,
        current,
    })
}

fn decode_option_states(reader: &RecordReader<'_>) -> Result<IndexMap<String, bool>, RecordError> {
    reader
        .object("options")?
        .iter()
        .map(|(key, state)| {
            state
                .as_bool()
                .map(|state| (key.clone(), state))
                .ok_or_else(|| reader.invalid("options", "an object of booleans"))
        })
        .collect()
}

fn decode_multi_choice(reader: &RecordReader<'_>) -> Result<FieldValue, RecordError> {
    Ok(FieldValue::MultiChoice {
        options: decode_option_states(reader)?,
    })
}

fn decode_exclusive_choice(reader: &RecordReader<'_>) -> Result<FieldValue, RecordError> {
    let options = decode_option_states(reader)?;
    let max_allowed = match reader.i64("maxallowed")? {
        -1 => count_selected(&options),
        value if value >= 0 => value as usize,
        _ => return Err(reader.invalid("maxallowed", "-1 or a non-negative integer")),
    };
    Ok(FieldValue::ExclusiveChoice {
        options,
        max_allowed,
    })
}

#[cfg(test)]
mod tests {
    use super::{Field, FieldChange, FieldKind, FIELD_KIND_REGISTRY};
    use crate::model::record::{Record, RecordError};
    use crate::model::ModelError;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn radio() -> Field {
        Field::exclusive_choice(
            "Severity",
            [("Low", false), ("Medium", false), ("High", false)],
            Some(1),
        )
    }

    #[test]
    fn registry_tags_match_kind_names() {
        for entry in FIELD_KIND_REGISTRY {
            let tag = entry.kind.as_str();
            assert_eq!(FieldKind::parse(tag).unwrap(), entry.kind);
        }
        assert_eq!(FIELD_KIND_REGISTRY.len(), 5);
    }

    #[test]
    fn exclusive_choice_clears_other_options() {
        let mut field = radio();
        field.set_option("Low", true).unwrap();
        field.set_option("High", true).unwrap();

        assert!(field.option("High").unwrap());
        assert!(!field.option("Low").unwrap());
        assert!(!field.option("Medium").unwrap());
    }

    #[test]
    fn exclusive_choice_listener_sees_settled_state_once() {
        let mut field = radio();
        field.set_option("Low", true).unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        field.changed().subscribe(move |event| sink.borrow_mut().push(event.change.clone()));

        field.set_option("Medium", true).unwrap();
        assert_eq!(
            *events.borrow(),
            vec![FieldChange::Option {
                key: "Medium".to_string(),
                state: true
            }]
        );
    }

    #[test]
    fn exclusive_choice_auto_derives_max_allowed() {
        let field = Field::exclusive_choice("Pick", [("a", true), ("b", true), ("c", false)], None);
        assert_eq!(field.max_allowed(), Some(2));

        let record = json!({
            "name": "Pick",
            "type": "ExclusiveChoice",
            "options": { "a": true, "b": false },
            "maxallowed": -1
        });
        let decoded = Field::from_record(&record).unwrap();
        assert_eq!(decoded.max_allowed(), Some(1));
    }

    #[test]
    fn checks_record_reflects_set_option() {
        let mut field = Field::multi_choice("Checks", [("A", false), ("B", false)]);
        field.set_option("A", true).unwrap();

        let record = field.to_record();
        assert_eq!(record["options"], json!({ "A": true, "B": false }));
        assert_eq!(record["type"], "MultiChoice");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let record = json!({ "name": "x", "type": "Slider" });
        let err = Field::from_record(&record).unwrap_err();
        assert_eq!(err, RecordError::UnknownKind("Slider".to_string()));
    }

    #[test]
    fn missing_payload_key_names_the_kind() {
        let record = json!({ "name": "x", "type": "LongText" });
        let err = Field::from_record(&record).unwrap_err();
        assert_eq!(
            err,
            RecordError::MissingKey {
                record: "LongText",
                key: "text"
            }
        );
    }

    #[test]
    fn wrong_kind_mutator_is_type_mismatch() {
        let mut field = Field::long_text("Req", "");
        let err = field.set_option("A", true).unwrap_err();
        assert!(matches!(
            err,
            ModelError::TypeMismatch {
                found: FieldKind::LongText,
                ..
            }
        ));
    }

    #[test]
    fn single_choice_rejects_unknown_default_and_value() {
        let err = Field::single_choice("Owner", ["EE", "SW"], "ME").unwrap_err();
        assert!(matches!(err, ModelError::OptionNotFound { .. }));

        let mut field = Field::single_choice("Owner", ["EE", "SW"], "EE").unwrap();
        assert!(field.set_current("ME").is_err());
        field.set_current("SW").unwrap();
        assert_eq!(field.current().unwrap(), "SW");
    }

    #[test]
    fn reconcile_text_keeps_instance_text() {
        let mut instance = Field::long_text("Req", "user text");
        let template = Field::long_text("Req", "template text");
        assert!(!instance.reconcile(&template).unwrap());
        assert_eq!(instance.text().unwrap(), "user text");
    }

    #[test]
    fn reconcile_single_choice_resets_invalid_selection() {
        let mut instance = Field::single_choice("Owner", ["EE", "SW", "ME"], "EE").unwrap();
        instance.set_current("ME").unwrap();
        let template = Field::single_choice("Owner", ["EE", "SW"], "SW").unwrap();

        assert!(instance.reconcile(&template).unwrap());
        assert_eq!(instance.choices().unwrap(), ["EE", "SW"]);
        assert_eq!(instance.current().unwrap(), "SW");
        assert!(!instance.reconcile(&template).unwrap());
    }

    #[test]
    fn reconcile_checks_adds_keys_and_keeps_true_values() {
        let mut instance = Field::multi_choice("Checks", [("A", false), ("B", false)]);
        instance.set_option("A", true).unwrap();
        let template = Field::multi_choice("Checks", [("A", false), ("C", true), ("D", false)]);

        assert!(instance.reconcile(&template).unwrap());
        assert!(instance.option("A").unwrap());
        assert!(!instance.option("B").unwrap());
        assert!(instance.option("C").unwrap());
        assert!(!instance.option("D").unwrap());
        assert!(!instance.reconcile(&template).unwrap());
    }

    #[test]
    fn reconcile_radio_keeps_exclusivity() {
        let mut instance = radio();
        instance.set_option("Low", true).unwrap();
        let template = Field::exclusive_choice(
            "Severity",
            [("Low", false), ("Critical", true)],
            Some(1),
        );

        assert!(instance.reconcile(&template).unwrap());
        assert!(instance.option("Low").unwrap());
        assert!(!instance.option("Critical").unwrap());
    }

    #[test]
    fn reconcile_across_kinds_fails() {
        let mut instance = Field::plain_text("Req", "");
        let template = Field::long_text("Req", "");
        let err = instance.reconcile(&template).unwrap_err();
        assert!(matches!(err, ModelError::TypeMismatch { .. }));
    }

    #[test]
    fn clone_has_fresh_channel_and_equal_record() {
        let field = Field::plain_text("Title", "abc");
        field.changed().subscribe(|_| {});
        let copy = field.clone();
        assert_eq!(copy.changed().subscriber_count(), 0);
        assert_eq!(copy, field);
        assert_eq!(field, field.to_record());
    }
}
