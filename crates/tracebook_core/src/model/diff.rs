//! Structural diff of two serialized records, for audit and changelogs.

use crate::model::record::Record;
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Kind of one difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    Add,
    Change,
    Remove,
}

impl DiffKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Remove => "remove",
        }
    }
}

/// One difference at a dotted path (`public.0.text`).
///
/// Path segments escape `\` and `.` with a backslash, so the option key
/// `v1.2` appears as `options.v1\.2`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub kind: DiffKind,
    pub path: String,
    /// Value in the original record; `None` for additions.
    pub old: Option<Value>,
    /// Value in the new record; `None` for removals.
    pub new: Option<Value>,
}

impl Display for DiffEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let show = |value: &Option<Value>| match value {
            Some(value) => value.to_string(),
            None => "-".to_string(),
        };
        write!(
            f,
            "{} {}: {} -> {}",
            self.kind.as_str(),
            self.path,
            show(&self.old),
            show(&self.new)
        )
    }
}

/// Compares the serialized forms of `original` and `updated`.
pub fn diff<T: Record>(original: &T, updated: &T) -> Vec<DiffEntry> {
    diff_values(&original.to_record(), &updated.to_record())
}

/// Compares two JSON values key by key and index by index.
pub fn diff_values(original: &Value, updated: &Value) -> Vec<DiffEntry> {
    let mut entries = Vec::new();
    walk("", original, updated, &mut entries);
    entries
}

fn walk(path: &str, original: &Value, updated: &Value, out: &mut Vec<DiffEntry>) {
    match (original, updated) {
        (Value::Object(left), Value::Object(right)) => {
            for (key, old) in left {
                let child = join(path, key);
                match right.get(key) {
                    Some(new) => walk(&child, old, new, out),
                    None => out.push(entry(DiffKind::Remove, child, Some(old), None)),
                }
            }
            for (key, new) in right {
                if !left.contains_key(key) {
                    out.push(entry(DiffKind::Add, join(path, key), None, Some(new)));
                }
            }
        }
        (Value::Array(left), Value::Array(right)) => {
            for index in 0..left.len().max(right.len()) {
                let child = join(path, &index.to_string());
                match (left.get(index), right.get(index)) {
                    (Some(old), Some(new)) => walk(&child, old, new, out),
                    (Some(old), None) => out.push(entry(DiffKind::Remove, child, Some(old), None)),
                    (None, Some(new)) => out.push(entry(DiffKind::Add, child, None, Some(new))),
                    (None, None) => {}
                }
            }
        }
        _ if original != updated => {
            out.push(entry(
                DiffKind::Change,
                path.to_string(),
                Some(original),
                Some(updated),
            ));
        }
        _ => {}
    }
}

fn join(path: &str, key: &str) -> String {
    let mut joined = String::with_capacity(path.len() + key.len() + 1);
    joined.push_str(path);
    if !path.is_empty() {
        joined.push('.');
    }
    for c in key.chars() {
        if c == '.' || c == '\\' {
            joined.push('\\');
        }
        joined.push(c);
    }
    joined
}

fn entry(kind: DiffKind, path: String, old: Option<&Value>, new: Option<&Value>) -> DiffEntry {
    DiffEntry {
        kind,
        path,
        old: old.cloned(),
        new: new.cloned(),
    }
}
