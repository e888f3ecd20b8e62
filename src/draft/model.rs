//! Row and draft records as they are edited, persisted and handed back
//! to the host form.
//!
//! Every cell is a string. Numbers typed by operators stay text until a
//! derivation needs them (see `derive`).

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Table-level scalars (header info, selected sub-tab, ...).
pub type FormData = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// 1-based position, reassigned whenever a row is deleted.
    #[serde(default)]
    pub id: u32,
    /// Last editor.
    #[serde(default)]
    pub user: String,
    /// Wall-clock time of the last edit, `HH:MM`.
    #[serde(default)]
    pub time: String,
    /// Derived columns the operator typed over; derivation leaves them alone.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub manual_overrides: BTreeSet<String>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl Row {
    pub fn empty(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn get(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// A field counts as filled when it has any non-whitespace character.
    pub fn is_filled(&self, field: &str) -> bool {
        !self.get(field).trim().is_empty()
    }

    /// True when any field outside `ignored` holds a value. Bookkeeping
    /// (`id`, `user`, `time`) never counts.
    pub fn has_content_except(&self, ignored: &[&str]) -> bool {
        self.fields
            .iter()
            .any(|(name, value)| !ignored.contains(&name.as_str()) && !value.trim().is_empty())
    }

    pub fn has_content(&self) -> bool {
        self.has_content_except(&[])
    }

    /// Builds a row from loosely typed JSON, as delivered by a previous
    /// server submission. Numbers and booleans become text, nulls and
    /// nested values are dropped. Returns `None` for non-objects.
    pub fn from_json(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut row = Row::default();

        for (name, value) in object {
            match name.as_str() {
                "id" => {
                    row.id = value
                        .as_u64()
                        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                        .and_then(|id| u32::try_from(id).ok())
                        .unwrap_or(0);
                }
                "user" => row.user = scalar_text(value).unwrap_or_default(),
                "time" => row.time = scalar_text(value).unwrap_or_default(),
                "manualOverrides" => {
                    if let Some(items) = value.as_array() {
                        row.manual_overrides = items
                            .iter()
                            .filter_map(|item| item.as_str().map(str::to_string))
                            .collect();
                    }
                }
                _ => {
                    if let Some(text) = scalar_text(value) {
                        row.fields.insert(name.clone(), text);
                    }
                }
            }
        }

        Some(row)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Normalises an inbound `initialData` payload. Anything that is not an
/// array of objects yields no rows.
pub fn rows_from_json(value: &Value) -> Vec<Row> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(Row::from_json).collect())
        .unwrap_or_default()
}

/// Full persisted state of one inspection table instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub form_data: FormData,
    /// RFC 3339 instant the snapshot was taken.
    #[serde(default)]
    pub timestamp: String,
}

impl Draft {
    pub fn new(rows: Vec<Row>, form_data: FormData) -> Self {
        Self {
            rows,
            form_data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn has_content(&self) -> bool {
        self.rows.iter().any(Row::has_content)
    }
}
