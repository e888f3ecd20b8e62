//! Storage keys for drafts, derived from the screen context.
//!
//! A key is `prefix` + one segment per configured context field + a mode
//! suffix, joined with `_`. Switching line, shift or product therefore
//! lands on a different draft: each context keeps its own work in progress.

use std::{collections::BTreeMap, fmt};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

const DELIMITER: char = '_';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextField {
    Line,
    Shift,
    Product,
    Username,
    ProcessOrder,
    PackageType,
}

impl ContextField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextField::Line => "line",
            ContextField::Shift => "shift",
            ContextField::Product => "product",
            ContextField::Username => "username",
            ContextField::ProcessOrder => "processOrder",
            ContextField::PackageType => "packageType",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "line" => Some(ContextField::Line),
            "shift" => Some(ContextField::Shift),
            "product" => Some(ContextField::Product),
            "username" => Some(ContextField::Username),
            "processOrder" => Some(ContextField::ProcessOrder),
            "packageType" => Some(ContextField::PackageType),
            _ => None,
        }
    }
}

/// Screen context a table is mounted under. Empty strings mean "not selected".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DraftContext {
    pub line: String,
    pub shift: String,
    pub product: String,
    pub username: String,
    pub process_order: String,
    pub package_type: String,
}

impl DraftContext {
    pub fn get(&self, field: ContextField) -> &str {
        match field {
            ContextField::Line => &self.line,
            ContextField::Shift => &self.shift,
            ContextField::Product => &self.product,
            ContextField::Username => &self.username,
            ContextField::ProcessOrder => &self.process_order,
            ContextField::PackageType => &self.package_type,
        }
    }

    /// Unrecognised names are ignored.
    pub fn from_map(values: &BTreeMap<String, String>) -> Self {
        let mut context = Self::default();
        for (name, value) in values {
            let slot = match ContextField::from_name(name) {
                Some(ContextField::Line) => &mut context.line,
                Some(ContextField::Shift) => &mut context.shift,
                Some(ContextField::Product) => &mut context.product,
                Some(ContextField::Username) => &mut context.username,
                Some(ContextField::ProcessOrder) => &mut context.process_order,
                Some(ContextField::PackageType) => &mut context.package_type,
                None => continue,
            };
            *slot = value.clone();
        }
        context
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    Primary,
    /// Layout written by older app builds, read once and migrated.
    Legacy,
}

impl KeyMode {
    fn suffix(&self) -> Option<&'static str> {
        match self {
            KeyMode::Primary => Some("draft"),
            KeyMode::Legacy => None,
        }
    }
}

/// Placeholders substituted for absent context values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTokens {
    pub fallback: String,
    pub missing_line: String,
}

impl Default for KeyTokens {
    fn default() -> Self {
        Self {
            fallback: "default".into(),
            missing_line: "no_line".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DraftKey(String);

impl DraftKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DraftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DraftKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct DraftKeyBuilder {
    prefix: String,
    fields: Vec<ContextField>,
    tokens: KeyTokens,
}

impl DraftKeyBuilder {
    pub fn new(prefix: &str, fields: &[ContextField]) -> Result<Self> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            bail!("draft key prefix must not be empty");
        }
        if prefix.chars().any(char::is_whitespace) {
            bail!("draft key prefix '{prefix}' must not contain whitespace");
        }

        Ok(Self {
            prefix: prefix.to_string(),
            fields: fields.to_vec(),
            tokens: KeyTokens::default(),
        })
    }

    pub fn with_tokens(mut self, tokens: KeyTokens) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn fields(&self) -> &[ContextField] {
        &self.fields
    }

    pub fn build_key(&self, context: &DraftContext, mode: KeyMode) -> DraftKey {
        let mut key = self.prefix.clone();

        for field in &self.fields {
            key.push(DELIMITER);
            key.push_str(&self.segment(*field, context.get(*field)));
        }

        if let Some(suffix) = mode.suffix() {
            key.push(DELIMITER);
            key.push_str(suffix);
        }

        DraftKey(key)
    }

    /// Legacy key for `context`, or `None` when that key has the shape of a
    /// primary key. "L1 draft" would otherwise read as the primary draft of
    /// line "L1" and migrating it would move another context's work.
    pub fn legacy_key(&self, context: &DraftContext) -> Option<DraftKey> {
        let key = self.build_key(context, KeyMode::Legacy);
        let primary_tail = KeyMode::Primary
            .suffix()
            .map(|suffix| format!("{DELIMITER}{suffix}"))?;
        (!key.0.ends_with(&primary_tail)).then_some(key)
    }

    fn segment(&self, field: ContextField, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return match field {
                ContextField::Line => self.tokens.missing_line.clone(),
                _ => self.tokens.fallback.clone(),
            };
        }
        normalize_whitespace(trimmed)
    }
}

/// Each whitespace run becomes a single `_`.
fn normalize_whitespace(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(&DELIMITER.to_string())
}
