//! Cross-field derivation, run synchronously after every mutation.
//!
//! Three rule kinds exist:
//! - flavour propagation from "Change Variant" events,
//! - `total = left + right` unless the operator typed over the total,
//! - a line letter appended to date codes when the line changes.
//!
//! Unparseable numbers count as absent; nothing here fails.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use regex::Regex;

use super::model::Row;

#[derive(Debug, Clone)]
pub struct FlavourRule {
    pub type_field: String,
    pub event_value: String,
    pub destination_field: String,
    /// Event time column; `None` uses the row's edit stamp.
    pub time_field: Option<String>,
    pub target_field: String,
}

impl Default for FlavourRule {
    fn default() -> Self {
        Self {
            type_field: "type".into(),
            event_value: "Change Variant".into(),
            destination_field: "destination".into(),
            time_field: None,
            target_field: "flavour".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SumRule {
    pub left: String,
    pub right: String,
    pub total: String,
}

impl SumRule {
    pub fn new(left: &str, right: &str, total: &str) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            total: total.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SuffixRule {
    pub fields: Vec<String>,
    pattern: Regex,
    /// Explicit line -> letter assignments; others are derived from the name.
    pub line_letters: BTreeMap<String, char>,
}

impl SuffixRule {
    /// `date_pattern` describes the bare date code, without the letter.
    pub fn new(fields: &[&str], date_pattern: &str) -> Result<Self> {
        let pattern = Regex::new(&format!("^(?P<date>{date_pattern})(?P<letter>[A-Z])?$"))
            .with_context(|| format!("invalid date code pattern {date_pattern}"))?;
        Ok(Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            pattern,
            line_letters: BTreeMap::new(),
        })
    }

    pub fn with_letter(mut self, line: &str, letter: char) -> Self {
        self.line_letters.insert(line.to_string(), letter);
        self
    }

    /// "Line 3" -> 'C', "Line B" -> 'B'.
    pub fn letter_for(&self, line: &str) -> Option<char> {
        let line = line.trim();
        if let Some(letter) = self.line_letters.get(line) {
            return Some(*letter);
        }

        let last = line.chars().last()?;
        if let Some(digit) = last.to_digit(10) {
            (1..=9)
                .contains(&digit)
                .then(|| char::from(b'A' + (digit as u8 - 1)))
        } else if last.is_ascii_alphabetic() {
            Some(last.to_ascii_uppercase())
        } else {
            None
        }
    }

    fn suffixed(&self, value: &str, letter: char) -> Option<String> {
        let captures = self.pattern.captures(value.trim())?;
        let date = captures.name("date")?.as_str();
        Some(format!("{date}{letter}"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeriveRules {
    pub flavour: Option<FlavourRule>,
    pub sums: Vec<SumRule>,
    pub suffix: Option<SuffixRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeriveContext {
    pub base_product: String,
    pub line: String,
}

#[derive(Debug, Clone, Default)]
pub struct DerivedFieldEngine {
    rules: DeriveRules,
}

impl DerivedFieldEngine {
    pub fn new(rules: DeriveRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &DeriveRules {
        &self.rules
    }

    /// Records that the operator typed into `field`. Typing into a sum
    /// total pins it against recomputation.
    pub fn note_manual_edit(&self, row: &mut Row, field: &str) {
        if self.rules.sums.iter().any(|s| s.total == field) {
            row.manual_overrides.insert(field.to_string());
        }
    }

    /// Pure form of [`DerivedFieldEngine::apply`].
    pub fn derive_fields(&self, rows: &[Row], context: &DeriveContext) -> Vec<Row> {
        let mut rows = rows.to_vec();
        self.apply(&mut rows, context);
        rows
    }

    pub fn apply(&self, rows: &mut [Row], context: &DeriveContext) {
        for rule in &self.rules.sums {
            for row in rows.iter_mut() {
                apply_sum(rule, row);
            }
        }

        if let Some(rule) = &self.rules.flavour {
            Self::propagate_flavour(rule, rows, context);
        }
    }

    /// Flavour in effect after every recorded event.
    pub fn effective_flavour(&self, rows: &[Row], context: &DeriveContext) -> String {
        let Some(rule) = &self.rules.flavour else {
            return context.base_product.clone();
        };

        variant_events(rule, rows)
            .last()
            .map(|event| event.destination.clone())
            .unwrap_or_else(|| context.base_product.clone())
    }

    /// Re-letters date codes for `line`. Values that no longer look like a
    /// date code are left alone. Returns how many cells changed.
    pub fn apply_line_suffix(&self, rows: &mut [Row], line: &str) -> usize {
        let Some(rule) = &self.rules.suffix else {
            return 0;
        };
        let Some(letter) = rule.letter_for(line) else {
            return 0;
        };

        let mut changed = 0;
        for row in rows.iter_mut() {
            for field in &rule.fields {
                let Some(next) = rule.suffixed(row.get(field), letter) else {
                    continue;
                };
                if next != row.get(field) {
                    row.set(field, next);
                    changed += 1;
                }
            }
        }
        changed
    }

    fn propagate_flavour(rule: &FlavourRule, rows: &mut [Row], context: &DeriveContext) {
        let events = variant_events(rule, rows);

        for index in 0..rows.len() {
            if !rows[index].has_content_except(&[rule.target_field.as_str()]) {
                continue;
            }

            let position = (event_time(rule, &rows[index]), index);
            let flavour = events
                .iter()
                .filter(|event| (event.time, event.index) <= position)
                .last()
                .map(|event| event.destination.as_str())
                .unwrap_or(context.base_product.as_str());

            if !flavour.is_empty() && rows[index].get(&rule.target_field) != flavour {
                let flavour = flavour.to_string();
                rows[index].set(&rule.target_field, flavour);
            }
        }
    }
}

struct VariantEvent {
    time: Option<NaiveTime>,
    index: usize,
    destination: String,
}

/// Events ordered by time; equal times fall back to row order.
///
/// Times are clock readings without a date, so ordering assumes a log that
/// does not cross midnight: on a night shift 00:10 sorts before 23:50.
/// Tables spanning midnight should set `FlavourRule::time_field` to a
/// column holding `HH:MM` relative to the shift start.
fn variant_events(rule: &FlavourRule, rows: &[Row]) -> Vec<VariantEvent> {
    let mut events: Vec<VariantEvent> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.get(&rule.type_field).trim() == rule.event_value)
        .filter(|(_, row)| row.is_filled(&rule.destination_field))
        .map(|(index, row)| VariantEvent {
            time: event_time(rule, row),
            index,
            destination: row.get(&rule.destination_field).trim().to_string(),
        })
        .collect();
    events.sort_by_key(|event| (event.time, event.index));
    events
}

fn event_time(rule: &FlavourRule, row: &Row) -> Option<NaiveTime> {
    let raw = match &rule.time_field {
        Some(field) => row.get(field),
        None => row.time.as_str(),
    };
    parse_time(raw)
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

fn apply_sum(rule: &SumRule, row: &mut Row) {
    let left = parse_number(row.get(&rule.left));
    let right = parse_number(row.get(&rule.right));

    if !row.is_filled(&rule.left) && !row.is_filled(&rule.right) {
        row.manual_overrides.remove(&rule.total);
        return;
    }
    if row.manual_overrides.contains(&rule.total) {
        return;
    }
    if let (Some(left), Some(right)) = (left, right) {
        row.set(&rule.total, format_number(left + right));
    }
}

pub fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let text = format!("{value:.6}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
