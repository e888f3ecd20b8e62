//! Auto-growing row list shared by every inspection table.
//!
//! The list always ends in one open row. Filling that row (as judged by the
//! table's `RowCompletion`) appends a fresh one; deleting reindexes ids from 1.

use std::sync::Arc;

use chrono::Local;

use super::model::Row;

/// Decides when the trailing row has enough in it to open a new one.
pub trait RowCompletion: Send + Sync {
    fn is_row_complete(&self, row: &Row) -> bool;
}

impl<F> RowCompletion for F
where
    F: Fn(&Row) -> bool + Send + Sync,
{
    fn is_row_complete(&self, row: &Row) -> bool {
        self(row)
    }
}

/// Any non-blank cell completes the row. Derived columns are listed in
/// `ignored` so that derivation alone never grows the table.
#[derive(Debug, Clone, Default)]
pub struct AnyFieldFilled {
    ignored: Vec<String>,
}

impl AnyFieldFilled {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ignoring(fields: &[&str]) -> Self {
        Self {
            ignored: fields.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl RowCompletion for AnyFieldFilled {
    fn is_row_complete(&self, row: &Row) -> bool {
        let ignored: Vec<&str> = self.ignored.iter().map(String::as_str).collect();
        row.has_content_except(&ignored)
    }
}

/// Segregation/changeover logs only grow once an event is fully described:
/// a type, a destination for variant changes, and a date code unless the
/// event type carries none.
#[derive(Debug, Clone)]
pub struct SegregationCompletion {
    pub type_field: String,
    pub destination_field: String,
    pub date_code_field: String,
    pub destination_types: Vec<String>,
    pub undated_types: Vec<String>,
}

impl Default for SegregationCompletion {
    fn default() -> Self {
        Self {
            type_field: "type".into(),
            destination_field: "destination".into(),
            date_code_field: "dateCode".into(),
            destination_types: vec!["Change Variant".into()],
            undated_types: vec!["Stop".into(), "Breakdown".into()],
        }
    }
}

impl RowCompletion for SegregationCompletion {
    fn is_row_complete(&self, row: &Row) -> bool {
        let kind = row.get(&self.type_field).trim();
        if kind.is_empty() {
            return false;
        }

        let needs_destination = self.destination_types.iter().any(|t| t == kind);
        if needs_destination && !row.is_filled(&self.destination_field) {
            return false;
        }

        let undated = self.undated_types.iter().any(|t| t == kind);
        undated || row.is_filled(&self.date_code_field)
    }
}

/// Editor and clock reading applied to every edited row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamp {
    pub user: String,
    pub time: String,
}

impl Stamp {
    pub fn now(user: &str) -> Self {
        Self {
            user: user.to_string(),
            time: Local::now().format("%H:%M").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edit {
    Applied { appended: bool },
    OutOfRange,
}

#[derive(Clone)]
pub struct RowListModel {
    rows: Vec<Row>,
    completion: Arc<dyn RowCompletion>,
}

impl RowListModel {
    pub fn new(completion: Arc<dyn RowCompletion>) -> Self {
        Self {
            rows: vec![Row::empty(1)],
            completion,
        }
    }

    /// Adopts rows from a draft or from `initialData`: trailing blank rows
    /// collapse into a single open row and ids are renumbered.
    pub fn from_rows(rows: Vec<Row>, completion: Arc<dyn RowCompletion>) -> Self {
        let mut model = Self { rows, completion };
        model.normalize();
        model
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_row_complete(&self, row: &Row) -> bool {
        self.completion.is_row_complete(row)
    }

    pub fn replace(&mut self, rows: Vec<Row>) {
        self.rows = rows;
        self.normalize();
    }

    pub fn reset(&mut self) {
        self.rows = vec![Row::empty(1)];
    }

    /// Mutable access for derivation passes, which never add or drop rows.
    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn update(&mut self, index: usize, field: &str, value: &str, stamp: &Stamp) -> Edit {
        let last = self.rows.len().saturating_sub(1);
        let Some(row) = self.rows.get_mut(index) else {
            return Edit::OutOfRange;
        };

        row.set(field, value);
        row.user = stamp.user.clone();
        row.time = stamp.time.clone();

        let appended = index == last && self.completion.is_row_complete(row);
        if appended {
            let next_id = self.rows.len() as u32 + 1;
            self.rows.push(Row::empty(next_id));
        }

        Edit::Applied { appended }
    }

    /// Returns false when `index` is out of range.
    pub fn delete(&mut self, index: usize) -> bool {
        if index >= self.rows.len() {
            return false;
        }

        self.rows.remove(index);
        if self.rows.is_empty() {
            self.rows.push(Row::empty(1));
        }
        self.reindex();
        true
    }

    /// Snapshot for the host form: trailing rows without content are dropped.
    pub fn filled_rows(&self) -> Vec<Row> {
        trim_trailing_blank(&self.rows)
    }

    fn normalize(&mut self) {
        let keep = trim_trailing_blank(&self.rows).len();
        self.rows.truncate(keep);

        let needs_open_row = match self.rows.last() {
            None => true,
            Some(last) => self.completion.is_row_complete(last),
        };
        if needs_open_row {
            self.rows.push(Row::empty(0));
        }
        self.reindex();
    }

    fn reindex(&mut self) {
        for (position, row) in self.rows.iter_mut().enumerate() {
            row.id = position as u32 + 1;
        }
    }
}

pub fn trim_trailing_blank(rows: &[Row]) -> Vec<Row> {
    let end = rows
        .iter()
        .rposition(Row::has_content)
        .map(|i| i + 1)
        .unwrap_or(0);
    rows[..end].to_vec()
}
