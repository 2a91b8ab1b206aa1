//! Tabular financial data: one statement or one price history.
//!
//! Rows are stored positionally against a shared column list. One column is
//! the period key (a date); a valid table has its rows sorted by that key with
//! no duplicates, and every column holds a single scalar kind.

use crate::error::CacheError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single typed cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Date(NaiveDate),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Scalar::Null => None,
            Scalar::Date(_) => Some(ColumnKind::Date),
            Scalar::Float(_) => Some(ColumnKind::Float),
            Scalar::Text(_) => Some(ColumnKind::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Scalar::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render for CSV output: ISO dates, shortest round-trip floats, empty null.
    pub fn to_field(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Date(d) => d.format("%Y-%m-%d").to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }

    /// Parse a raw field as the given kind. Empty fields are null.
    ///
    /// Date and number fields are trimmed; text is kept byte for byte.
    pub fn parse_as(raw: &str, kind: ColumnKind) -> Option<Scalar> {
        if kind == ColumnKind::Text {
            return Some(if raw.is_empty() {
                Scalar::Null
            } else {
                Scalar::Text(raw.to_string())
            });
        }
        let raw = raw.trim();
        if raw.is_empty() {
            return Some(Scalar::Null);
        }
        match kind {
            ColumnKind::Date => parse_date(raw).map(Scalar::Date),
            ColumnKind::Float => raw.parse::<f64>().ok().map(Scalar::Float),
            ColumnKind::Text => Some(Scalar::Text(raw.to_string())),
        }
    }
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part (`T...` or ` ...`).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date_part = match raw.len() {
        10 => raw,
        n if n > 10 && matches!(raw.as_bytes()[10], b'T' | b' ') => raw.get(..10)?,
        _ => return None,
    };
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Date,
    Float,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// An ordered table keyed by a date column.
#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    columns: Vec<Column>,
    rows: Vec<Vec<Scalar>>,
    key_column: usize,
}

impl DataTable {
    /// Build a table. Fails if `key_column` is not one of `columns`.
    ///
    /// Shape invariants are not checked here; call [`DataTable::normalize`]
    /// or [`DataTable::validate`] before handing the table to a tier.
    pub fn new(
        columns: Vec<Column>,
        rows: Vec<Vec<Scalar>>,
        key_column: &str,
    ) -> Result<Self, CacheError> {
        let key_column = columns
            .iter()
            .position(|c| c.name == key_column)
            .ok_or_else(|| CacheError::malformed(format!("missing key column '{key_column}'")))?;
        Ok(Self {
            columns,
            rows,
            key_column,
        })
    }

    /// Build a table from raw text records.
    ///
    /// With `kinds` the columns are parsed as given; otherwise each column's
    /// kind is inferred: all non-empty cells are dates → `Date`, all parse as
    /// numbers → `Float`, anything else → `Text`.
    pub fn from_records(
        headers: Vec<String>,
        records: Vec<Vec<String>>,
        key_column: &str,
        kinds: Option<&[ColumnKind]>,
    ) -> Result<Self, CacheError> {
        if let Some((i, rec)) = records
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != headers.len())
        {
            return Err(CacheError::malformed(format!(
                "record {i} has {} fields, header has {}",
                rec.len(),
                headers.len()
            )));
        }

        let kinds: Vec<ColumnKind> = match kinds {
            Some(k) if k.len() == headers.len() => k.to_vec(),
            Some(k) => {
                return Err(CacheError::malformed(format!(
                    "{} column kinds for {} columns",
                    k.len(),
                    headers.len()
                )))
            }
            None => Self::infer_kinds(&records, headers.len()),
        };

        let mut rows = Vec::with_capacity(records.len());
        for (i, rec) in records.iter().enumerate() {
            let mut row = Vec::with_capacity(rec.len());
            for (col, raw) in rec.iter().enumerate() {
                let cell = Scalar::parse_as(raw, kinds[col]).ok_or_else(|| {
                    CacheError::malformed(format!(
                        "row {i}, column '{}': cannot parse '{raw}' as {:?}",
                        headers[col], kinds[col]
                    ))
                })?;
                row.push(cell);
            }
            rows.push(row);
        }

        let columns = headers
            .into_iter()
            .zip(kinds)
            .map(|(name, kind)| Column { name, kind })
            .collect();
        Self::new(columns, rows, key_column)
    }

    /// Per-column kind guess over raw records, as [`DataTable::from_records`]
    /// does when no kinds are given.
    pub fn infer_kinds(records: &[Vec<String>], width: usize) -> Vec<ColumnKind> {
        (0..width)
            .map(|col| infer_kind(records.iter().filter_map(|r| r.get(col)).map(String::as_str)))
            .collect()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Scalar>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn key_column(&self) -> &Column {
        &self.columns[self.key_column]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell lookup by row index and column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Scalar> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn column_values(&self, name: &str) -> Option<Vec<&Scalar>> {
        let col = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[col]).collect())
    }

    /// Values of a float column; nulls become `None`.
    pub fn float_column(&self, name: &str) -> Result<Vec<Option<f64>>, CacheError> {
        let col = self
            .column_index(name)
            .ok_or_else(|| CacheError::malformed(format!("missing column '{name}'")))?;
        if self.columns[col].kind != ColumnKind::Float {
            return Err(CacheError::malformed(format!(
                "column '{name}' is {:?}, expected Float",
                self.columns[col].kind
            )));
        }
        Ok(self.rows.iter().map(|r| r[col].as_f64()).collect())
    }

    /// Period keys in row order. Null keys are skipped.
    pub fn key_dates(&self) -> Vec<NaiveDate> {
        self.rows
            .iter()
            .filter_map(|r| r[self.key_column].as_date())
            .collect()
    }

    /// Check the shape invariants.
    pub fn validate(&self) -> Result<(), CacheError> {
        let width = self.columns.len();
        if self.key_column().kind != ColumnKind::Date {
            return Err(CacheError::malformed(format!(
                "key column '{}' is not a date column",
                self.key_column().name
            )));
        }

        let mut prev: Option<NaiveDate> = None;
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != width {
                return Err(CacheError::malformed(format!(
                    "row {i} has {} cells, expected {width}",
                    row.len()
                )));
            }
            for (cell, column) in row.iter().zip(&self.columns) {
                if let Some(kind) = cell.kind() {
                    if kind != column.kind {
                        return Err(CacheError::malformed(format!(
                            "row {i}, column '{}': {kind:?} cell in {:?} column",
                            column.name, column.kind
                        )));
                    }
                }
            }
            let key = row[self.key_column]
                .as_date()
                .ok_or_else(|| CacheError::malformed(format!("row {i} has a null period key")))?;
            if let Some(p) = prev {
                match p.cmp(&key) {
                    Ordering::Less => {}
                    Ordering::Equal => {
                        return Err(CacheError::malformed(format!("duplicate period key {key}")))
                    }
                    Ordering::Greater => {
                        return Err(CacheError::malformed(format!(
                            "rows not sorted: {key} follows {p}"
                        )))
                    }
                }
            }
            prev = Some(key);
        }
        Ok(())
    }

    /// Sort rows by period key (stable) and validate.
    ///
    /// Duplicate keys are not collapsed: they are reported as malformed.
    pub fn normalize(mut self) -> Result<Self, CacheError> {
        let key = self.key_column;
        self.rows.sort_by(|a, b| {
            let ka = a.get(key).and_then(Scalar::as_date);
            let kb = b.get(key).and_then(Scalar::as_date);
            // Null keys sort first; validate() rejects them below.
            ka.cmp(&kb)
        });
        self.validate()?;
        Ok(self)
    }

    /// Keep the rows whose `column` equals `ticker` and drop that column.
    pub fn filter_ticker(&self, column: &str, ticker: &str) -> Result<Self, CacheError> {
        let col = self
            .column_index(column)
            .ok_or_else(|| CacheError::malformed(format!("missing ticker column '{column}'")))?;
        if col == self.key_column {
            return Err(CacheError::malformed("ticker column is the period key"));
        }

        let rows = self
            .rows
            .iter()
            .filter(|r| {
                r.get(col)
                    .and_then(Scalar::as_text)
                    .is_some_and(|t| t.trim().eq_ignore_ascii_case(ticker))
            })
            .map(|r| {
                let mut row = r.clone();
                row.remove(col);
                row
            })
            .collect();

        let mut columns = self.columns.clone();
        columns.remove(col);
        let key_column = if col < self.key_column {
            self.key_column - 1
        } else {
            self.key_column
        };

        Ok(Self {
            columns,
            rows,
            key_column,
        })
    }

    /// Positions `(row, column)` of empty text cells. CSV writes them the
    /// same way as nulls.
    pub(crate) fn empty_text_cells(&self) -> Vec<(usize, usize)> {
        let mut cells = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            for (j, cell) in row.iter().enumerate() {
                if matches!(cell, Scalar::Text(s) if s.is_empty()) {
                    cells.push((i, j));
                }
            }
        }
        cells
    }

    /// Turn the null cells at `cells` back into empty text. Positions that
    /// are out of range, hold a value, or sit in a non-text column are skipped.
    pub(crate) fn restore_empty_text(&mut self, cells: &[(usize, usize)]) {
        for &(i, j) in cells {
            if self.columns.get(j).map(|c| c.kind) != Some(ColumnKind::Text) {
                continue;
            }
            if let Some(cell) = self.rows.get_mut(i).and_then(|r| r.get_mut(j)) {
                if cell.is_null() {
                    *cell = Scalar::Text(String::new());
                }
            }
        }
    }

    /// Copy of this table with `name` appended, or replaced if it exists.
    pub fn with_column(
        &self,
        name: &str,
        kind: ColumnKind,
        values: Vec<Scalar>,
    ) -> Result<Self, CacheError> {
        if values.len() != self.rows.len() {
            return Err(CacheError::malformed(format!(
                "column '{name}' has {} values for {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        let mut out = self.clone();
        match out.column_index(name) {
            Some(col) if col == out.key_column => {
                return Err(CacheError::malformed(format!(
                    "cannot replace key column '{name}'"
                )))
            }
            Some(col) => {
                out.columns[col].kind = kind;
                for (row, v) in out.rows.iter_mut().zip(values) {
                    row[col] = v;
                }
            }
            None => {
                out.columns.push(Column::new(name, kind));
                for (row, v) in out.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        Ok(out)
    }
}

fn infer_kind<'a>(cells: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut non_empty = cells.map(str::trim).filter(|c| !c.is_empty()).peekable();
    if non_empty.peek().is_none() {
        return ColumnKind::Float;
    }
    let values: Vec<&str> = non_empty.collect();
    if values.iter().all(|c| parse_date(c).is_some()) {
        ColumnKind::Date
    } else if values.iter().all(|c| c.parse::<f64>().is_ok()) {
        ColumnKind::Float
    } else {
        ColumnKind::Text
    }
}
