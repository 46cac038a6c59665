//! Purpose: In-memory relation built from the server's columnar responses.
//! Exports: `TabularResult`, `RowRef`, `Lookup`.
//! Role: Filtering, projection, joins, and CSV/JSON output for query results.
//! Invariants: Headers are discovered at parse time; a row may lack any column.
//! Invariants: `order_by` affects serialization order only, never membership.
//! Invariants: Every derived table is an independent copy.
//! Invariants: CSV writes a missing cell as an empty field, so a CSV round-trip
//! turns missing cells into empty strings. JSON output omits them instead.
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::core::csv::{parse_records, write_record};
use crate::core::error::{Error, ErrorKind};
use crate::core::glob::glob_match;

/// Result of a column lookup. Collapses to `One` when the table holds a single row.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Lookup {
    One(String),
    Many(Vec<String>),
}

impl Lookup {
    pub fn as_one(&self) -> Option<&str> {
        match self {
            Lookup::One(value) => Some(value),
            Lookup::Many(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<String> {
        match self {
            Lookup::One(value) => vec![value],
            Lookup::Many(values) => values,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TabularResult {
    headers: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    order_by: Vec<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct RowRef<'a> {
    headers: &'a [String],
    cells: &'a [Option<String>],
}

impl<'a> RowRef<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let idx = self.headers.iter().position(|header| header == column)?;
        self.cells.get(idx).and_then(|cell| cell.as_deref())
    }

    /// Present `(column, value)` pairs in header order.
    pub fn cells(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let headers = self.headers;
        self.cells
            .iter()
            .enumerate()
            .filter_map(move |(idx, cell)| Some((headers[idx].as_str(), cell.as_deref()?)))
    }
}

impl TabularResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(column, value)` records; headers follow first appearance.
    pub fn from_records<R, K, V>(records: impl IntoIterator<Item = R>) -> Self
    where
        R: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut table = Self::new();
        for record in records {
            let mut cells = vec![None; table.headers.len()];
            for (column, value) in record {
                let idx = table.column_index_or_insert(column.into(), &mut cells);
                cells[idx] = Some(value.into());
            }
            table.rows.push(cells);
        }
        table.pad_rows();
        table
    }

    pub fn from_csv(input: &str) -> Result<Self, Error> {
        let mut records = parse_records(input)?.into_iter();
        let Some(header_record) = records.next() else {
            return Ok(Self::new());
        };
        let mut table = Self::new();
        let mut scratch = Vec::new();
        let positions: Vec<usize> = header_record
            .into_iter()
            .map(|header| table.column_index_or_insert(header, &mut scratch))
            .collect();
        for record in records {
            let mut cells = vec![None; table.headers.len()];
            for (value, idx) in record.into_iter().zip(positions.iter()) {
                cells[*idx] = Some(value);
            }
            table.rows.push(cells);
        }
        Ok(table)
    }

    /// Parses a JSON array of flat objects. Nulls are treated as missing cells.
    pub fn from_json(input: &str) -> Result<Self, Error> {
        let objects: Vec<serde_json::Map<String, Value>> =
            serde_json::from_str(input).map_err(|err| {
                Error::new(ErrorKind::Corrupt)
                    .with_message("invalid table json")
                    .with_source(err)
            })?;
        Ok(Self::from_records(objects.into_iter().map(|object| {
            object
                .into_iter()
                .filter_map(|(column, value)| match value {
                    Value::Null => None,
                    Value::String(text) => Some((column, text)),
                    other => Some((column, other.to_string())),
                })
                .collect::<Vec<_>>()
        })))
    }

    pub fn with_order<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.order_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn order_by(&self) -> &[String] {
        &self.order_by
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(|cells| RowRef {
            headers: &self.headers,
            cells,
        })
    }

    pub fn row(&self, idx: usize) -> Option<Self> {
        let cells = self.rows.get(idx)?.clone();
        Some(self.derive(vec![cells]))
    }

    pub fn slice(&self, range: Range<usize>) -> Self {
        let end = range.end.min(self.rows.len());
        let start = range.start.min(end);
        self.derive(self.rows[start..end].to_vec())
    }

    /// Values of `column` whose text matches the glob `pattern`, in row order.
    pub fn get_all(&self, column: &str, pattern: &str) -> Vec<String> {
        let Some(idx) = self.column_index(column) else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter_map(|cells| cells[idx].as_ref())
            .filter(|value| pattern == "*" || glob_match(pattern, value))
            .cloned()
            .collect()
    }

    pub fn get(&self, column: &str, pattern: &str) -> Lookup {
        let mut values = self.get_all(column, pattern);
        if self.rows.len() == 1 && values.len() == 1 {
            return Lookup::One(values.remove(0));
        }
        Lookup::Many(values)
    }

    /// Rows where every token names a present column or equals a cell value,
    /// and every `(column, value)` pair matches exactly.
    pub fn filter(&self, tokens: &[&str], equals: &[(&str, &str)]) -> Self {
        let rows = self
            .iter()
            .zip(self.rows.iter())
            .filter(|(row, _)| {
                tokens
                    .iter()
                    .all(|token| row.cells().any(|(column, value)| column == *token || value == *token))
                    && equals
                        .iter()
                        .all(|(column, expected)| row.get(column) == Some(*expected))
            })
            .map(|(_, cells)| cells.clone())
            .collect();
        self.derive(rows)
    }

    pub fn select(&self, columns: &[&str]) -> Self {
        let keep: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, header)| columns.contains(&header.as_str()))
            .map(|(idx, _)| idx)
            .collect();
        Self {
            headers: keep.iter().map(|idx| self.headers[*idx].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|cells| keep.iter().map(|idx| cells[*idx].clone()).collect())
                .collect(),
            order_by: self.order_by.clone(),
        }
    }

    /// Merges `others` into this table by `key`. For each key of this table,
    /// later tables overwrite same-named columns; keys missing from a later
    /// table are left untouched. Only the first row per key participates.
    pub fn join(&self, key: &str, others: &[&TabularResult]) -> Self {
        let mut merged = Self {
            headers: self.headers.clone(),
            rows: Vec::new(),
            order_by: self.order_by.clone(),
        };
        let Some(key_idx) = self.column_index(key) else {
            return merged;
        };

        let mut seen = HashMap::new();
        for cells in &self.rows {
            if let Some(id) = &cells[key_idx] {
                if !seen.contains_key(id) {
                    seen.insert(id.clone(), merged.rows.len());
                    merged.rows.push(cells.clone());
                }
            }
        }

        for other in others {
            let Some(other_key) = other.column_index(key) else {
                continue;
            };
            let mut indexed = HashMap::new();
            for cells in &other.rows {
                if let Some(id) = &cells[other_key] {
                    indexed.entry(id.as_str()).or_insert(cells);
                }
            }
            let mapping: Vec<usize> = other
                .headers
                .iter()
                .map(|header| merged.column_index_or_insert(header.clone(), &mut Vec::new()))
                .collect();
            merged.pad_rows();
            for (id, row_idx) in &seen {
                let Some(source) = indexed.get(id.as_str()) else {
                    continue;
                };
                for (src_idx, cell) in source.iter().enumerate() {
                    if let Some(value) = cell {
                        merged.rows[*row_idx][mapping[src_idx]] = Some(value.clone());
                    }
                }
            }
        }
        merged
    }

    /// Header row followed by data rows, `order_by` columns first.
    pub fn as_list(&self) -> Vec<Vec<String>> {
        let order = self.serialization_order();
        let mut table = Vec::with_capacity(self.rows.len() + 1);
        table.push(order.iter().map(|idx| self.headers[*idx].clone()).collect());
        for cells in &self.rows {
            table.push(
                order
                    .iter()
                    .map(|idx| cells[*idx].clone().unwrap_or_default())
                    .collect(),
            );
        }
        table
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        if self.headers.is_empty() {
            return out;
        }
        for record in self.as_list() {
            write_record(&mut out, record.iter().map(String::as_str));
        }
        out
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode table json")
                .with_source(err)
        })
    }

    pub fn write_csv(&self, dest: impl AsRef<Path>) -> Result<(), Error> {
        write_file(dest.as_ref(), self.to_csv().as_bytes())
    }

    pub fn write_json(&self, dest: impl AsRef<Path>) -> Result<(), Error> {
        write_file(dest.as_ref(), self.to_json()?.as_bytes())
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|header| header == column)
    }

    fn column_index_or_insert(&mut self, column: String, cells: &mut Vec<Option<String>>) -> usize {
        if let Some(idx) = self.column_index(&column) {
            return idx;
        }
        self.headers.push(column);
        cells.push(None);
        self.headers.len() - 1
    }

    fn pad_rows(&mut self) {
        let width = self.headers.len();
        for cells in &mut self.rows {
            cells.resize(width, None);
        }
    }

    fn derive(&self, rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            headers: self.headers.clone(),
            rows,
            order_by: self.order_by.clone(),
        }
    }

    fn serialization_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = self
            .order_by
            .iter()
            .filter_map(|column| self.column_index(column))
            .collect();
        for idx in 0..self.headers.len() {
            if !order.contains(&idx) {
                order.push(idx);
            }
        }
        order
    }
}

struct OrderedRow<'a> {
    headers: &'a [String],
    order: &'a [usize],
    cells: &'a [Option<String>],
}

impl Serialize for OrderedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for idx in self.order {
            if let Some(value) = &self.cells[*idx] {
                map.serialize_entry(&self.headers[*idx], value)?;
            }
        }
        map.end()
    }
}

impl Serialize for TabularResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let order = self.serialization_order();
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for cells in &self.rows {
            seq.serialize_element(&OrderedRow {
                headers: &self.headers,
                order: &order,
                cells,
            })?;
        }
        seq.end()
    }
}

impl fmt::Display for TabularResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_csv())
    }
}

fn write_file(dest: &Path, bytes: &[u8]) -> Result<(), Error> {
    std::fs::write(dest, bytes).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write table")
            .with_path(dest)
            .with_source(err)
    })
}
