//! Pivot of heterogeneous summary records into per-field tables
//!
//! Records carry different fields with values of different shapes. The
//! aggregator takes the union of field names (first-seen order) and builds one
//! table per field:
//!
//! - regular fields get one row per item that has a non-empty value, `(key, v1, v2, ...)`,
//!   with short rows padded so every row has the same width
//! - unmapped-entity fields are flattened into one deduplicated column of values
//!   in encounter order
//!
//! The tables are recomputed from the ledger on every run and never persisted
//! on their own.

use crate::ledger::LedgerEntry;
use crate::types::SummaryValue;
use std::collections::HashSet;

/// How a field's values were arranged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One row per item, led by the item key
    PerItem,
    /// One deduplicated value per row, item structure discarded
    Unmapped,
}

/// Aggregated table for one summary field
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedField {
    /// Summary field name
    pub name: String,
    /// Row layout
    pub kind: FieldKind,
    /// Rows, all of equal width
    pub rows: Vec<Vec<String>>,
}

impl AggregatedField {
    /// Number of columns (zero for an empty table)
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }
}

/// Builds report tables from ledger entries
#[derive(Debug, Clone, Default)]
pub struct SummaryAggregator {
    unmapped_fields: Vec<String>,
}

impl SummaryAggregator {
    /// Aggregator treating `unmapped_fields` as unmapped-entity fields
    pub fn new(unmapped_fields: Vec<String>) -> Self {
        Self { unmapped_fields }
    }

    /// Union of field names over all entries, in first-seen order
    pub fn field_names(entries: &[LedgerEntry]) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for entry in entries {
            for name in entry.record.keys() {
                if seen.insert(name.as_str()) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// One table per field, in [`field_names`](Self::field_names) order
    pub fn aggregate(&self, entries: &[LedgerEntry]) -> Vec<AggregatedField> {
        Self::field_names(entries)
            .into_iter()
            .map(|name| {
                if self.unmapped_fields.iter().any(|f| f == &name) {
                    unmapped_table(name, entries)
                } else {
                    per_item_table(name, entries)
                }
            })
            .collect()
    }
}

fn per_item_table(name: String, entries: &[LedgerEntry]) -> AggregatedField {
    let mut rows: Vec<Vec<String>> = entries
        .iter()
        .filter_map(|entry| {
            let value = entry.record.get(&name).filter(|v| !v.is_empty())?;
            let mut row = Vec::with_capacity(1 + value_len(value));
            row.push(entry.key.clone());
            row.extend(value.cells());
            Some(row)
        })
        .collect();

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut rows {
        row.resize(width, String::new());
    }

    AggregatedField {
        name,
        kind: FieldKind::PerItem,
        rows,
    }
}

fn unmapped_table(name: String, entries: &[LedgerEntry]) -> AggregatedField {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for value in entries.iter().filter_map(|e| e.record.get(&name)) {
        for cell in value.cells() {
            if !cell.is_empty() && seen.insert(cell.clone()) {
                rows.push(vec![cell]);
            }
        }
    }

    AggregatedField {
        name,
        kind: FieldKind::Unmapped,
        rows,
    }
}

fn value_len(value: &SummaryValue) -> usize {
    match value {
        SummaryValue::List(values) => values.len(),
        _ => 1,
    }
}
