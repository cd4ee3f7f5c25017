//! Wide per-station table: one row per update time, one column per station.

use chrono::DateTime;
use chrono_tz::Tz;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// A single time-indexed row. Stations absent from `values` are unset.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub time: DateTime<Tz>,
    pub values: HashMap<String, u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationTable {
    columns: Vec<String>,
    known: HashSet<String>,
    rows: Vec<TableRow>,
}

impl StationTable {
    /// Creates an empty table with the given column order.
    pub fn with_columns(columns: Vec<String>) -> Self {
        let known = columns.iter().cloned().collect();
        Self {
            columns,
            known,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the value at `row` for `station`, `None` if unset.
    pub fn get(&self, row: usize, station: &str) -> Option<u32> {
        self.rows.get(row)?.values.get(station).copied()
    }

    /// Appends a row. Stations not yet known become new columns, appended
    /// after the existing ones in station order.
    pub fn push_row(&mut self, time: DateTime<Tz>, values: HashMap<String, u32>) {
        let mut added: Vec<String> = values
            .keys()
            .filter(|id| !self.known.contains(id.as_str()))
            .cloned()
            .collect();
        sort_station_ids(&mut added);
        self.add_columns(added);

        self.rows.push(TableRow { time, values });
    }

    /// Appends every row of `other`, widening the schema with any columns
    /// `other` has that this table lacks.
    pub fn append(&mut self, other: StationTable) {
        let added: Vec<String> = other
            .columns
            .into_iter()
            .filter(|id| !self.known.contains(id))
            .collect();
        self.add_columns(added);

        self.rows.extend(other.rows);
    }

    /// Drops every row and restores `schema` as the column list.
    pub fn reset_to(&mut self, schema: &[String]) {
        *self = Self::with_columns(schema.to_vec());
    }

    fn add_columns(&mut self, ids: Vec<String>) {
        for id in ids {
            if self.known.insert(id.clone()) {
                self.columns.push(id);
            }
        }
    }
}

/// Sorts station ids numerically when both parse as integers, falling back
/// to lexical order.
pub fn sort_station_ids(ids: &mut [String]) {
    ids.sort_by(|a, b| compare_station_ids(a, b));
}

fn compare_station_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
