//! CSV and JSON persistence.
//!
//! Station tables are written as wide CSVs with a leading `time` index
//! column; flat records (trip counts) go through serde.

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::Path;
use tracing::debug;

use crate::table::StationTable;

/// Format of the `time` index column, e.g. `2022-05-01 12:00:00-04:00`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Writes `table` to a new CSV file at `path`.
///
/// Refuses to overwrite an existing file: output files are never modified
/// once created.
pub fn write_table(path: &Path, table: &StationTable) -> Result<()> {
    debug!(path = %path.display(), rows = table.len(), columns = table.columns().len(), "Writing station table");

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("failed to create '{}'", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);

    let mut header = Vec::with_capacity(table.columns().len() + 1);
    header.push("time");
    header.extend(table.columns().iter().map(String::as_str));
    writer.write_record(&header)?;

    for row in table.rows() {
        let mut record = Vec::with_capacity(header.len());
        record.push(row.time.format(TIME_FORMAT).to_string());
        for station in table.columns() {
            record.push(
                row.values
                    .get(station)
                    .map_or(String::new(), |v| v.to_string()),
            );
        }
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes serializable records as CSV rows, with a header derived from `T`.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    debug!(path = %path.display(), rows = records.len(), "Writing CSV records");

    let file =
        File::create(path).with_context(|| format!("failed to create '{}'", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);

    for record in records {
        writer.serialize(record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Writes `value` as pretty-printed JSON.
pub fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let body = serde_json::to_string_pretty(value)?;
    std::fs::write(path, body).with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(())
}
