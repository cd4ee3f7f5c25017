//! In-memory accumulation of snapshots and the flush-to-CSV policy.
//!
//! Rows pile up in two wide tables until the collector reports that the
//! configured number of snapshots has been reached, at which point both
//! tables are written under `<result_root>/Available Bikes/` and
//! `<result_root>/Available eBikes/` and reset to the schema captured at
//! construction.
//!
//! Output files are never overwritten: construction fails when numbered files
//! at or above the start index already exist, before any row is collected.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::output::write_table;
use crate::snapshot::Snapshot;
use crate::table::StationTable;

pub const BIKES_DIR: &str = "Available Bikes";
pub const EBIKES_DIR: &str = "Available eBikes";
pub const BIKES_PREFIX: &str = "Available_Bikes_";
pub const EBIKES_PREFIX: &str = "Available_eBikes_";

/// Paths and size of one flushed file pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedFiles {
    pub index: u32,
    pub rows: usize,
    pub bikes: PathBuf,
    pub ebikes: PathBuf,
}

pub struct Accumulator {
    result_root: PathBuf,
    rows_per_file: u32,
    next_index: u32,
    files_written: u32,
    bikes_schema: Vec<String>,
    ebikes_schema: Vec<String>,
    bikes: StationTable,
    ebikes: StationTable,
}

impl Accumulator {
    /// Creates both output directories and captures the column schema of
    /// `schema`. The rows of `schema` are not accumulated.
    ///
    /// Fails if either directory already holds a numbered file at or above
    /// `start_index`.
    pub fn new(
        result_root: impl Into<PathBuf>,
        rows_per_file: u32,
        start_index: u32,
        schema: &Snapshot,
    ) -> Result<Self> {
        let result_root = result_root.into();
        for (dir, prefix) in [(BIKES_DIR, BIKES_PREFIX), (EBIKES_DIR, EBIKES_PREFIX)] {
            let path = result_root.join(dir);
            std::fs::create_dir_all(&path)
                .with_context(|| format!("failed to create '{}'", path.display()))?;

            if let Some(last) = highest_index(&path, prefix)? {
                if last >= start_index {
                    bail!(
                        "'{}' already holds {prefix}{last:03}.csv, use a start index of at least {}",
                        path.display(),
                        last + 1
                    );
                }
            }
        }

        let bikes_schema = schema.bikes.columns().to_vec();
        let ebikes_schema = schema.ebikes.columns().to_vec();

        Ok(Self {
            result_root,
            rows_per_file,
            next_index: start_index,
            files_written: 0,
            bikes: StationTable::with_columns(bikes_schema.clone()),
            ebikes: StationTable::with_columns(ebikes_schema.clone()),
            bikes_schema,
            ebikes_schema,
        })
    }

    /// Rows currently buffered and not yet written.
    pub fn buffered_rows(&self) -> usize {
        self.bikes.len().max(self.ebikes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.bikes.is_empty() && self.ebikes.is_empty()
    }

    pub fn files_written(&self) -> u32 {
        self.files_written
    }

    pub fn bikes(&self) -> &StationTable {
        &self.bikes
    }

    pub fn ebikes(&self) -> &StationTable {
        &self.ebikes
    }

    pub fn accumulate(&mut self, snapshot: Snapshot) {
        self.bikes.append(snapshot.bikes);
        self.ebikes.append(snapshot.ebikes);
    }

    /// Flushes when `count` has reached the rows-per-file threshold.
    pub fn maybe_flush(&mut self, count: u32) -> Result<Option<FlushedFiles>> {
        if count < self.rows_per_file {
            return Ok(None);
        }
        if self.is_empty() {
            warn!(count, "Flush threshold reached with an empty buffer, nothing written");
            return Ok(None);
        }
        self.flush().map(Some)
    }

    /// Writes whatever is buffered, even below the threshold. Used when the
    /// run stops.
    pub fn finish(&mut self) -> Result<Option<FlushedFiles>> {
        if self.is_empty() {
            return Ok(None);
        }
        info!(rows = self.buffered_rows(), "Writing final partial files");
        self.flush().map(Some)
    }

    /// Output paths for file number `index`.
    pub fn file_paths(&self, index: u32) -> (PathBuf, PathBuf) {
        (
            self.result_root
                .join(BIKES_DIR)
                .join(format!("{BIKES_PREFIX}{index:03}.csv")),
            self.result_root
                .join(EBIKES_DIR)
                .join(format!("{EBIKES_PREFIX}{index:03}.csv")),
        )
    }

    #[tracing::instrument(skip(self), fields(index = self.next_index, rows = self.buffered_rows()))]
    fn flush(&mut self) -> Result<FlushedFiles> {
        let index = self.next_index;
        let (bikes_path, ebikes_path) = self.file_paths(index);
        let rows = self.buffered_rows();

        write_table(&bikes_path, &self.bikes)?;
        write_table(&ebikes_path, &self.ebikes)?;

        self.next_index += 1;
        self.files_written += 1;
        self.bikes.reset_to(&self.bikes_schema);
        self.ebikes.reset_to(&self.ebikes_schema);

        info!(
            bikes = %bikes_path.display(),
            ebikes = %ebikes_path.display(),
            "Snapshot files written"
        );

        Ok(FlushedFiles {
            index,
            rows,
            bikes: bikes_path,
            ebikes: ebikes_path,
        })
    }
}

/// Highest `<prefix><NNN>.csv` number in `dir`, if any.
fn highest_index(dir: &Path, prefix: &str) -> Result<Option<u32>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to list '{}'", dir.display()))?;

    let mut highest = None;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list '{}'", dir.display()))?;
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(|n| parse_index(n, prefix)) else {
            continue;
        };
        highest = highest.max(Some(index));
    }
    Ok(highest)
}

fn parse_index(file_name: &str, prefix: &str) -> Option<u32> {
    file_name
        .strip_prefix(prefix)?
        .strip_suffix(".csv")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{StationStatus, local_time};
    use chrono_tz::America::Montreal;
    use std::fs;

    fn snapshot(offset: i64, stations: &[(&str, u32, u32)]) -> Snapshot {
        let at = local_time(1_651_420_800 + offset, Montreal).unwrap();
        Snapshot::from_stations(
            at,
            stations
                .iter()
                .map(|&(id, bikes, ebikes)| StationStatus {
                    station_id: id.to_string(),
                    last_reported: at,
                    bikes,
                    ebikes,
                })
                .collect(),
        )
    }

    fn data_rows(path: &Path) -> usize {
        fs::read_to_string(path).unwrap().lines().count() - 1
    }

    #[test]
    fn test_new_creates_output_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("Sniffer Data");

        Accumulator::new(&root, 4, 1, &snapshot(0, &[("1", 0, 0)])).unwrap();

        assert!(root.join(BIKES_DIR).is_dir());
        assert!(root.join(EBIKES_DIR).is_dir());
    }

    #[test]
    fn test_flush_at_threshold_resets_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let schema = snapshot(0, &[("1", 0, 0), ("2", 0, 0)]);
        let mut acc = Accumulator::new(dir.path(), 4, 1, &schema).unwrap();

        for count in 1..=3 {
            acc.accumulate(snapshot(i64::from(count) * 20, &[("1", count, 0), ("9", 1, 1)]));
            assert_eq!(acc.maybe_flush(count).unwrap(), None);
        }
        acc.accumulate(snapshot(80, &[("1", 4, 0)]));
        let flushed = acc.maybe_flush(4).unwrap().unwrap();

        assert_eq!(flushed.index, 1);
        assert_eq!(flushed.rows, 4);
        assert!(flushed.bikes.ends_with("Available Bikes/Available_Bikes_001.csv"));
        assert!(flushed.ebikes.ends_with("Available eBikes/Available_eBikes_001.csv"));
        assert_eq!(data_rows(&flushed.bikes), 4);
        assert_eq!(data_rows(&flushed.ebikes), 4);

        // the station first seen mid-buffer is a column in the file
        let header = fs::read_to_string(&flushed.bikes).unwrap();
        assert!(header.starts_with("time,1,2,9"));

        // buffer is empty again, with the construction-time schema only
        assert_eq!(acc.buffered_rows(), 0);
        assert_eq!(acc.bikes().columns(), ["1", "2"]);
        assert_eq!(acc.ebikes().columns(), ["1", "2"]);
        assert_eq!(acc.files_written(), 1);
    }

    #[test]
    fn test_file_numbers_increase_from_start_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = Accumulator::new(dir.path(), 1, 7, &snapshot(0, &[("1", 0, 0)])).unwrap();

        let mut indices = Vec::new();
        for i in 0..3 {
            acc.accumulate(snapshot(i * 20, &[("1", 1, 1)]));
            indices.push(acc.maybe_flush(1).unwrap().unwrap().index);
        }

        assert_eq!(indices, [7, 8, 9]);
        assert!(dir.path().join(BIKES_DIR).join("Available_Bikes_009.csv").exists());
        assert!(dir.path().join(EBIKES_DIR).join("Available_eBikes_009.csv").exists());
    }

    #[test]
    fn test_finish_writes_partial_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = Accumulator::new(dir.path(), 4, 1, &snapshot(0, &[("1", 0, 0)])).unwrap();

        acc.accumulate(snapshot(20, &[("1", 2, 1)]));
        acc.accumulate(snapshot(40, &[("1", 3, 1)]));
        let flushed = acc.finish().unwrap().unwrap();

        assert_eq!(flushed.rows, 2);
        assert_eq!(data_rows(&flushed.bikes), 2);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_finish_with_empty_buffer_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = Accumulator::new(dir.path(), 4, 1, &snapshot(0, &[("1", 0, 0)])).unwrap();

        assert_eq!(acc.finish().unwrap(), None);
        assert_eq!(fs::read_dir(dir.path().join(BIKES_DIR)).unwrap().count(), 0);
    }

    #[test]
    fn test_existing_output_files_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(BIKES_DIR)).unwrap();
        fs::write(
            dir.path().join(BIKES_DIR).join("Available_Bikes_001.csv"),
            "time,1\n",
        )
        .unwrap();

        let err = Accumulator::new(dir.path(), 4, 1, &snapshot(0, &[("1", 0, 0)]))
            .err()
            .unwrap();
        assert!(err.to_string().contains("start index of at least 2"));

        // continuing the numbering past the existing file is fine
        let mut acc = Accumulator::new(dir.path(), 1, 2, &snapshot(0, &[("1", 0, 0)])).unwrap();
        acc.accumulate(snapshot(20, &[("1", 1, 1)]));
        assert_eq!(acc.maybe_flush(1).unwrap().unwrap().index, 2);
    }

    #[test]
    fn test_existing_ebike_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(EBIKES_DIR)).unwrap();
        fs::write(
            dir.path().join(EBIKES_DIR).join("Available_eBikes_003.csv"),
            "time,1\n",
        )
        .unwrap();

        assert!(Accumulator::new(dir.path(), 4, 3, &snapshot(0, &[("1", 0, 0)])).is_err());
        // lower numbers from an older run do not block a later start
        assert!(Accumulator::new(dir.path(), 4, 4, &snapshot(0, &[("1", 0, 0)])).is_ok());
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("Available_Bikes_012.csv", BIKES_PREFIX), Some(12));
        assert_eq!(parse_index("Available_Bikes_1000.csv", BIKES_PREFIX), Some(1000));
        assert_eq!(parse_index("Available_eBikes_012.csv", BIKES_PREFIX), None);
        assert_eq!(parse_index("notes.txt", BIKES_PREFIX), None);
    }

    #[test]
    fn test_empty_buffer_at_threshold_keeps_file_number() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = Accumulator::new(dir.path(), 2, 1, &snapshot(0, &[("1", 0, 0)])).unwrap();

        assert_eq!(acc.maybe_flush(2).unwrap(), None);

        acc.accumulate(snapshot(20, &[("1", 1, 0)]));
        let flushed = acc.maybe_flush(2).unwrap().unwrap();
        assert_eq!(flushed.index, 1);
    }
}
