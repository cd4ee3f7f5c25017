//! Turns a decoded `station_status` document into a [`Snapshot`]: active
//! stations only, one row per (station, report time), timestamps in the
//! collector's local time zone, pivoted into bike and e-bike tables.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::{HashMap, HashSet};

use crate::parser::StationStatusFeed;
use crate::table::{StationTable, sort_station_ids};

/// One active station's counts at its last report.
#[derive(Debug, Clone, PartialEq)]
pub struct StationStatus {
    pub station_id: String,
    pub last_reported: DateTime<Tz>,
    pub bikes: u32,
    pub ebikes: u32,
}

/// Result of one fetch: the feed update time and both pivoted tables.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub updated_at: DateTime<Tz>,
    pub bikes: StationTable,
    pub ebikes: StationTable,
}

impl Snapshot {
    pub fn from_feed(feed: &StationStatusFeed, tz: Tz) -> Result<Self> {
        let updated_at = local_time(feed.last_updated, tz)?;
        let stations = active_stations(feed, tz)?;
        Ok(Self::from_stations(updated_at, stations))
    }

    /// Pivots station rows into one-row tables indexed by `updated_at`.
    ///
    /// A station listed more than once keeps its most recent report.
    pub fn from_stations(updated_at: DateTime<Tz>, stations: Vec<StationStatus>) -> Self {
        let mut latest: HashMap<String, StationStatus> = HashMap::new();
        for status in stations {
            let newer = latest
                .get(&status.station_id)
                .map_or(true, |kept| status.last_reported > kept.last_reported);
            if newer {
                latest.insert(status.station_id.clone(), status);
            }
        }

        let mut columns: Vec<String> = latest.keys().cloned().collect();
        sort_station_ids(&mut columns);

        let mut bikes = StationTable::with_columns(columns.clone());
        let mut ebikes = StationTable::with_columns(columns);

        if !latest.is_empty() {
            bikes.push_row(
                updated_at,
                latest
                    .iter()
                    .map(|(id, s)| (id.clone(), s.bikes))
                    .collect(),
            );
            ebikes.push_row(
                updated_at,
                latest
                    .iter()
                    .map(|(id, s)| (id.clone(), s.ebikes))
                    .collect(),
            );
        }

        Self {
            updated_at,
            bikes,
            ebikes,
        }
    }

    pub fn station_count(&self) -> usize {
        self.bikes.columns().len()
    }

    pub fn total_bikes(&self) -> u64 {
        total(&self.bikes)
    }

    pub fn total_ebikes(&self) -> u64 {
        total(&self.ebikes)
    }
}

fn total(table: &StationTable) -> u64 {
    table
        .rows()
        .iter()
        .flat_map(|row| row.values.values())
        .map(|&v| u64::from(v))
        .sum()
}

/// Filters the feed to renting-and-returning stations and drops duplicate
/// (station, report time) pairs, keeping the first occurrence.
pub fn active_stations(feed: &StationStatusFeed, tz: Tz) -> Result<Vec<StationStatus>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for record in &feed.data.stations {
        if !record.is_active() {
            continue;
        }
        if !seen.insert((record.station_id.as_str(), record.last_reported)) {
            continue;
        }

        out.push(StationStatus {
            station_id: record.station_id.clone(),
            last_reported: local_time(record.last_reported, tz)?,
            bikes: record.num_bikes_available,
            ebikes: record.num_ebikes_available,
        });
    }

    Ok(out)
}

/// Converts UTC epoch seconds into `tz`.
pub fn local_time(epoch_secs: i64, tz: Tz) -> Result<DateTime<Tz>> {
    let utc = DateTime::<Utc>::from_timestamp(epoch_secs, 0)
        .ok_or_else(|| anyhow!("epoch timestamp {epoch_secs} is out of range"))?;
    Ok(utc.with_timezone(&tz))
}
