//! Data types used by the trip analysis.

use anyhow::{Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// A single row of the trip export. Other columns are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct TripRecord {
    #[serde(deserialize_with = "trip_time")]
    pub start_date: NaiveDateTime,
    pub emplacement_pk_start: u32,
}

/// A row of the station list.
#[derive(Debug, Clone, Deserialize)]
pub struct StationInfo {
    pub pk: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Departures from one station over the selected range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationCount {
    pub pk: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub nb_trips: usize,
}

/// Half-open range `[start, end)` of trip start times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    /// Covers months `from..=to` of `year`, both ends inclusive.
    pub fn months(year: i32, from: u32, to: u32) -> Result<Self> {
        if !(1..=12).contains(&from) || !(1..=12).contains(&to) {
            bail!("months must be within 1..=12, got {from}..={to}");
        }
        if from > to {
            bail!("start month {from} is after end month {to}");
        }

        let start = first_of_month(year, from)?;
        let end = if to == 12 {
            first_of_month(year + 1, 1)?
        } else {
            first_of_month(year, to + 1)?
        };

        Ok(Self {
            start: start.and_time(chrono::NaiveTime::MIN),
            end: end.and_time(chrono::NaiveTime::MIN),
        })
    }

    pub fn contains(&self, t: &NaiveDateTime) -> bool {
        self.start <= *t && *t < self.end
    }
}

fn first_of_month(year: i32, month: u32) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| anyhow!("invalid date {year}-{month}-01"))
}

const TRIP_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

fn trip_time<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(deserializer)?;
    TRIP_TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized trip time '{raw}'")))
}
