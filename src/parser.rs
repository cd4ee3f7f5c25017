//! JSON parser for GBFS `station_status` documents.
//!
//! Only the fields the collector uses are decoded. GBFS v1 feeds encode the
//! renting/returning flags as `0`/`1` and some publish numeric station ids,
//! so both encodings are accepted.

use anyhow::Result;
use serde::{Deserialize, Deserializer};

/// Top-level `station_status.json` document.
#[derive(Debug, Clone, Deserialize)]
pub struct StationStatusFeed {
    /// Feed-level update time, UTC epoch seconds.
    pub last_updated: i64,
    pub data: StationStatusData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationStatusData {
    pub stations: Vec<StationRecord>,
}

/// One station entry as published by the feed.
#[derive(Debug, Clone, Deserialize)]
pub struct StationRecord {
    #[serde(deserialize_with = "station_id")]
    pub station_id: String,
    /// Station report time, UTC epoch seconds.
    pub last_reported: i64,
    #[serde(deserialize_with = "flag")]
    pub is_renting: bool,
    #[serde(deserialize_with = "flag")]
    pub is_returning: bool,
    pub num_bikes_available: u32,
    #[serde(default)]
    pub num_ebikes_available: u32,
}

impl StationRecord {
    pub fn is_active(&self) -> bool {
        self.is_renting && self.is_returning
    }
}

/// Decodes a `station_status` document from raw bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not JSON or lack a required field.
pub fn parse_station_status(bytes: &[u8]) -> Result<StationStatusFeed> {
    Ok(serde_json::from_slice(bytes)?)
}

fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

fn station_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Int(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Str(s) => s,
        Id::Int(i) => i.to_string(),
    })
}
