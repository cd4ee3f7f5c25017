//! Station feed client.
//!
//! [`StationFeed`] is what the collector polls; [`GbfsFeed`] reads a GBFS
//! `station_status` document over HTTP (or from a local file) and turns it
//! into a [`Snapshot`].

use async_trait::async_trait;
use chrono_tz::Tz;
use thiserror::Error;
use tracing::debug;

use crate::fetch::{HttpClient, load_source};
use crate::parser::parse_station_status;
use crate::snapshot::Snapshot;

pub const DEFAULT_STATION_STATUS_URL: &str =
    "https://gbfs.velobixi.com/gbfs/fr/station_status.json";

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport failure, HTTP error status, timeout or unreadable file.
    #[error("feed unreachable: {0:#}")]
    Network(anyhow::Error),
    /// The payload arrived but could not be decoded.
    #[error("malformed feed payload: {0:#}")]
    Malformed(anyhow::Error),
}

#[async_trait]
pub trait StationFeed: Send + Sync {
    /// Fetches and parses one snapshot of every active station.
    async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError>;
}

pub struct GbfsFeed<C> {
    client: C,
    source: String,
    timezone: Tz,
}

impl<C: HttpClient> GbfsFeed<C> {
    pub fn new(client: C, source: impl Into<String>, timezone: Tz) -> Self {
        Self {
            client,
            source: source.into(),
            timezone,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[async_trait]
impl<C: HttpClient> StationFeed for GbfsFeed<C> {
    #[tracing::instrument(skip(self), fields(source = %self.source))]
    async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
        let bytes = load_source(&self.client, &self.source)
            .await
            .map_err(FetchError::Network)?;
        let feed = parse_station_status(&bytes).map_err(FetchError::Malformed)?;
        let snapshot = Snapshot::from_feed(&feed, self.timezone).map_err(FetchError::Malformed)?;

        debug!(
            listed = feed.data.stations.len(),
            active = snapshot.station_count(),
            updated_at = %snapshot.updated_at,
            "Snapshot built"
        );
        Ok(snapshot)
    }
}
