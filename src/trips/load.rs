use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

use super::types::{StationInfo, TripRecord};

/// Loads every trip from the open-data export at `path`.
pub fn load_trips(path: &Path) -> Result<Vec<TripRecord>> {
    let file = File::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    let trips = read_rows(file).with_context(|| format!("failed to read '{}'", path.display()))?;
    info!(path = %path.display(), trips = trips.len(), "Trips loaded");
    Ok(trips)
}

/// Loads the station list at `path`.
pub fn load_stations(path: &Path) -> Result<Vec<StationInfo>> {
    let file = File::open(path).with_context(|| format!("failed to open '{}'", path.display()))?;
    let stations = read_rows(file).with_context(|| format!("failed to read '{}'", path.display()))?;
    info!(path = %path.display(), stations = stations.len(), "Stations loaded");
    Ok(stations)
}

pub fn read_rows<T: DeserializeOwned, R: Read>(reader: R) -> Result<Vec<T>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();

    for result in rdr.deserialize() {
        let record: T = result?;
        rows.push(record);
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_trips_ignores_extra_columns() {
        let data = "start_date,emplacement_pk_start,end_date,emplacement_pk_end,duration_sec,is_member\n\
                    2021-04-15 08:01:40,10,2021-04-15 08:20:00,12,1100,1\n\
                    2021-04-15 09:02,11,2021-04-15 09:10,10,480,0\n";

        let trips: Vec<TripRecord> = read_rows(data.as_bytes()).unwrap();

        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].emplacement_pk_start, 10);
        assert_eq!(trips[1].start_date.to_string(), "2021-04-15 09:02:00");
    }

    #[test]
    fn test_read_stations() {
        let data = "pk,name,latitude,longitude\n10,Metro Mont-Royal,45.5247,-73.5815\n";

        let stations: Vec<StationInfo> = read_rows(data.as_bytes()).unwrap();

        assert_eq!(stations[0].pk, 10);
        assert_eq!(stations[0].name, "Metro Mont-Royal");
    }

    #[test]
    fn test_bad_trip_time_is_an_error() {
        let data = "start_date,emplacement_pk_start\nyesterday,10\n";
        assert!(read_rows::<TripRecord, _>(data.as_bytes()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_trips(Path::new("/nonexistent/trips.csv")).is_err());
    }
}
