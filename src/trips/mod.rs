//! Historical trip analysis.
//!
//! Loads the yearly open-data trip export and the station list, restricts
//! trips to a date range and counts departures per origin station, joined
//! with the station's name and coordinates.

pub mod count;
pub mod load;
pub mod types;

pub use count::{count_departures, filter_by_date, station_counts};
pub use load::{load_stations, load_trips};
pub use types::{DateRange, StationCount, StationInfo, TripRecord};
