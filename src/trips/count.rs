use std::collections::HashMap;

use super::types::{DateRange, StationCount, StationInfo, TripRecord};

/// Keeps the trips that started within `range`.
pub fn filter_by_date<'a>(trips: &'a [TripRecord], range: &DateRange) -> Vec<&'a TripRecord> {
    trips
        .iter()
        .filter(|t| range.contains(&t.start_date))
        .collect()
}

/// Number of trips per origin station.
pub fn count_departures<'a>(trips: impl IntoIterator<Item = &'a TripRecord>) -> HashMap<u32, usize> {
    let mut counts = HashMap::new();
    for trip in trips {
        *counts.entry(trip.emplacement_pk_start).or_default() += 1;
    }
    counts
}

/// Joins departure counts with station metadata, busiest stations first.
///
/// Stations missing from `stations` are dropped. `top` keeps only the first
/// N entries.
pub fn station_counts(
    counts: &HashMap<u32, usize>,
    stations: &[StationInfo],
    top: Option<usize>,
) -> Vec<StationCount> {
    let mut joined: Vec<StationCount> = stations
        .iter()
        .filter_map(|s| {
            let nb_trips = *counts.get(&s.pk)?;
            Some(StationCount {
                pk: s.pk,
                name: s.name.clone(),
                latitude: s.latitude,
                longitude: s.longitude,
                nb_trips,
            })
        })
        .collect();

    joined.sort_by(|a, b| b.nb_trips.cmp(&a.nb_trips).then(a.pk.cmp(&b.pk)));
    if let Some(n) = top {
        joined.truncate(n);
    }
    joined
}
