//! Hourly aggregation of raw event-level records.
//!
//! Trip events reduce to (hour, zone) counts with an additive accumulator,
//! so aggregating in one pass or in incremental batches yields the same
//! snapshot. Weather observations reduce to (station, hour) records with
//! per-field mean/sum policies, plus a citywide per-hour view; those means
//! are not additive, so weather snapshots never support incremental append.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;

/// One aggregated (hour, zone) trip count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripHourlyRow {
    pub hour: NaiveDateTime,
    pub zone_id: i64,
    pub trip_count: u64,
}

/// One aggregated (station, hour) weather record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationWeatherRow {
    pub station_id: String,
    pub hour: NaiveDateTime,
    pub temperature: Option<f64>,
    pub dew_point: Option<f64>,
    pub station_pressure: Option<f64>,
    pub sea_level_pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub relative_humidity: Option<f64>,
    /// Sum of precipitation over the hour.
    pub precipitation: f64,
    pub is_rain: u8,
}

/// Citywide per-hour weather view: measurements averaged across stations,
/// `is_rain` as the max across stations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityWeatherRow {
    pub hour: NaiveDateTime,
    pub temperature: Option<f64>,
    pub dew_point: Option<f64>,
    pub station_pressure: Option<f64>,
    pub sea_level_pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub precipitation: f64,
    pub is_rain: u8,
}

/// Column names locating the timestamp and group key in raw trip files.
#[derive(Debug, Clone)]
pub struct RawTripSource {
    pub pickup_col: String,
    pub zone_col: String,
}

impl Default for RawTripSource {
    fn default() -> Self {
        Self {
            pickup_col: "pickup_datetime".to_string(),
            zone_col: "zone_id".to_string(),
        }
    }
}

/// Inclusive-lower, exclusive-upper time filter on raw event timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeWindow {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

impl TimeWindow {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        self.start.is_none_or(|s| t >= s) && self.end.is_none_or(|e| t < e)
    }
}

/// Counts of raw rows seen and dropped during aggregation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropStats {
    pub read: u64,
    pub dropped: u64,
}

/// Running trip-count state keyed by (hour, zone).
///
/// Merging two accumulators is key-wise addition, so any partition of the
/// raw events into batches aggregates to the same result as a single pass.
#[derive(Debug, Default)]
pub struct TripAccumulator {
    counts: BTreeMap<(NaiveDateTime, i64), u64>,
}

impl TripAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one trip event, binned to its hour.
    pub fn add_event(&mut self, pickup: NaiveDateTime, zone_id: i64) {
        *self.counts.entry((floor_to_hour(pickup), zone_id)).or_insert(0) += 1;
    }

    /// Key-wise sum with another accumulator.
    pub fn merge(&mut self, other: TripAccumulator) {
        for (key, count) in other.counts {
            *self.counts.entry(key).or_insert(0) += count;
        }
    }

    /// Key-wise sum with an already-aggregated snapshot (incremental append).
    pub fn merge_rows(&mut self, rows: Vec<TripHourlyRow>) {
        for row in rows {
            *self.counts.entry((row.hour, row.zone_id)).or_insert(0) += row.trip_count;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Drain into rows sorted by (hour, zone_id).
    pub fn into_rows(self) -> Vec<TripHourlyRow> {
        self.counts
            .into_iter()
            .map(|((hour, zone_id), trip_count)| TripHourlyRow {
                hour,
                zone_id,
                trip_count,
            })
            .collect()
    }
}

/// Truncate a timestamp to its hour boundary.
pub fn floor_to_hour(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

const EVENT_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a raw event timestamp, accepting space- or T-separated forms with
/// optional fractional seconds.
pub fn parse_event_timestamp(raw: &str) -> Option<NaiveDateTime> {
    EVENT_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw.trim(), fmt).ok())
}

/// Aggregate raw trip event files into hourly zone counts.
///
/// Rows with unparseable or missing timestamp/zone values are dropped and
/// counted, not failed. The result is empty-checked by the caller once any
/// incremental merge has been applied.
pub fn aggregate_trip_events(
    paths: &[PathBuf],
    source: &RawTripSource,
    window: &TimeWindow,
) -> Result<(TripAccumulator, DropStats), PipelineError> {
    let mut acc = TripAccumulator::new();
    let mut stats = DropStats::default();

    for path in paths {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.clone()));
        }
        debug!(path = %path.display(), "reading trip events");

        let mut reader =
            csv::Reader::from_path(path).map_err(|e| PipelineError::snapshot(path, e))?;
        let headers = reader
            .headers()
            .map_err(|e| PipelineError::snapshot(path, e))?
            .clone();
        let pickup_idx = column_index(&headers, &source.pickup_col)
            .ok_or_else(|| PipelineError::snapshot(path, missing_column(&source.pickup_col)))?;
        let zone_idx = column_index(&headers, &source.zone_col)
            .ok_or_else(|| PipelineError::snapshot(path, missing_column(&source.zone_col)))?;

        for record in reader.records() {
            let record = record.map_err(|e| PipelineError::snapshot(path, e))?;
            stats.read += 1;

            let pickup = record.get(pickup_idx).and_then(parse_event_timestamp);
            let zone_id = record
                .get(zone_idx)
                .and_then(|v| v.trim().parse::<i64>().ok());
            let (Some(pickup), Some(zone_id)) = (pickup, zone_id) else {
                stats.dropped += 1;
                continue;
            };
            if !window.contains(pickup) {
                continue;
            }
            acc.add_event(pickup, zone_id);
        }
    }

    if stats.dropped > 0 {
        warn!(
            dropped = stats.dropped,
            read = stats.read,
            "dropped trip events with unparseable timestamp or zone"
        );
    }
    Ok((acc, stats))
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h == name)
}

fn missing_column(name: &str) -> String {
    format!("column '{name}' not found in header")
}

/// A raw weather observation as it appears in the source file. Measurement
/// columns are optional; rows missing the timestamp or station are dropped.
#[derive(Debug, Deserialize)]
struct RawWeatherObservation {
    datetime: String,
    station_id: String,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default, rename = "dew_point_temperature")]
    dew_point: Option<f64>,
    #[serde(default, rename = "station_level_pressure")]
    station_pressure: Option<f64>,
    #[serde(default)]
    sea_level_pressure: Option<f64>,
    #[serde(default)]
    wind_speed: Option<f64>,
    #[serde(default)]
    wind_gust: Option<f64>,
    #[serde(default)]
    relative_humidity: Option<f64>,
    #[serde(default)]
    precipitation: Option<f64>,
}

/// Mean accumulator over the values actually observed.
#[derive(Debug, Default, Clone, Copy)]
struct MeanAcc {
    sum: f64,
    count: u64,
}

impl MeanAcc {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

#[derive(Debug, Default)]
struct WeatherHourAcc {
    temperature: MeanAcc,
    dew_point: MeanAcc,
    station_pressure: MeanAcc,
    sea_level_pressure: MeanAcc,
    wind_speed: MeanAcc,
    wind_gust: MeanAcc,
    relative_humidity: MeanAcc,
    precipitation: f64,
}

/// Result of one weather aggregation run.
#[derive(Debug)]
pub struct WeatherAggregate {
    pub by_station: Vec<StationWeatherRow>,
    pub citywide: Vec<CityWeatherRow>,
    pub stats: DropStats,
}

/// Aggregate raw weather observations into hourly per-station records and a
/// citywide per-hour view.
///
/// Continuous measurements use the mean over the hour, precipitation the sum;
/// the citywide view averages station records per hour with `is_rain` as the
/// max. Means are recomputed from raw observations on every run.
pub fn aggregate_weather(path: &Path) -> Result<WeatherAggregate, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }

    let mut reader = csv::Reader::from_path(path).map_err(|e| PipelineError::snapshot(path, e))?;
    let mut stats = DropStats::default();
    let mut hours: BTreeMap<(String, NaiveDateTime), WeatherHourAcc> = BTreeMap::new();

    for result in reader.deserialize::<RawWeatherObservation>() {
        stats.read += 1;
        let Ok(obs) = result else {
            stats.dropped += 1;
            continue;
        };
        let Some(ts) = parse_event_timestamp(&obs.datetime) else {
            stats.dropped += 1;
            continue;
        };
        if obs.station_id.trim().is_empty() {
            stats.dropped += 1;
            continue;
        }

        let acc = hours
            .entry((obs.station_id.trim().to_string(), floor_to_hour(ts)))
            .or_default();
        acc.temperature.push(obs.temperature);
        acc.dew_point.push(obs.dew_point);
        acc.station_pressure.push(obs.station_pressure);
        acc.sea_level_pressure.push(obs.sea_level_pressure);
        acc.wind_speed.push(obs.wind_speed);
        acc.wind_gust.push(obs.wind_gust);
        acc.relative_humidity.push(obs.relative_humidity);
        acc.precipitation += obs.precipitation.unwrap_or(0.0);
    }

    if stats.dropped > 0 {
        warn!(
            dropped = stats.dropped,
            read = stats.read,
            "dropped weather observations with unparseable timestamp or station"
        );
    }

    let by_station: Vec<StationWeatherRow> = hours
        .into_iter()
        .map(|((station_id, hour), acc)| StationWeatherRow {
            station_id,
            hour,
            temperature: acc.temperature.mean(),
            dew_point: acc.dew_point.mean(),
            station_pressure: acc.station_pressure.mean(),
            sea_level_pressure: acc.sea_level_pressure.mean(),
            wind_speed: acc.wind_speed.mean(),
            wind_gust: acc.wind_gust.mean(),
            relative_humidity: acc.relative_humidity.mean(),
            precipitation: acc.precipitation,
            is_rain: u8::from(acc.precipitation > 0.0),
        })
        .collect();

    if by_station.is_empty() {
        return Err(PipelineError::EmptyAggregation);
    }

    let citywide = citywide_from_stations(&by_station);
    Ok(WeatherAggregate {
        by_station,
        citywide,
        stats,
    })
}

/// Collapse per-station hourly records into one citywide record per hour.
fn citywide_from_stations(by_station: &[StationWeatherRow]) -> Vec<CityWeatherRow> {
    #[derive(Default)]
    struct CityAcc {
        temperature: MeanAcc,
        dew_point: MeanAcc,
        station_pressure: MeanAcc,
        sea_level_pressure: MeanAcc,
        wind_speed: MeanAcc,
        wind_gust: MeanAcc,
        relative_humidity: MeanAcc,
        precipitation: MeanAcc,
        is_rain: u8,
    }

    let mut hours: BTreeMap<NaiveDateTime, CityAcc> = BTreeMap::new();
    for row in by_station {
        let acc = hours.entry(row.hour).or_default();
        acc.temperature.push(row.temperature);
        acc.dew_point.push(row.dew_point);
        acc.station_pressure.push(row.station_pressure);
        acc.sea_level_pressure.push(row.sea_level_pressure);
        acc.wind_speed.push(row.wind_speed);
        acc.wind_gust.push(row.wind_gust);
        acc.relative_humidity.push(row.relative_humidity);
        acc.precipitation.push(Some(row.precipitation));
        acc.is_rain = acc.is_rain.max(row.is_rain);
    }

    hours
        .into_iter()
        .map(|(hour, acc)| CityWeatherRow {
            hour,
            temperature: acc.temperature.mean(),
            dew_point: acc.dew_point.mean(),
            station_pressure: acc.station_pressure.mean(),
            sea_level_pressure: acc.sea_level_pressure.mean(),
            wind_speed: acc.wind_speed.mean(),
            wind_gust: acc.wind_gust.mean(),
            relative_humidity: acc.relative_humidity.mean(),
            precipitation: acc.precipitation.mean().unwrap_or(0.0),
            is_rain: acc.is_rain,
        })
        .collect()
}
