//! Feature assembly: trip counts joined with citywide weather and calendar
//! signals.
//!
//! The join is a left join on `hour`, so every trip row survives with null
//! weather when no observation matches. Forward fill, when requested, carries
//! the last known weather forward within a single zone's hour-ordered series,
//! never backward and never across zones.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::aggregate::{CityWeatherRow, TripHourlyRow};
use crate::calendar::CalendarFeatures;

/// One hourly training example: trip count, weather, and calendar fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub hour: NaiveDateTime,
    pub zone_id: i64,
    pub trip_count: u64,
    pub temperature: Option<f64>,
    pub dew_point: Option<f64>,
    pub station_pressure: Option<f64>,
    pub sea_level_pressure: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_gust: Option<f64>,
    pub relative_humidity: Option<f64>,
    pub precipitation: Option<f64>,
    pub is_rain: Option<u8>,
    pub hour_of_day: u32,
    pub day_of_week: u32,
    pub month: u32,
    pub day_of_year: u32,
    pub week_of_year: u32,
    pub week_hour: u32,
    pub is_weekend: u8,
    pub is_holiday: u8,
}

/// Join trip counts with citywide weather and derive calendar features.
///
/// The output has exactly one row per input trip row, sorted by
/// (zone_id, hour). Weather rows are keyed by hour before the join, so a
/// duplicated weather hour can never fan rows out.
pub fn build_features(
    mut trips: Vec<TripHourlyRow>,
    weather: Vec<CityWeatherRow>,
    ffill: bool,
) -> Vec<FeatureRow> {
    let weather_by_hour: BTreeMap<NaiveDateTime, CityWeatherRow> =
        weather.into_iter().map(|row| (row.hour, row)).collect();

    trips.sort_by_key(|r| (r.zone_id, r.hour));

    let mut rows = Vec::with_capacity(trips.len());
    let mut carried: Option<CityWeatherRow> = None;
    let mut current_zone: Option<i64> = None;

    for trip in trips {
        if current_zone != Some(trip.zone_id) {
            current_zone = Some(trip.zone_id);
            carried = None;
        }

        let matched = weather_by_hour.get(&trip.hour);
        if ffill {
            if let Some(w) = matched {
                carried = Some(w.clone());
            }
        }
        let weather = match matched {
            Some(w) => Some(w),
            None if ffill => carried.as_ref(),
            None => None,
        };

        rows.push(feature_row(trip, weather));
    }
    rows
}

fn feature_row(trip: TripHourlyRow, weather: Option<&CityWeatherRow>) -> FeatureRow {
    let cal = CalendarFeatures::for_hour(&trip.hour);
    FeatureRow {
        hour: trip.hour,
        zone_id: trip.zone_id,
        trip_count: trip.trip_count,
        temperature: weather.and_then(|w| w.temperature),
        dew_point: weather.and_then(|w| w.dew_point),
        station_pressure: weather.and_then(|w| w.station_pressure),
        sea_level_pressure: weather.and_then(|w| w.sea_level_pressure),
        wind_speed: weather.and_then(|w| w.wind_speed),
        wind_gust: weather.and_then(|w| w.wind_gust),
        relative_humidity: weather.and_then(|w| w.relative_humidity),
        precipitation: weather.map(|w| w.precipitation),
        is_rain: weather.map(|w| w.is_rain),
        hour_of_day: cal.hour_of_day,
        day_of_week: cal.day_of_week,
        month: cal.month,
        day_of_year: cal.day_of_year,
        week_of_year: cal.week_of_year,
        week_hour: cal.week_hour,
        is_weekend: u8::from(cal.is_weekend),
        is_holiday: u8::from(cal.is_holiday),
    }
}
