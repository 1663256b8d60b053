//! Forecast weather acquisition: a live Open-Meteo-shaped provider and a
//! deterministic synthetic generator.
//!
//! The live path is strict: the provider must cover the full horizon from the
//! requested start hour or the fetch fails. Synthetic weather is an explicit
//! opt-in, never a fallback for a failed live fetch.

use std::f64::consts::PI;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;

use crate::config::NetworkConfig;

/// One forecast hour of weather, timezone-aware.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherPoint {
    pub hour: DateTime<Tz>,
    pub temperature: f64,
    pub relative_humidity: f64,
    pub precipitation: f64,
    pub wind_speed: f64,
}

/// Hourly forecast response from the provider.
#[derive(Debug, Deserialize)]
pub struct ForecastResponse {
    hourly: Option<HourlyBlock>,
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    relative_humidity_2m: Vec<Option<f64>>,
    #[serde(default)]
    precipitation: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m: Vec<Option<f64>>,
}

/// HTTP client for the live weather provider.
#[derive(Clone, Debug)]
pub struct ForecastApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ForecastApiClient {
    /// Create a new client with configurable timeouts.
    pub fn new(base_url: String, network: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(network.request_timeout_secs))
            .connect_timeout(StdDuration::from_secs(network.connect_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    /// Fetch hourly forecast weather covering `horizon_hours` hours starting
    /// at `start`. The provider is asked for three forecast days; anything
    /// short of the full horizon is an error, not a partial result.
    pub async fn fetch_hourly(
        &self,
        latitude: f64,
        longitude: f64,
        start: DateTime<Tz>,
        horizon_hours: usize,
    ) -> Result<Vec<WeatherPoint>> {
        let tz = start.timezone();
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                (
                    "hourly",
                    "temperature_2m,relative_humidity_2m,precipitation,wind_speed_10m".to_string(),
                ),
                ("forecast_days", "3".to_string()),
                ("timezone", tz.name().to_string()),
            ])
            .send()
            .await
            .context("Failed to send request to weather provider")?;

        let status = response.status();
        if !status.is_success() {
            bail!("weather provider returned error status: {status}");
        }

        let payload = response
            .json::<ForecastResponse>()
            .await
            .context("Failed to parse weather provider response")?;

        points_from_response(payload, start, horizon_hours)
    }
}

/// Validate and shape a provider response into horizon weather points.
///
/// Provider hours are local wall-clock times in the requested timezone.
/// Points that cannot be localized (DST gaps) or carry missing measurements
/// are skipped and count toward the shortfall check.
pub fn points_from_response(
    payload: ForecastResponse,
    start: DateTime<Tz>,
    horizon_hours: usize,
) -> Result<Vec<WeatherPoint>> {
    let hourly = payload
        .hourly
        .context("weather response missing 'hourly'")?;
    if hourly.time.is_empty() {
        bail!("weather response missing hourly.time");
    }

    let tz = start.timezone();
    let mut points = Vec::with_capacity(hourly.time.len());
    for (i, raw) in hourly.time.iter().enumerate() {
        let Some(naive) = parse_provider_hour(raw) else {
            continue;
        };
        let Some(hour) = tz.from_local_datetime(&naive).single() else {
            continue;
        };
        let (Some(temperature), Some(relative_humidity), Some(precipitation), Some(wind_speed)) = (
            value_at(&hourly.temperature_2m, i),
            value_at(&hourly.relative_humidity_2m, i),
            value_at(&hourly.precipitation, i),
            value_at(&hourly.wind_speed_10m, i),
        ) else {
            continue;
        };

        points.push(WeatherPoint {
            hour,
            temperature,
            relative_humidity,
            precipitation,
            wind_speed,
        });
    }

    points.sort_by_key(|p| p.hour);
    points.retain(|p| p.hour >= start);
    points.truncate(horizon_hours);
    if points.len() < horizon_hours {
        bail!(
            "weather provider returned only {} hourly rows from {}, expected {}",
            points.len(),
            start,
            horizon_hours
        );
    }
    Ok(points)
}

fn value_at(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

fn parse_provider_hour(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok())
}

/// Deterministic seasonal-shaped weather: sinusoidal daily temperature,
/// humidity and wind cycles, with a fixed afternoon precipitation window.
pub fn synthetic_weather(start: DateTime<Tz>, horizon_hours: usize) -> Vec<WeatherPoint> {
    (0..horizon_hours)
        .map(|i| {
            let t = i as f64;
            let temperature = 8.0 + 6.0 * (2.0 * PI * (t - 5.0) / 24.0).sin();
            let relative_humidity =
                (65.0 + 20.0 * (2.0 * PI * (t - 2.0) / 24.0).cos()).clamp(20.0, 100.0);
            let wind_speed = (14.0 + 3.0 * (2.0 * PI * (t + 3.0) / 24.0).sin()).max(0.0);
            let hour_of_cycle = i % 24;
            let precipitation = if (14..=17).contains(&hour_of_cycle) {
                0.2
            } else {
                0.0
            };

            WeatherPoint {
                hour: start + Duration::hours(i as i64),
                temperature,
                relative_humidity,
                precipitation,
                wind_speed,
            }
        })
        .collect()
}
