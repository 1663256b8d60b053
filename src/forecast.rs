//! Forecast assembly: horizon resolution, weather acquisition, the dense
//! zone×hour inference grid, predictor invocation, and payload serialization.
//!
//! Each run is self-contained: it reads immutable inputs, builds the full
//! payload in memory, and only then writes it out. A failed live fetch
//! aborts the run; it never degrades to synthetic weather.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::baseline::BaselineModel;
use crate::calendar::CalendarFeatures;
use crate::error::PipelineError;
use crate::predictor::{FeatureMatrix, Predictor, SCHEMA_V1};
use crate::traits::Clock;
use crate::weather::{ForecastApiClient, WeatherPoint, synthetic_weather};

/// Where forecast weather comes from. Synthetic is an explicit request,
/// never a fallback for a failed live fetch.
pub enum WeatherSource<'a> {
    Live(&'a ForecastApiClient),
    Synthetic,
}

impl WeatherSource<'_> {
    fn label(&self) -> &'static str {
        match self {
            WeatherSource::Live(_) => "live",
            WeatherSource::Synthetic => "synthetic",
        }
    }
}

/// Per-run forecast parameters.
#[derive(Debug, Clone)]
pub struct ForecastOptions {
    pub horizon_hours: usize,
    pub timezone: Tz,
    pub latitude: f64,
    pub longitude: f64,
    /// Recorded in the payload as the model identifier.
    pub model_path: PathBuf,
}

/// One forecast row of the output payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    /// ISO-8601 timestamp with UTC offset.
    pub hour: String,
    pub zone_id: i64,
    pub prediction: u64,
}

/// The complete forecast document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastPayload {
    pub generated_at: DateTime<Utc>,
    pub timezone: String,
    pub horizon_hours: usize,
    pub zone_count: usize,
    pub prediction_count: usize,
    pub model_path: String,
    pub weather_source: String,
    pub predictions: Vec<PredictionRow>,
}

/// The first forecast hour: "now" truncated to the hour, plus one, so every
/// forecast hour is strictly in the future.
pub fn next_top_of_hour(now: DateTime<Tz>) -> DateTime<Tz> {
    let truncated = now
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    truncated + Duration::hours(1)
}

/// Assembles one forecast run from a predictor, a fitted baseline, and a
/// clock. No state persists across runs.
pub struct ForecastAssembler<'a> {
    predictor: &'a dyn Predictor,
    baseline: &'a BaselineModel,
    clock: &'a dyn Clock,
}

impl<'a> ForecastAssembler<'a> {
    pub fn new(
        predictor: &'a dyn Predictor,
        baseline: &'a BaselineModel,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            predictor,
            baseline,
            clock,
        }
    }

    /// Produce the forecast payload for the given zone universe.
    ///
    /// Guarantees `zone_count * horizon_hours` predictions or a typed
    /// failure; never a partial result.
    pub async fn run(
        &self,
        zone_universe: &[i64],
        opts: &ForecastOptions,
        source: WeatherSource<'_>,
    ) -> Result<ForecastPayload, PipelineError> {
        if zone_universe.is_empty() {
            return Err(PipelineError::NoZones);
        }

        let now = self.clock.now_utc().with_timezone(&opts.timezone);
        let start = next_top_of_hour(now);
        let weather_source = source.label();

        let weather = match source {
            WeatherSource::Synthetic => synthetic_weather(start, opts.horizon_hours),
            WeatherSource::Live(client) => client
                .fetch_hourly(opts.latitude, opts.longitude, start, opts.horizon_hours)
                .await
                .map_err(PipelineError::ForecastFailed)?,
        };
        info!(
            start = %start,
            horizon_hours = opts.horizon_hours,
            weather_source,
            "acquired forecast weather"
        );

        let (keys, matrix) = self.build_inference_grid(zone_universe, &weather);
        let raw = self
            .predictor
            .predict(&matrix)
            .map_err(PipelineError::ForecastFailed)?;
        if raw.len() != keys.len() {
            return Err(PipelineError::ForecastFailed(anyhow!(
                "predictor returned {} values for {} grid rows",
                raw.len(),
                keys.len()
            )));
        }

        let predictions: Vec<PredictionRow> = keys
            .into_iter()
            .zip(raw)
            .map(|((zone_id, hour), y_log)| PredictionRow {
                hour: hour.to_rfc3339(),
                zone_id,
                prediction: inverse_transform(y_log),
            })
            .collect();

        Ok(ForecastPayload {
            generated_at: self.clock.now_utc(),
            timezone: opts.timezone.name().to_string(),
            horizon_hours: opts.horizon_hours,
            zone_count: zone_universe.len(),
            prediction_count: predictions.len(),
            model_path: opts.model_path.to_string_lossy().into_owned(),
            weather_source: weather_source.to_string(),
            predictions,
        })
    }

    /// Materialize the dense zone×hour grid, zone-major, with weather and
    /// baseline attached, in serving schema column order.
    fn build_inference_grid(
        &self,
        zone_universe: &[i64],
        weather: &[WeatherPoint],
    ) -> (Vec<(i64, DateTime<Tz>)>, FeatureMatrix) {
        let count = zone_universe.len() * weather.len();
        let mut keys = Vec::with_capacity(count);
        let mut matrix = FeatureMatrix::with_capacity(&SCHEMA_V1, count);

        for &zone_id in zone_universe {
            for point in weather {
                let cal = CalendarFeatures::for_hour(&point.hour);
                let baseline = self.baseline.value(zone_id, cal.week_hour);
                let is_rain = point.precipitation > 0.0;

                matrix.push_row(&[
                    zone_id as f64,
                    f64::from(cal.week_hour),
                    f64::from(cal.month),
                    f64::from(cal.day_of_year),
                    f64::from(cal.week_of_year),
                    baseline,
                    point.temperature,
                    point.wind_speed,
                    point.relative_humidity,
                    point.precipitation,
                    f64::from(u8::from(is_rain)),
                    f64::from(u8::from(cal.is_weekend)),
                    f64::from(u8::from(cal.is_holiday)),
                ]);
                keys.push((zone_id, point.hour));
            }
        }
        (keys, matrix)
    }
}

/// Invert the log1p training transform and force a valid count.
fn inverse_transform(y_log: f64) -> u64 {
    y_log.exp_m1().max(0.0).round() as u64
}

/// Write the payload to its final path after full in-memory construction.
/// Nothing is created on serialization failure.
pub fn write_payload(path: &Path, payload: &ForecastPayload) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let body =
        serde_json::to_string_pretty(payload).map_err(|e| PipelineError::snapshot(path, e))?;
    fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    use crate::aggregate::TripHourlyRow;
    use crate::traits::MockClock;

    use super::*;

    /// Predictor returning a fixed value for every grid row.
    struct ConstantPredictor(f64);

    impl Predictor for ConstantPredictor {
        fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
            Ok(vec![self.0; features.n_rows()])
        }
    }

    struct FailingPredictor;

    impl Predictor for FailingPredictor {
        fn predict(&self, _features: &FeatureMatrix) -> Result<Vec<f64>> {
            Err(anyhow!("model artifact corrupted"))
        }
    }

    fn fitted_baseline() -> BaselineModel {
        let base = chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        let mut rows = Vec::new();
        for day in 0..42 {
            for h in 0..24 {
                let hour = (base + Duration::days(day)).and_hms_opt(h, 0, 0).unwrap();
                rows.push(TripHourlyRow {
                    hour,
                    zone_id: 1,
                    trip_count: 10,
                });
                rows.push(TripHourlyRow {
                    hour,
                    zone_id: 2,
                    trip_count: 20,
                });
            }
        }
        BaselineModel::fit(&rows, 28).unwrap()
    }

    fn options() -> ForecastOptions {
        ForecastOptions {
            horizon_hours: 48,
            timezone: New_York,
            latitude: 40.7128,
            longitude: -74.0060,
            model_path: PathBuf::from("models/linear_week_hour.json"),
        }
    }

    fn clock() -> MockClock {
        // 18:35:11 UTC is 13:35:11 in New York (EST)
        MockClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 18, 35, 11).unwrap())
    }

    // ==================== Horizon Resolution Tests ====================

    #[test]
    fn test_next_top_of_hour_truncates_then_advances() {
        let now = New_York.with_ymd_and_hms(2026, 3, 2, 13, 35, 11).unwrap();
        let start = next_top_of_hour(now);
        assert_eq!(
            start,
            New_York.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_top_of_hour_from_exact_hour() {
        let now = New_York.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap();
        let start = next_top_of_hour(now);
        assert_eq!(
            start,
            New_York.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
        );
    }

    // ==================== Forecast Run Tests ====================

    #[tokio::test]
    async fn test_synthetic_run_is_complete() {
        let baseline = fitted_baseline();
        let predictor = ConstantPredictor(1.0);
        let clock = clock();
        let assembler = ForecastAssembler::new(&predictor, &baseline, &clock);

        let payload = assembler
            .run(&baseline.zone_ids, &options(), WeatherSource::Synthetic)
            .await
            .unwrap();

        assert_eq!(payload.zone_count, 2);
        assert_eq!(payload.horizon_hours, 48);
        assert_eq!(payload.prediction_count, 96);
        assert_eq!(payload.predictions.len(), 96);
        assert_eq!(payload.weather_source, "synthetic");
        assert_eq!(payload.timezone, "America/New_York");
    }

    #[tokio::test]
    async fn test_hours_are_consecutive_and_strictly_future() {
        let baseline = fitted_baseline();
        let predictor = ConstantPredictor(1.0);
        let clock = clock();
        let assembler = ForecastAssembler::new(&predictor, &baseline, &clock);

        let payload = assembler
            .run(&baseline.zone_ids, &options(), WeatherSource::Synthetic)
            .await
            .unwrap();

        let truncated_now = New_York.with_ymd_and_hms(2026, 3, 2, 13, 0, 0).unwrap();
        for zone_id in [1, 2] {
            let hours: Vec<DateTime<Tz>> = payload
                .predictions
                .iter()
                .filter(|p| p.zone_id == zone_id)
                .map(|p| {
                    DateTime::parse_from_rfc3339(&p.hour)
                        .unwrap()
                        .with_timezone(&New_York)
                })
                .collect();

            assert_eq!(hours.len(), 48);
            assert!(hours.iter().all(|h| *h > truncated_now));
            for pair in hours.windows(2) {
                assert_eq!(pair[1] - pair[0], Duration::hours(1));
            }
        }
    }

    #[tokio::test]
    async fn test_negative_model_output_clamps_to_zero() {
        let baseline = fitted_baseline();
        let predictor = ConstantPredictor(-5.0);
        let clock = clock();
        let assembler = ForecastAssembler::new(&predictor, &baseline, &clock);

        let payload = assembler
            .run(&baseline.zone_ids, &options(), WeatherSource::Synthetic)
            .await
            .unwrap();

        assert!(payload.predictions.iter().all(|p| p.prediction == 0));
    }

    #[tokio::test]
    async fn test_predictions_are_inverse_transformed() {
        let baseline = fitted_baseline();
        // exp(ln(3)) - 1 = 2
        let predictor = ConstantPredictor(3.0_f64.ln());
        let clock = clock();
        let assembler = ForecastAssembler::new(&predictor, &baseline, &clock);

        let payload = assembler
            .run(&baseline.zone_ids, &options(), WeatherSource::Synthetic)
            .await
            .unwrap();

        assert!(payload.predictions.iter().all(|p| p.prediction == 2));
    }

    #[tokio::test]
    async fn test_empty_zone_universe_is_config_error() {
        let baseline = fitted_baseline();
        let predictor = ConstantPredictor(1.0);
        let clock = clock();
        let assembler = ForecastAssembler::new(&predictor, &baseline, &clock);

        let result = assembler.run(&[], &options(), WeatherSource::Synthetic).await;
        assert!(matches!(result, Err(PipelineError::NoZones)));
    }

    #[tokio::test]
    async fn test_predictor_failure_wrapped_as_forecast_error() {
        let baseline = fitted_baseline();
        let predictor = FailingPredictor;
        let clock = clock();
        let assembler = ForecastAssembler::new(&predictor, &baseline, &clock);

        let result = assembler
            .run(&baseline.zone_ids, &options(), WeatherSource::Synthetic)
            .await;
        assert!(matches!(result, Err(PipelineError::ForecastFailed(_))));
    }

    // ==================== Transform Tests ====================

    #[test]
    fn test_inverse_transform_rounds_to_nearest() {
        // exp(ln(2.4)) - 1 = 1.4 rounds to 1
        assert_eq!(inverse_transform(2.4_f64.ln()), 1);
        // exp(ln(2.6)) - 1 = 1.6 rounds to 2
        assert_eq!(inverse_transform(2.6_f64.ln()), 2);
    }

    #[test]
    fn test_inverse_transform_never_negative() {
        assert_eq!(inverse_transform(-100.0), 0);
        assert_eq!(inverse_transform(0.0), 0);
    }

    // ==================== Payload Writing Tests ====================

    #[test]
    fn test_write_payload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forecasts").join("latest.json");

        let payload = ForecastPayload {
            generated_at: Utc.with_ymd_and_hms(2026, 3, 2, 18, 35, 11).unwrap(),
            timezone: "America/New_York".to_string(),
            horizon_hours: 2,
            zone_count: 1,
            prediction_count: 2,
            model_path: "models/linear.json".to_string(),
            weather_source: "synthetic".to_string(),
            predictions: vec![
                PredictionRow {
                    hour: "2026-03-02T14:00:00-05:00".to_string(),
                    zone_id: 1,
                    prediction: 12,
                },
                PredictionRow {
                    hour: "2026-03-02T15:00:00-05:00".to_string(),
                    zone_id: 1,
                    prediction: 9,
                },
            ],
        };
        write_payload(&path, &payload).unwrap();

        let loaded: ForecastPayload =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.prediction_count, 2);
        assert_eq!(loaded.predictions, payload.predictions);
    }
}
