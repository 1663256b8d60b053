//! Zonecast Library
//!
//! Hourly ride-hailing demand forecasting per taxi zone: incremental hourly
//! aggregation of raw trip and weather records, feature assembly, a seasonal
//! (zone × week-hour) baseline, and forecast generation against a trained
//! regression model with live or synthetic weather.

pub mod aggregate;
pub mod baseline;
pub mod calendar;
pub mod config;
pub mod error;
pub mod features;
pub mod forecast;
pub mod predictor;
pub mod snapshot;
pub mod traits;
pub mod weather;

// Re-export commonly used types
pub use aggregate::{
    CityWeatherRow,
    DropStats,
    RawTripSource,
    StationWeatherRow,
    TimeWindow,
    TripAccumulator,
    TripHourlyRow,
    WeatherAggregate,
    aggregate_trip_events,
    aggregate_weather,
    floor_to_hour,
    parse_event_timestamp,
};
pub use baseline::{BaselineEntry, BaselineMeta, BaselineModel};
pub use calendar::{CalendarFeatures, is_us_federal_holiday};
pub use config::AppConfig;
pub use error::PipelineError;
pub use features::{FeatureRow, build_features};
pub use forecast::{
    ForecastAssembler, ForecastOptions, ForecastPayload, PredictionRow, WeatherSource,
    next_top_of_hour, write_payload,
};
pub use predictor::{FeatureMatrix, FeatureSchema, LinearModel, Predictor, SCHEMA_V1};
pub use traits::{Clock, MockClock, SystemClock};
pub use weather::{ForecastApiClient, WeatherPoint, synthetic_weather};
