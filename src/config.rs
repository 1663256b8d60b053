use std::path::PathBuf;

use anyhow::Result;
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub network: NetworkConfig,
    pub forecast: ForecastConfig,
    pub baseline: BaselineConfig,
}

/// Default locations of the persisted snapshots and serving artifacts.
#[derive(Debug, Deserialize, Clone)]
pub struct PathsConfig {
    pub trips_hourly: PathBuf,
    pub weather_hourly: PathBuf,
    pub features: PathBuf,
    pub baseline: PathBuf,
    pub baseline_meta: PathBuf,
    pub model: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            trips_hourly: PathBuf::from("data/processed/trips_hourly.csv"),
            weather_hourly: PathBuf::from("data/processed/weather_hourly.csv"),
            features: PathBuf::from("data/processed/features_hourly.csv"),
            baseline: PathBuf::from("data/serving/baseline_week_hour_mean.csv"),
            baseline_meta: PathBuf::from("data/serving/baseline_meta.json"),
            model: PathBuf::from("models/linear_week_hour.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastConfig {
    pub horizon_hours: usize,
    /// IANA timezone name anchoring the forecast horizon, e.g. "America/New_York".
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub weather_url: String,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 48,
            timezone: "America/New_York".to_string(),
            latitude: 40.7128,
            longitude: -74.0060,
            weather_url: "https://api.open-meteo.com/v1/forecast".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BaselineConfig {
    /// Lookback boundary separating training data from the held-out tail.
    pub cutoff_days: i64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self { cutoff_days: 28 }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // Load .env file (silently ignore if not present)
        let _ = dotenvy::dotenv();

        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zonecast");

        let builder = Config::builder()
            // 1. Load default values
            // Paths
            .set_default("paths.trips_hourly", "data/processed/trips_hourly.csv")?
            .set_default("paths.weather_hourly", "data/processed/weather_hourly.csv")?
            .set_default("paths.features", "data/processed/features_hourly.csv")?
            .set_default("paths.baseline", "data/serving/baseline_week_hour_mean.csv")?
            .set_default("paths.baseline_meta", "data/serving/baseline_meta.json")?
            .set_default("paths.model", "models/linear_week_hour.json")?
            // Network
            .set_default("network.request_timeout_secs", 30)?
            .set_default("network.connect_timeout_secs", 10)?
            // Forecast
            .set_default("forecast.horizon_hours", 48)?
            .set_default("forecast.timezone", "America/New_York")?
            .set_default("forecast.latitude", 40.7128)?
            .set_default("forecast.longitude", -74.0060)?
            .set_default("forecast.weather_url", "https://api.open-meteo.com/v1/forecast")?
            // Baseline
            .set_default("baseline.cutoff_days", 28)?
            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))
            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))
            // 4. Load from environment variables (ZONECAST__FORECAST__HORIZON_HOURS=...)
            .add_source(Environment::with_prefix("ZONECAST").separator("__"));

        let s = builder.build()?;
        Ok(s.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== Default Value Tests ====================

    #[test]
    fn test_network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_forecast_config_defaults() {
        let config = ForecastConfig::default();
        assert_eq!(config.horizon_hours, 48);
        assert_eq!(config.timezone, "America/New_York");
        assert!(config.weather_url.starts_with("https://"));
    }

    #[test]
    fn test_baseline_config_defaults() {
        let config = BaselineConfig::default();
        assert_eq!(config.cutoff_days, 28);
    }

    #[test]
    fn test_paths_config_defaults() {
        let config = PathsConfig::default();
        assert_eq!(
            config.features,
            PathBuf::from("data/processed/features_hourly.csv")
        );
        assert_eq!(config.model, PathBuf::from("models/linear_week_hour.json"));
    }

    // ==================== Config Loading Tests ====================

    #[test]
    fn test_config_load_with_defaults() {
        let result = AppConfig::load();
        assert!(result.is_ok());
    }

    #[test]
    fn test_loaded_config_has_expected_structure() {
        let config = AppConfig::load().expect("Config should load");

        assert!(config.network.request_timeout_secs > 0);
        assert!(config.forecast.horizon_hours > 0);
        assert!(!config.forecast.timezone.is_empty());
        assert!(config.baseline.cutoff_days > 0);
        assert!(config.paths.features.to_string_lossy().ends_with(".csv"));
    }

    #[test]
    fn test_default_timezone_parses() {
        let config = ForecastConfig::default();
        let tz: Result<chrono_tz::Tz, _> = config.timezone.parse();
        assert!(tz.is_ok());
    }

    // ==================== Environment Variable Override Tests ====================

    /// Helper to safely set and remove environment variables in tests.
    /// SAFETY: These tests run sequentially and clean up after themselves.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        // SAFETY: Test environment, single-threaded access
        unsafe {
            std::env::set_var(key, value);
        }
        let result = f();
        unsafe {
            std::env::remove_var(key);
        }
        result
    }

    #[test]
    fn test_env_var_overrides_horizon() {
        let config = with_env_var("ZONECAST__FORECAST__HORIZON_HOURS", "24", || {
            AppConfig::load().expect("Config should load")
        });

        assert_eq!(
            config.forecast.horizon_hours, 24,
            "Environment variable should override forecast.horizon_hours"
        );
    }

    #[test]
    fn test_env_var_overrides_timezone() {
        let config = with_env_var("ZONECAST__FORECAST__TIMEZONE", "Europe/Berlin", || {
            AppConfig::load().expect("Config should load")
        });

        assert_eq!(config.forecast.timezone, "Europe/Berlin");
    }

    #[test]
    fn test_env_var_overrides_cutoff_days() {
        let config = with_env_var("ZONECAST__BASELINE__CUTOFF_DAYS", "14", || {
            AppConfig::load().expect("Config should load")
        });

        assert_eq!(config.baseline.cutoff_days, 14);
    }
}
