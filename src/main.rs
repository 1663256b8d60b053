use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, NaiveDateTime};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use zonecast::{
    AppConfig, BaselineModel, CityWeatherRow, ForecastApiClient, ForecastAssembler,
    ForecastOptions, LinearModel, PipelineError, RawTripSource, SCHEMA_V1, SystemClock,
    TimeWindow, TripHourlyRow, WeatherSource, aggregate, features, forecast,
    parse_event_timestamp, snapshot,
};

#[derive(Parser, Debug)]
#[command(name = "zonecast")]
#[command(about = "Hourly ride-hailing demand forecasting pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate raw trip events into hourly counts by pickup zone
    AggregateTrips {
        /// Raw trip CSV file(s) or directories of CSV files
        #[arg(long, required = true, num_args = 1..)]
        inputs: Vec<PathBuf>,
        /// Pickup datetime column name
        #[arg(long, default_value = "pickup_datetime")]
        pickup_col: String,
        /// Pickup zone column name
        #[arg(long, default_value = "zone_id")]
        zone_col: String,
        /// Output snapshot path (default: paths.trips_hourly)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Keep events at or after this date/timestamp
        #[arg(long)]
        start: Option<String>,
        /// Keep events before this date/timestamp
        #[arg(long)]
        end: Option<String>,
        /// If the output exists, append and re-aggregate to sum counts
        #[arg(long)]
        append: bool,
    },
    /// Aggregate raw weather observations to hourly per-station and citywide bins
    AggregateWeather {
        /// Input raw weather CSV
        #[arg(long)]
        infile: PathBuf,
        /// Output citywide snapshot path (default: paths.weather_hourly);
        /// the per-station snapshot lands next to it with a _by_station suffix
        #[arg(long)]
        outfile: Option<PathBuf>,
        /// Rejected: hourly means cannot be re-aggregated incrementally
        #[arg(long)]
        append: bool,
    },
    /// Join trip and weather snapshots into the hourly feature table
    BuildFeatures {
        /// Trip hourly snapshot file(s) or directories
        #[arg(long, required = true, num_args = 1..)]
        trips: Vec<PathBuf>,
        /// Citywide weather hourly snapshot file(s) or directories
        #[arg(long, required = true, num_args = 1..)]
        weather: Vec<PathBuf>,
        /// Output feature table path (default: paths.features)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Forward-fill missing weather hours within each zone after merging
        #[arg(long)]
        ffill_weather: bool,
    },
    /// Build the baseline serving artifacts from the feature table
    BuildBaseline {
        #[arg(long)]
        features_path: Option<PathBuf>,
        #[arg(long)]
        baseline_out: Option<PathBuf>,
        #[arg(long)]
        meta_out: Option<PathBuf>,
    },
    /// Generate the zone forecast payload
    Forecast {
        /// Output JSON path
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        model_path: Option<PathBuf>,
        #[arg(long)]
        features_path: Option<PathBuf>,
        #[arg(long)]
        horizon_hours: Option<usize>,
        /// IANA timezone name, e.g. America/New_York
        #[arg(long)]
        timezone: Option<String>,
        #[arg(long)]
        latitude: Option<f64>,
        #[arg(long)]
        longitude: Option<f64>,
        /// Use synthetic weather and skip the live fetch
        #[arg(long)]
        dummy_weather: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
        .parse_lossy("zonecast=debug");
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;

    match cli.command {
        Command::AggregateTrips {
            inputs,
            pickup_col,
            zone_col,
            out,
            start,
            end,
            append,
        } => run_aggregate_trips(&config, inputs, pickup_col, zone_col, out, start, end, append),
        Command::AggregateWeather {
            infile,
            outfile,
            append,
        } => run_aggregate_weather(&config, infile, outfile, append),
        Command::BuildFeatures {
            trips,
            weather,
            out,
            ffill_weather,
        } => run_build_features(&config, trips, weather, out, ffill_weather),
        Command::BuildBaseline {
            features_path,
            baseline_out,
            meta_out,
        } => run_build_baseline(&config, features_path, baseline_out, meta_out),
        Command::Forecast {
            out,
            model_path,
            features_path,
            horizon_hours,
            timezone,
            latitude,
            longitude,
            dummy_weather,
        } => {
            let rt = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
            rt.block_on(run_forecast(
                &config,
                out,
                model_path,
                features_path,
                horizon_hours,
                timezone,
                latitude,
                longitude,
                dummy_weather,
            ))
        }
    }
}

/// Parse a window bound as either a date (midnight) or a full timestamp.
fn parse_window_bound(raw: &str) -> Result<NaiveDateTime> {
    if let Some(ts) = parse_event_timestamp(raw) {
        return Ok(ts);
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
        .with_context(|| format!("invalid date '{raw}'"))
}

#[allow(clippy::too_many_arguments)]
fn run_aggregate_trips(
    config: &AppConfig,
    inputs: Vec<PathBuf>,
    pickup_col: String,
    zone_col: String,
    out: Option<PathBuf>,
    start: Option<String>,
    end: Option<String>,
    append: bool,
) -> Result<()> {
    let out = out.unwrap_or_else(|| config.paths.trips_hourly.clone());
    let paths = snapshot::expand_inputs(&inputs)?;
    if paths.is_empty() {
        bail!("no input CSV files found");
    }

    let source = RawTripSource {
        pickup_col,
        zone_col,
    };
    let window = TimeWindow {
        start: start.as_deref().map(parse_window_bound).transpose()?,
        end: end.as_deref().map(parse_window_bound).transpose()?,
    };

    let (mut acc, stats) = aggregate::aggregate_trip_events(&paths, &source, &window)?;
    if acc.is_empty() {
        return Err(PipelineError::EmptyAggregation.into());
    }

    if append && out.exists() {
        let existing: Vec<TripHourlyRow> = snapshot::read_rows(&out)?;
        info!(rows = existing.len(), "re-aggregating with existing snapshot");
        acc.merge_rows(existing);
    }

    let rows = acc.into_rows();
    info!(
        rows = rows.len(),
        read = stats.read,
        dropped = stats.dropped,
        hour_min = %rows[0].hour,
        hour_max = %rows[rows.len() - 1].hour,
        "aggregated trip events"
    );

    snapshot::write_rows(&out, &rows)?;
    info!(path = %out.display(), "saved trip snapshot");
    Ok(())
}

fn run_aggregate_weather(
    config: &AppConfig,
    infile: PathBuf,
    outfile: Option<PathBuf>,
    append: bool,
) -> Result<()> {
    if append {
        // Hourly means must be recomputed from raw observations
        return Err(PipelineError::AppendNotSupported.into());
    }

    let out = outfile.unwrap_or_else(|| config.paths.weather_hourly.clone());
    let agg = aggregate::aggregate_weather(&infile)?;

    let by_station_path = sibling_with_suffix(&out, "_by_station");
    snapshot::write_rows(&by_station_path, &agg.by_station)?;
    snapshot::write_rows(&out, &agg.citywide)?;

    info!(
        by_station = %by_station_path.display(),
        station_rows = agg.by_station.len(),
        citywide = %out.display(),
        citywide_rows = agg.citywide.len(),
        dropped = agg.stats.dropped,
        "saved weather snapshots"
    );
    Ok(())
}

/// `weather_hourly.csv` -> `weather_hourly_by_station.csv`.
fn sibling_with_suffix(path: &std::path::Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = if ext.is_empty() {
        format!("{stem}{suffix}")
    } else {
        format!("{stem}{suffix}.{ext}")
    };
    path.with_file_name(name)
}

fn run_build_features(
    config: &AppConfig,
    trips: Vec<PathBuf>,
    weather: Vec<PathBuf>,
    out: Option<PathBuf>,
    ffill_weather: bool,
) -> Result<()> {
    let out = out.unwrap_or_else(|| config.paths.features.clone());

    let mut trip_rows: Vec<TripHourlyRow> = Vec::new();
    for path in snapshot::expand_inputs(&trips)? {
        trip_rows.extend(snapshot::read_rows::<TripHourlyRow>(&path)?);
    }
    let mut weather_rows: Vec<CityWeatherRow> = Vec::new();
    for path in snapshot::expand_inputs(&weather)? {
        weather_rows.extend(snapshot::read_rows::<CityWeatherRow>(&path)?);
    }

    let rows = features::build_features(trip_rows, weather_rows, ffill_weather);
    snapshot::write_rows(&out, &rows)?;
    info!(path = %out.display(), rows = rows.len(), "saved feature table");
    Ok(())
}

fn run_build_baseline(
    config: &AppConfig,
    features_path: Option<PathBuf>,
    baseline_out: Option<PathBuf>,
    meta_out: Option<PathBuf>,
) -> Result<()> {
    let features_path = features_path.unwrap_or_else(|| config.paths.features.clone());
    let baseline_out = baseline_out.unwrap_or_else(|| config.paths.baseline.clone());
    let meta_out = meta_out.unwrap_or_else(|| config.paths.baseline_meta.clone());

    // The feature table is read as its (hour, zone, count) projection
    let series: Vec<TripHourlyRow> = snapshot::read_rows(&features_path)?;
    let model = BaselineModel::fit(&series, config.baseline.cutoff_days)?;
    model.save(&baseline_out, &meta_out)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_forecast(
    config: &AppConfig,
    out: PathBuf,
    model_path: Option<PathBuf>,
    features_path: Option<PathBuf>,
    horizon_hours: Option<usize>,
    timezone: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    dummy_weather: bool,
) -> Result<()> {
    let model_path = model_path.unwrap_or_else(|| config.paths.model.clone());
    let features_path = features_path.unwrap_or_else(|| config.paths.features.clone());
    let tz_name = timezone.unwrap_or_else(|| config.forecast.timezone.clone());
    let timezone: Tz = tz_name
        .parse()
        .map_err(|e| anyhow!("invalid timezone '{tz_name}': {e}"))?;

    let model = LinearModel::load(&model_path, &SCHEMA_V1)?;
    let series: Vec<TripHourlyRow> = snapshot::read_rows(&features_path)?;
    let baseline = BaselineModel::fit(&series, config.baseline.cutoff_days)?;

    let opts = ForecastOptions {
        horizon_hours: horizon_hours.unwrap_or(config.forecast.horizon_hours),
        timezone,
        latitude: latitude.unwrap_or(config.forecast.latitude),
        longitude: longitude.unwrap_or(config.forecast.longitude),
        model_path,
    };

    let clock = SystemClock;
    let assembler = ForecastAssembler::new(&model, &baseline, &clock);

    let client;
    let source = if dummy_weather {
        WeatherSource::Synthetic
    } else {
        client = ForecastApiClient::new(config.forecast.weather_url.clone(), &config.network)?;
        WeatherSource::Live(&client)
    };

    let payload = assembler.run(&baseline.zone_ids, &opts, source).await?;
    forecast::write_payload(&out, &payload)?;

    info!(
        path = %out.display(),
        zones = payload.zone_count,
        rows = payload.prediction_count,
        weather_source = %payload.weather_source,
        "saved forecast payload"
    );
    Ok(())
}
