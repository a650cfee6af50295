use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode};
use weather_history_core::provider::{default_provider_from_config, provider_from_config};
use weather_history_core::{
    Config, DateRange, EnrichedDaySummary, LocationSpec, ProviderId, ResolutionError, ServiceError,
    SqliteRepository, WeatherService, WeatherServiceResponse,
};

const KELVIN_OFFSET: f64 = 273.15;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "weather-history",
    version,
    about = "Enriched daily weather history with a local cache"
)]
pub struct Cli {
    /// Raise log verbosity (-v debug, -vv trace). Logs go to stderr.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials for a specific provider.
    Configure {
        /// Provider short name, e.g. "openweather" or "weatherapi".
        provider: String,

        /// Make this provider the default even if another one is set.
        #[arg(long)]
        default: bool,
    },

    /// Show enriched daily summaries for a date range.
    Range(RangeArgs),
}

#[derive(Debug, Args)]
pub struct RangeArgs {
    /// First day, YYYY-MM-DD.
    #[arg(long)]
    pub start: NaiveDate,

    /// Last day (inclusive), YYYY-MM-DD.
    #[arg(long)]
    pub end: NaiveDate,

    #[arg(long, allow_negative_numbers = true, requires = "lon")]
    pub lat: Option<f64>,

    #[arg(long, allow_negative_numbers = true, requires = "lat")]
    pub lon: Option<f64>,

    /// Place name to geocode instead of --lat/--lon.
    #[arg(long, conflicts_with_all = ["lat", "lon"])]
    pub location: Option<String>,

    /// Provider to use instead of the configured default.
    #[arg(long)]
    pub provider: Option<String>,

    /// Print the full response as JSON.
    #[arg(long)]
    pub json: bool,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Configure { provider, default } => configure(&provider, default),
            Command::Range(args) => range(args).await,
        }
    }
}

fn configure(provider: &str, make_default: bool) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    let api_key = Password::new(&format!("API key for {id}:"))
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation()
        .prompt()
        .context("Failed to read API key")?;

    let api_key = api_key.trim();
    if api_key.is_empty() {
        bail!("API key must not be empty");
    }

    config.upsert_provider_api_key(id, api_key.to_string());
    if make_default {
        config.set_default_provider(id);
    }
    config.save()?;

    println!("Saved credentials for {id} to {}", Config::config_file_path()?.display());
    if config.default_provider_id().ok() == Some(id) {
        println!("{id} is the default provider.");
    }

    Ok(())
}

async fn range(args: RangeArgs) -> anyhow::Result<()> {
    let location = LocationSpec::from_parts(args.lat, args.lon, args.location.as_deref())?;
    let range = DateRange::new(args.start, args.end)?;

    let config = Config::load()?;
    let upstream = match args.provider.as_deref() {
        Some(name) => provider_from_config(requested_provider(&config, name)?, &config)?,
        None => default_provider_from_config(&config)?,
    };

    let db_path = config.cache_db_path()?;
    let repository = SqliteRepository::open(&db_path)
        .with_context(|| format!("Failed to open cache database: {}", db_path.display()))?;
    tracing::debug!(provider = %upstream.id, cache = %db_path.display(), "starting range query");

    let service = WeatherService::from_config(&config, upstream, Arc::new(repository));

    let response = match service.get_enriched_range(location, range).await {
        Ok(response) => response,
        Err(ServiceError::Resolution(ResolutionError::Ambiguous { name, candidates })) => {
            eprintln!("'{name}' matches several places:");
            for candidate in &candidates {
                eprintln!("  {:<40} {}", candidate.display_name, candidate.coordinate);
            }
            bail!("Pass --lat/--lon or a more specific --location.");
        }
        Err(err) => return Err(err.into()),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", render_table(&response));
    }

    Ok(())
}

/// Provider named on the command line; it must already have credentials.
fn requested_provider(config: &Config, name: &str) -> anyhow::Result<ProviderId> {
    let id = ProviderId::try_from(name)?;
    if !config.is_provider_configured(id) {
        bail!(
            "Provider '{id}' is not configured.\n\
             Hint: run `weather-history configure {id}` first."
        );
    }
    Ok(id)
}

fn celsius(kelvin: f64) -> f64 {
    kelvin - KELVIN_OFFSET
}

fn flags(day: &EnrichedDaySummary) -> String {
    let mut flags = Vec::new();
    if day.extreme_temperature {
        flags.push("temp");
    }
    if day.extreme_precipitation {
        flags.push("precip");
    }
    if day.extreme_wind {
        flags.push("wind");
    }
    flags.join(",")
}

/// Human-readable rendering; temperatures are shown in °C.
fn render_table(response: &WeatherServiceResponse) -> String {
    let mut out = String::new();

    if let Some(first) = response.geocoding_results.first() {
        out.push_str(&format!(
            "Location: {} ({} candidate(s), best first)\n\n",
            first.display_name,
            response.geocoding_results.len()
        ));
    }

    out.push_str(&format!(
        "{:<10}  {:>7}  {:>7}  {:>6}  {:>7}  {:<8}  {:>5}  {:>7}  {:<6}  {}\n",
        "date",
        "min°C",
        "max°C",
        "range",
        "precip",
        "class",
        "wind",
        "humidex",
        "season",
        "extreme"
    ));

    for day in &response.weather_data {
        let raw = &day.raw;
        let class = format!("{:?}", day.precipitation_intensity);
        let season = format!("{:?}", day.season);
        out.push_str(&format!(
            "{:<10}  {:>7.1}  {:>7.1}  {:>6.1}  {:>7.1}  {:<8}  {:>5.1}  {:>7.1}  {:<6}  {}\n",
            raw.date,
            celsius(raw.temp_min),
            celsius(raw.temp_max),
            day.temp_range,
            raw.precipitation_total,
            class,
            raw.wind_speed_max,
            celsius(day.humidex),
            season,
            flags(day),
        ));
    }

    if !response.errors.is_empty() {
        out.push_str(&format!("\n{} day(s) could not be fetched:\n", response.errors.len()));
        for err in &response.errors {
            out.push_str(&format!("  {}  {:?}: {}\n", err.date, err.kind, err.message));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use weather_history_core::{Coordinate, DayError, FetchError, RawDaySummary, enrich};

    fn sample_day() -> EnrichedDaySummary {
        enrich(&RawDaySummary {
            date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
            coordinate: Coordinate::new(48.85, 2.35).unwrap(),
            timezone: "+02:00".into(),
            temp_min: 290.15,
            temp_max: 310.15,
            temp_afternoon: 308.15,
            temp_night: 292.15,
            temp_evening: 303.15,
            temp_morning: 295.15,
            cloud_cover_afternoon: 5.0,
            humidity_afternoon: 30.0,
            precipitation_total: 0.0,
            pressure_afternoon: 1012.0,
            wind_speed_max: 4.0,
            wind_direction_max: 180.0,
        })
    }

    #[test]
    fn range_accepts_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "weather-history",
            "range",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-03",
            "--lat",
            "-33.87",
            "--lon",
            "151.21",
        ])
        .unwrap();

        let Command::Range(args) = cli.command else {
            panic!("expected range command");
        };
        assert_eq!(args.lat, Some(-33.87));
        assert_eq!(args.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(!args.json);
    }

    #[test]
    fn location_conflicts_with_coordinates() {
        let res = Cli::try_parse_from([
            "weather-history",
            "range",
            "--start",
            "2024-01-01",
            "--end",
            "2024-01-01",
            "--lat",
            "1",
            "--lon",
            "2",
            "--location",
            "Paris",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn bad_date_is_rejected_by_parser() {
        let res = Cli::try_parse_from([
            "weather-history",
            "range",
            "--start",
            "01/01/2024",
            "--end",
            "2024-01-01",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn requested_provider_must_be_configured() {
        let mut config = Config::default();
        config.upsert_provider_api_key(ProviderId::OpenWeather, "KEY".into());

        assert_eq!(
            requested_provider(&config, "openweather").unwrap(),
            ProviderId::OpenWeather
        );

        let err = requested_provider(&config, "weatherapi").unwrap_err();
        assert!(err.to_string().contains("not configured"));
        assert!(err.to_string().contains("weather-history configure weatherapi"));

        assert!(requested_provider(&config, "nope").is_err());
    }

    #[test]
    fn configure_accepts_default_flag() {
        let cli = Cli::try_parse_from(["weather-history", "configure", "weatherapi", "--default"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Command::Configure { ref provider, default: true } if provider == "weatherapi"
        ));
    }

    #[test]
    fn verbose_is_global_and_counted() {
        let cli =
            Cli::try_parse_from(["weather-history", "configure", "openweather", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn table_lists_days_and_errors() {
        let response = WeatherServiceResponse {
            weather_data: vec![sample_day()],
            errors: vec![DayError::new(
                NaiveDate::from_ymd_opt(2024, 7, 2).unwrap(),
                &FetchError::NotFound("no data".into()),
            )],
            geocoding_results: Vec::new(),
        };

        let table = render_table(&response);

        assert!(table.contains("2024-07-01"));
        assert!(table.contains("37.0"));
        assert!(table.contains("Summer"));
        assert!(table.contains("temp"));
        assert!(table.contains("1 day(s) could not be fetched"));
        assert!(table.contains("2024-07-02  NotFound"));
    }
}
