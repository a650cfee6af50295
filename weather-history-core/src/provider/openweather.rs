use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;

use crate::{
    error::FetchError,
    model::{Coordinate, GeocodingResult, RawDaySummary},
    provider::{Geocoder, http_client, parse_json, rank_confidence, send_for_body},
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org";
const DEFAULT_GEOCODING_LIMIT: u32 = 5;

/// OpenWeatherMap One Call 3.0 daily aggregation plus the direct geocoding API.
///
/// Requests `units=standard`, so temperatures arrive in Kelvin.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    base_url: String,
    geocoding_limit: u32,
    http: Client,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            geocoding_limit: DEFAULT_GEOCODING_LIMIT,
            http: http_client()?,
        })
    }

    pub fn with_geocoding_limit(mut self, limit: u32) -> Self {
        self.geocoding_limit = limit.max(1);
        self
    }
}

#[derive(Debug, Deserialize)]
struct OwAfternoon {
    afternoon: f64,
}

#[derive(Debug, Deserialize)]
struct OwPrecipitation {
    total: f64,
}

#[derive(Debug, Deserialize)]
struct OwTemperature {
    min: f64,
    max: f64,
    afternoon: f64,
    night: f64,
    evening: f64,
    morning: f64,
}

#[derive(Debug, Deserialize)]
struct OwWindMax {
    speed: f64,
    direction: f64,
}

#[derive(Debug, Deserialize)]
struct OwWind {
    max: OwWindMax,
}

#[derive(Debug, Deserialize)]
struct OwDaySummary {
    tz: String,
    date: NaiveDate,
    cloud_cover: OwAfternoon,
    humidity: OwAfternoon,
    precipitation: OwPrecipitation,
    temperature: OwTemperature,
    pressure: OwAfternoon,
    wind: OwWind,
}

#[derive(Debug, Deserialize)]
struct OwGeocodingEntry {
    name: String,
    lat: f64,
    lon: f64,
    country: Option<String>,
    state: Option<String>,
}

impl OwDaySummary {
    fn into_raw(self, coordinate: Coordinate) -> RawDaySummary {
        RawDaySummary {
            date: self.date,
            coordinate,
            timezone: self.tz,
            temp_min: self.temperature.min,
            temp_max: self.temperature.max,
            temp_afternoon: self.temperature.afternoon,
            temp_night: self.temperature.night,
            temp_evening: self.temperature.evening,
            temp_morning: self.temperature.morning,
            cloud_cover_afternoon: self.cloud_cover.afternoon,
            humidity_afternoon: self.humidity.afternoon,
            precipitation_total: self.precipitation.total,
            pressure_afternoon: self.pressure.afternoon,
            wind_speed_max: self.wind.max.speed,
            wind_direction_max: self.wind.max.direction,
        }
    }
}

#[async_trait]
impl WeatherProvider for OpenWeatherProvider {
    async fn day_summary(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
    ) -> Result<RawDaySummary, FetchError> {
        let url = format!("{}/data/3.0/onecall/day_summary", self.base_url);

        let request = self.http.get(&url).query(&[
            ("lat", coordinate.latitude.to_string()),
            ("lon", coordinate.longitude.to_string()),
            ("date", date.format("%Y-%m-%d").to_string()),
            ("appid", self.api_key.clone()),
            ("units", "standard".to_string()),
        ]);

        let body = send_for_body(request, "OpenWeather day summary request").await?;
        let parsed: OwDaySummary = parse_json(&body, "OpenWeather day summary")?;

        if parsed.date != date {
            return Err(FetchError::InvalidResponse(format!(
                "OpenWeather returned summary for {} instead of {date}",
                parsed.date
            )));
        }

        Ok(parsed.into_raw(coordinate))
    }
}

#[async_trait]
impl Geocoder for OpenWeatherProvider {
    async fn resolve(&self, name: &str) -> Result<Vec<GeocodingResult>, FetchError> {
        let url = format!("{}/geo/1.0/direct", self.base_url);

        let request = self.http.get(&url).query(&[
            ("q", name.to_string()),
            ("limit", self.geocoding_limit.to_string()),
            ("appid", self.api_key.clone()),
        ]);

        let body = send_for_body(request, "OpenWeather geocoding request").await?;
        let entries: Vec<OwGeocodingEntry> = parse_json(&body, "OpenWeather geocoding")?;

        let total = entries.len();
        entries
            .into_iter()
            .enumerate()
            .map(|(rank, entry)| -> Result<GeocodingResult, FetchError> {
                let coordinate = Coordinate::new(entry.lat, entry.lon)
                    .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

                let display_name = [Some(entry.name), entry.state.clone(), entry.country.clone()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(", ");

                Ok(GeocodingResult {
                    coordinate,
                    display_name,
                    confidence: rank_confidence(rank, total),
                    country: entry.country,
                    state: entry.state,
                })
            })
            .collect()
    }
}
