use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{
    error::FetchError,
    model::{Coordinate, GeocodingResult, RawDaySummary},
    provider::{Geocoder, classify_status, http_client, parse_json, rank_confidence},
};

use super::WeatherProvider;

const DEFAULT_BASE_URL: &str = "https://api.weatherapi.com";
const KELVIN_OFFSET: f64 = 273.15;

/// WeatherAPI error code for "No matching location found".
const NO_LOCATION_FOUND: u32 = 1006;

const MORNING_HOUR: u32 = 6;
const AFTERNOON_HOUR: u32 = 12;
const EVENING_HOUR: u32 = 18;
const NIGHT_HOUR: u32 = 0;

/// WeatherAPI.com `history.json` and `search.json`.
///
/// The history endpoint reports an hourly series in Celsius; period values
/// are sampled at fixed local hours and converted to Kelvin.
#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    base_url: String,
    http: Client,
}

impl WeatherApiProvider {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            http: http_client()?,
        })
    }

    async fn get(&self, endpoint: &str, query: &[(&str, String)]) -> Result<String, FetchError> {
        let url = format!("{}/v1/{endpoint}", self.base_url);

        let res = self
            .http
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        if status.is_success() {
            return Ok(body);
        }

        // WeatherAPI answers 400 for unknown locations; the error code tells them apart.
        if status == StatusCode::BAD_REQUEST {
            if let Ok(err) = serde_json::from_str::<WaErrorResponse>(&body) {
                if err.error.code == NO_LOCATION_FOUND {
                    return Err(FetchError::NotFound(err.error.message));
                }
            }
        }

        Err(classify_status(
            status,
            &format!("WeatherAPI {endpoint} request"),
            &body,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct WaError {
    code: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WaErrorResponse {
    error: WaError,
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    localtime_epoch: i64,
    localtime: String,
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    totalprecip_mm: f64,
}

#[derive(Debug, Deserialize)]
struct WaHour {
    time: String,
    temp_c: f64,
    humidity: f64,
    cloud: f64,
    pressure_mb: f64,
    wind_kph: f64,
    wind_degree: f64,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: NaiveDate,
    day: WaDay,
    hour: Vec<WaHour>,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaHistoryResponse {
    location: WaLocation,
    forecast: WaForecast,
}

#[derive(Debug, Deserialize)]
struct WaSearchEntry {
    name: String,
    region: Option<String>,
    country: Option<String>,
    lat: f64,
    lon: f64,
}

fn hour_of(entry: &WaHour) -> Option<u32> {
    NaiveDateTime::parse_from_str(&entry.time, "%Y-%m-%d %H:%M")
        .ok()
        .map(|t| t.hour())
}

/// UTC offset of the location as `+HH:MM`, derived from its local clock.
fn utc_offset(location: &WaLocation) -> Result<String, FetchError> {
    let local = NaiveDateTime::parse_from_str(&location.localtime, "%Y-%m-%d %H:%M").map_err(|e| {
        FetchError::InvalidResponse(format!("bad localtime '{}': {e}", location.localtime))
    })?;
    let utc = DateTime::from_timestamp(location.localtime_epoch, 0)
        .ok_or_else(|| {
            FetchError::InvalidResponse(format!("bad epoch {}", location.localtime_epoch))
        })?
        .naive_utc();

    // localtime has minute precision; offsets come in quarter hours
    let minutes = (local - utc).num_seconds() as f64 / 60.0;
    let minutes = ((minutes / 15.0).round() * 15.0) as i64;

    let sign = if minutes < 0 { '-' } else { '+' };
    let minutes = minutes.abs();
    Ok(format!("{sign}{:02}:{:02}", minutes / 60, minutes % 60))
}

impl WaHistoryResponse {
    fn into_raw(
        self,
        coordinate: Coordinate,
        date: NaiveDate,
    ) -> Result<RawDaySummary, FetchError> {
        let timezone = utc_offset(&self.location)?;

        let day = self
            .forecast
            .forecastday
            .into_iter()
            .find(|d| d.date == date)
            .ok_or_else(|| FetchError::NotFound(format!("WeatherAPI has no history for {date}")))?;

        let at = |hour: u32| {
            day.hour
                .iter()
                .find(|h| hour_of(h) == Some(hour))
                .ok_or_else(|| {
                    FetchError::InvalidResponse(format!(
                        "WeatherAPI history for {date} lacks hour {hour:02}"
                    ))
                })
        };

        let morning = at(MORNING_HOUR)?;
        let afternoon = at(AFTERNOON_HOUR)?;
        let evening = at(EVENING_HOUR)?;
        let night = at(NIGHT_HOUR)?;

        let windiest = day
            .hour
            .iter()
            .max_by(|a, b| a.wind_kph.total_cmp(&b.wind_kph))
            .ok_or_else(|| {
                FetchError::InvalidResponse(format!("WeatherAPI history for {date} has no hours"))
            })?;

        Ok(RawDaySummary {
            date,
            coordinate,
            timezone,
            temp_min: day.day.mintemp_c + KELVIN_OFFSET,
            temp_max: day.day.maxtemp_c + KELVIN_OFFSET,
            temp_afternoon: afternoon.temp_c + KELVIN_OFFSET,
            temp_night: night.temp_c + KELVIN_OFFSET,
            temp_evening: evening.temp_c + KELVIN_OFFSET,
            temp_morning: morning.temp_c + KELVIN_OFFSET,
            cloud_cover_afternoon: afternoon.cloud,
            humidity_afternoon: afternoon.humidity,
            precipitation_total: day.day.totalprecip_mm,
            pressure_afternoon: afternoon.pressure_mb,
            wind_speed_max: windiest.wind_kph / 3.6,
            wind_direction_max: windiest.wind_degree,
        })
    }
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    async fn day_summary(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
    ) -> Result<RawDaySummary, FetchError> {
        let body = self
            .get(
                "history.json",
                &[
                    ("q", format!("{},{}", coordinate.latitude, coordinate.longitude)),
                    ("dt", date.format("%Y-%m-%d").to_string()),
                ],
            )
            .await?;

        let parsed: WaHistoryResponse = parse_json(&body, "WeatherAPI history")?;
        parsed.into_raw(coordinate, date)
    }
}

#[async_trait]
impl Geocoder for WeatherApiProvider {
    async fn resolve(&self, name: &str) -> Result<Vec<GeocodingResult>, FetchError> {
        let body = match self.get("search.json", &[("q", name.to_string())]).await {
            Err(FetchError::NotFound(_)) => return Ok(Vec::new()),
            other => other?,
        };
        let entries: Vec<WaSearchEntry> = parse_json(&body, "WeatherAPI search")?;

        let total = entries.len();
        entries
            .into_iter()
            .enumerate()
            .map(|(rank, entry)| -> Result<GeocodingResult, FetchError> {
                let coordinate = Coordinate::new(entry.lat, entry.lon)
                    .map_err(|e| FetchError::InvalidResponse(e.to_string()))?;

                let display_name = [Some(entry.name), entry.region.clone(), entry.country.clone()]
                    .into_iter()
                    .flatten()
                    .filter(|part| !part.is_empty())
                    .collect::<Vec<_>>()
                    .join(", ");

                Ok(GeocodingResult {
                    coordinate,
                    display_name,
                    confidence: rank_confidence(rank, total),
                    country: entry.country,
                    state: entry.region,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(localtime: &str, epoch: i64) -> WaLocation {
        WaLocation {
            localtime_epoch: epoch,
            localtime: localtime.into(),
        }
    }

    #[test]
    fn offset_from_local_clock() {
        // 2024-01-01 00:00 UTC
        let epoch = 1_704_067_200;
        assert_eq!(utc_offset(&location("2024-01-01 02:00", epoch)).unwrap(), "+02:00");
        assert_eq!(utc_offset(&location("2023-12-31 19:00", epoch)).unwrap(), "-05:00");
        assert_eq!(utc_offset(&location("2024-01-01 05:30", epoch)).unwrap(), "+05:30");
        assert_eq!(utc_offset(&location("2024-01-01 00:00", epoch)).unwrap(), "+00:00");
    }

    #[test]
    fn history_payload_samples_fixed_hours() {
        let hours: Vec<serde_json::Value> = (0..24)
            .map(|h| {
                serde_json::json!({
                    "time": format!("2024-01-01 {h:02}:00"),
                    "temp_c": h as f64,
                    "humidity": 50 + h,
                    "cloud": 10,
                    "pressure_mb": 1000 + h,
                    "wind_kph": if h == 15 { 36.0 } else { 7.2 },
                    "wind_degree": h * 10,
                })
            })
            .collect();

        let body = serde_json::json!({
            "location": {"localtime_epoch": 1_704_067_200, "localtime": "2024-01-01 01:00"},
            "forecast": {"forecastday": [{
                "date": "2024-01-01",
                "day": {"maxtemp_c": 23.0, "mintemp_c": 0.0, "totalprecip_mm": 1.5},
                "hour": hours,
            }]}
        })
        .to_string();

        let parsed: WaHistoryResponse = parse_json(&body, "test").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let raw = parsed
            .into_raw(Coordinate::new(10.0, 20.0).unwrap(), date)
            .unwrap();

        assert_eq!(raw.timezone, "+01:00");
        assert_eq!(raw.temp_min, 273.15);
        assert_eq!(raw.temp_morning, 6.0 + 273.15);
        assert_eq!(raw.temp_afternoon, 12.0 + 273.15);
        assert_eq!(raw.temp_evening, 18.0 + 273.15);
        assert_eq!(raw.temp_night, 273.15);
        assert_eq!(raw.humidity_afternoon, 62.0);
        assert_eq!(raw.pressure_afternoon, 1012.0);
        assert_eq!(raw.wind_speed_max, 10.0);
        assert_eq!(raw.wind_direction_max, 150.0);
    }

    #[test]
    fn history_without_requested_day_is_not_found() {
        let body = serde_json::json!({
            "location": {"localtime_epoch": 1_704_067_200, "localtime": "2024-01-01 00:00"},
            "forecast": {"forecastday": []}
        })
        .to_string();

        let parsed: WaHistoryResponse = parse_json(&body, "test").unwrap();
        let err = parsed
            .into_raw(
                Coordinate::new(0.0, 0.0).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
    }
}
