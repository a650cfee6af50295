use crate::{
    Config,
    error::FetchError,
    model::{Coordinate, GeocodingResult, RawDaySummary},
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::{convert::TryFrom, fmt::Debug, sync::Arc, time::Duration};

pub mod openweather;
pub mod weatherapi;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("weather-history/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// Source of one day of raw observations for one coordinate.
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    async fn day_summary(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
    ) -> Result<RawDaySummary, FetchError>;
}

/// Place-name to coordinate resolution.
///
/// Returns candidates best first; an empty list means no match.
#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    async fn resolve(&self, name: &str) -> Result<Vec<GeocodingResult>, FetchError>;
}

/// Both halves of a configured upstream, ready to be shared across tasks.
#[derive(Debug, Clone)]
pub struct Upstream {
    pub id: ProviderId,
    pub weather: Arc<dyn WeatherProvider>,
    pub geocoder: Arc<dyn Geocoder>,
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(id: ProviderId, config: &Config) -> anyhow::Result<Upstream> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather-history configure {id}` and enter your API key."
        )
    })?;
    let limit = config.service.geocoding_results_limit;

    let upstream = match id {
        ProviderId::OpenWeather => {
            let provider = Arc::new(
                OpenWeatherProvider::new(api_key.to_owned())?.with_geocoding_limit(limit),
            );
            Upstream {
                id,
                weather: provider.clone(),
                geocoder: provider,
            }
        }
        ProviderId::WeatherApi => {
            let provider = Arc::new(WeatherApiProvider::new(api_key.to_owned())?);
            Upstream {
                id,
                weather: provider.clone(),
                geocoder: provider,
            }
        }
    };

    Ok(upstream)
}

/// Construct the default provider from config, using `default_provider` field.
pub fn default_provider_from_config(config: &Config) -> anyhow::Result<Upstream> {
    let id = config.default_provider_id()?;
    provider_from_config(id, config)
}

pub(crate) fn http_client() -> anyhow::Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))
}

/// Map a non-success HTTP status onto the fetch error taxonomy.
pub(crate) fn classify_status(status: StatusCode, context: &str, body: &str) -> FetchError {
    let message = format!("{context} failed with status {status}: {}", truncate_body(body));

    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited(message),
        StatusCode::REQUEST_TIMEOUT => FetchError::Transient(message),
        s if s.is_server_error() => FetchError::Transient(message),
        _ => FetchError::InvalidResponse(message),
    }
}

/// Send a prepared GET and return the body of a successful response.
pub(crate) async fn send_for_body(
    request: reqwest::RequestBuilder,
    context: &str,
) -> Result<String, FetchError> {
    let res = request.send().await?;

    let status = res.status();
    let body = res.text().await?;

    if !status.is_success() {
        return Err(classify_status(status, context, &body));
    }

    Ok(body)
}

pub(crate) fn parse_json<T: DeserializeOwned>(body: &str, context: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| {
        FetchError::InvalidResponse(format!(
            "Failed to parse {context} JSON: {e}: {}",
            truncate_body(body)
        ))
    })
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let cut = (0..=MAX).rev().find(|i| body.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &body[..cut])
    } else {
        body.to_string()
    }
}

/// Rank-based confidence for geocoders that only return an ordered list.
pub(crate) fn rank_confidence(rank: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    1.0 - rank as f64 / total as f64
}
