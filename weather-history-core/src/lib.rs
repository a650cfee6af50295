//! Core library for the `weather-history` CLI.
//!
//! This crate defines:
//! - Configuration & credentials handling
//! - Upstream providers (OpenWeather One Call day summaries, WeatherAPI history)
//! - A rate-limited, retrying fetcher shared by every request
//! - A SQLite cache of raw daily summaries and gap detection over it
//! - Pure enrichment of raw days into derived indices
//! - [`WeatherService`], which ties the above together per date range
//!
//! It is used by `weather-history-cli`, but can also be reused by other binaries or services.

pub mod config;
pub mod enrich;
pub mod error;
pub mod fetcher;
pub mod model;
pub mod provider;
pub mod ratelimit;
pub mod repository;
pub mod service;

pub use config::{Config, ProviderConfig};
pub use enrich::enrich;
pub use error::{
    DayError, FetchError, FetchErrorKind, ResolutionError, ServiceError, StorageError,
    ValidationError,
};
pub use fetcher::{RetryConfig, UpstreamFetcher};
pub use model::{
    CacheGap, Coordinate, DateRange, EnrichedDaySummary, GeocodingResult, LocationSpec,
    PrecipitationIntensity, RawDaySummary, Season, WeatherServiceResponse,
};
pub use provider::{Geocoder, ProviderId, Upstream, WeatherProvider};
pub use ratelimit::RateLimiter;
pub use repository::{SqliteRepository, WeatherRepository};
pub use service::{CacheReadPolicy, GeocodingPolicy, ServiceConfig, WeatherService};
