use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::GeocodingResult;

/// Failure of a single upstream call.
///
/// Only `Transient` and `RateLimited` are retried by the fetcher; the other
/// variants are terminal for the day they belong to.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("upstream quota exceeded: {0}")]
    RateLimited(String),
    #[error("no data available: {0}")]
    NotFound(String),
    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Transient(_) => FetchErrorKind::Transient,
            FetchError::RateLimited(_) => FetchErrorKind::RateLimited,
            FetchError::NotFound(_) => FetchErrorKind::NotFound,
            FetchError::InvalidResponse(_) => FetchErrorKind::InvalidResponse,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::RateLimited(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FetchError::InvalidResponse(err.to_string())
        } else {
            // timeouts, connection resets, DNS failures and the like
            FetchError::Transient(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Transient,
    RateLimited,
    NotFound,
    InvalidResponse,
}

/// Per-day error entry reported alongside the successfully fetched days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayError {
    pub date: NaiveDate,
    pub kind: FetchErrorKind,
    pub message: String,
}

impl DayError {
    pub fn new(date: NaiveDate, err: &FetchError) -> Self {
        Self {
            date,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Input rejected before any work is done.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
    #[error("date range of {days} days exceeds maximum allowed ({max} days)")]
    RangeTooLong { days: i64, max: u32 },
    #[error("provide either latitude and longitude OR location, not both")]
    BothLocationKinds,
    #[error("provide either latitude and longitude OR location")]
    NoLocation,
    #[error("latitude and longitude must be given together")]
    PartialCoordinate,
    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolutionError {
    #[error("could not find coordinates for location: {0}")]
    NotFound(String),
    #[error("multiple locations found for '{name}', please specify coordinates manually")]
    Ambiguous {
        name: String,
        candidates: Vec<GeocodingResult>,
    },
    #[error("geocoding failed: {0}")]
    Geocoder(#[from] FetchError),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("storage task failed: {0}")]
    Task(String),
    #[error("failed to prepare cache location: {0}")]
    Io(#[from] std::io::Error),
}

/// Request-level failure: nothing (or nothing trustworthy) could be returned.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("cache read failed: {0}")]
    Storage(#[from] StorageError),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_and_rate_limited_are_retryable() {
        assert!(FetchError::Transient("502".into()).is_retryable());
        assert!(FetchError::RateLimited("429".into()).is_retryable());
        assert!(!FetchError::NotFound("404".into()).is_retryable());
        assert!(!FetchError::InvalidResponse("bad json".into()).is_retryable());
    }

    #[test]
    fn day_error_carries_kind_and_message() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let entry = DayError::new(date, &FetchError::NotFound("2024-01-03".into()));

        assert_eq!(entry.kind, FetchErrorKind::NotFound);
        assert!(entry.message.contains("no data available"));

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert_eq!(json["date"], "2024-01-03");
    }
}
