use std::hash::{Hash, Hasher};

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{DayError, ValidationError};

/// Number of decimals a coordinate is rounded to when used as a cache key.
/// Four decimals is roughly 11 m at the equator.
pub const CACHE_PRECISION_DECIMALS: i32 = 4;

/// A point on the globe, in decimal degrees.
///
/// Equality and hashing go through [`Coordinate::cache_key`], so two
/// coordinates that round to the same key are the same location as far as
/// the cache is concerned.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ValidationError> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);

        if !valid {
            return Err(ValidationError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }

        Ok(Self {
            latitude,
            longitude,
        })
    }

    /// Integer key of this coordinate at cache precision.
    pub fn cache_key(&self) -> (i64, i64) {
        let scale = 10f64.powi(CACHE_PRECISION_DECIMALS);
        (
            (self.latitude * scale).round() as i64,
            (self.longitude * scale).round() as i64,
        )
    }

    pub fn is_southern(&self) -> bool {
        self.latitude < 0.0
    }
}

impl PartialEq for Coordinate {
    fn eq(&self, other: &Self) -> bool {
        self.cache_key() == other.cache_key()
    }
}

impl Eq for Coordinate {}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cache_key().hash(state);
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DateRangeFields")]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct DateRangeFields {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<DateRangeFields> for DateRange {
    type Error = ValidationError;

    fn try_from(fields: DateRangeFields) -> Result<Self, Self::Error> {
        Self::new(fields.start, fields.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Number of days in the range, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Every day of the range, ascending.
    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Maximal run of consecutive days with nothing in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGap {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CacheGap {
    pub fn days(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub(crate) fn extend_to(&mut self, day: NaiveDate) {
        debug_assert_eq!(self.end.checked_add_days(Days::new(1)), Some(day));
        self.end = day;
    }
}

/// Where the caller wants weather for: explicit coordinates or a place name.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationSpec {
    Coordinate(Coordinate),
    Name(String),
}

impl LocationSpec {
    /// Build a location from the loose set of optional inputs a query carries.
    ///
    /// Exactly one of "latitude and longitude" or "name" must be present.
    pub fn from_parts(
        latitude: Option<f64>,
        longitude: Option<f64>,
        name: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let name = name.map(str::trim).filter(|n| !n.is_empty());

        match (latitude, longitude, name) {
            (Some(_), Some(_), Some(_)) => Err(ValidationError::BothLocationKinds),
            (Some(lat), Some(lon), None) => Ok(Self::Coordinate(Coordinate::new(lat, lon)?)),
            (None, None, Some(name)) => Ok(Self::Name(name.to_string())),
            (None, None, None) => Err(ValidationError::NoLocation),
            (_, _, Some(_)) => Err(ValidationError::BothLocationKinds),
            _ => Err(ValidationError::PartialCoordinate),
        }
    }
}

/// One day of raw observations for one location, as returned by the provider.
///
/// Temperatures are in Kelvin, precipitation in mm, pressure in hPa, wind
/// speed in m/s and direction in degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDaySummary {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub coordinate: Coordinate,
    /// UTC offset of the location, e.g. `+02:00`.
    pub timezone: String,
    pub temp_min: f64,
    pub temp_max: f64,
    pub temp_afternoon: f64,
    pub temp_night: f64,
    pub temp_evening: f64,
    pub temp_morning: f64,
    pub cloud_cover_afternoon: f64,
    pub humidity_afternoon: f64,
    pub precipitation_total: f64,
    pub pressure_afternoon: f64,
    pub wind_speed_max: f64,
    pub wind_direction_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrecipitationIntensity {
    None,
    Light,
    Moderate,
    Heavy,
    Violent,
}

/// A raw day plus every derived index. Rebuilt on each read, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedDaySummary {
    #[serde(flatten)]
    pub raw: RawDaySummary,
    pub temp_range: f64,
    pub temp_variability_index: f64,
    pub season: Season,
    pub extreme_temperature: bool,
    pub extreme_precipitation: bool,
    pub extreme_wind: bool,
    /// Felt temperature, Kelvin.
    pub humidex: f64,
    pub precipitation_intensity: PrecipitationIntensity,
    /// Kelvin; only defined for cold and windy afternoons.
    pub wind_chill: Option<f64>,
    /// Kelvin.
    pub heat_index: f64,
}

/// One candidate returned by a geocoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodingResult {
    #[serde(flatten)]
    pub coordinate: Coordinate,
    pub display_name: String,
    /// Relative confidence in `0.0..=1.0`, higher is better.
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherServiceResponse {
    pub weather_data: Vec<EnrichedDaySummary>,
    pub errors: Vec<DayError>,
    pub geocoding_results: Vec<GeocodingResult>,
}
