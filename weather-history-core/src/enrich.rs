//! Derived meteorological indices.
//!
//! Everything here is a pure function of a [`RawDaySummary`]: no I/O, no
//! clock, no shared state. Derived fields are recomputed on every read, so
//! changing a formula or threshold never requires backfilling the cache.
//!
//! Thresholds (Kelvin, mm/day, m/s):
//!
//! | Constant                      | Value  | Rule                         |
//! |-------------------------------|--------|------------------------------|
//! | [`EXTREME_HEAT_K`]            | 308.15 | `temp_max >= value`          |
//! | [`EXTREME_COLD_K`]            | 263.15 | `temp_min < value`           |
//! | [`EXTREME_PRECIPITATION_MM`]  | 50     | `precipitation_total > value`|
//! | [`EXTREME_WIND_MPS`]          | 20     | `wind_speed_max > value`     |
//! | [`TEMP_VARIABILITY_SCALE_K`]  | 10     | divisor of the period stddev |
//!
//! Precipitation intensity: `0` None, `< 10` Light, `< 50` Moderate,
//! `< 100` Heavy, otherwise Violent.

use chrono::Datelike;

use crate::model::{EnrichedDaySummary, PrecipitationIntensity, RawDaySummary, Season};

const KELVIN_OFFSET: f64 = 273.15;

pub const EXTREME_HEAT_K: f64 = 308.15;
pub const EXTREME_COLD_K: f64 = 263.15;
pub const EXTREME_PRECIPITATION_MM: f64 = 50.0;
pub const EXTREME_WIND_MPS: f64 = 20.0;
pub const TEMP_VARIABILITY_SCALE_K: f64 = 10.0;

/// Upper bounds (exclusive) for Light, Moderate and Heavy.
pub const PRECIPITATION_BREAKPOINTS_MM: [f64; 3] = [10.0, 50.0, 100.0];

/// Wind chill is only meaningful at or below 10 °C with wind above 4.8 km/h.
pub const WIND_CHILL_MAX_TEMP_K: f64 = 283.15;
pub const WIND_CHILL_MIN_WIND_MPS: f64 = 1.33;

pub fn enrich(raw: &RawDaySummary) -> EnrichedDaySummary {
    EnrichedDaySummary {
        temp_range: raw.temp_max - raw.temp_min,
        temp_variability_index: temp_variability_index(raw),
        season: season(raw.date.month(), raw.coordinate.is_southern()),
        extreme_temperature: raw.temp_max >= EXTREME_HEAT_K || raw.temp_min < EXTREME_COLD_K,
        extreme_precipitation: raw.precipitation_total > EXTREME_PRECIPITATION_MM,
        extreme_wind: raw.wind_speed_max > EXTREME_WIND_MPS,
        humidex: humidex(raw.temp_afternoon, raw.humidity_afternoon),
        precipitation_intensity: precipitation_intensity(raw.precipitation_total),
        wind_chill: wind_chill(raw.temp_afternoon, raw.wind_speed_max),
        heat_index: heat_index(raw.temp_afternoon, raw.humidity_afternoon),
        raw: raw.clone(),
    }
}

/// Population standard deviation of the four period temperatures, scaled.
pub fn temp_variability_index(raw: &RawDaySummary) -> f64 {
    let temps = [
        raw.temp_morning,
        raw.temp_afternoon,
        raw.temp_evening,
        raw.temp_night,
    ];
    let mean = temps.iter().sum::<f64>() / temps.len() as f64;
    let variance = temps.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / temps.len() as f64;

    variance.sqrt() / TEMP_VARIABILITY_SCALE_K
}

/// Meteorological season; the southern hemisphere is shifted by six months.
pub fn season(month: u32, southern: bool) -> Season {
    let month = if southern { (month + 5) % 12 + 1 } else { month };

    match month {
        3..=5 => Season::Spring,
        6..=8 => Season::Summer,
        9..=11 => Season::Autumn,
        _ => Season::Winter,
    }
}

/// Humidex from afternoon temperature (K) and relative humidity (%), in K.
///
/// The dew point is approximated from relative humidity, see
/// <https://www.ohcow.on.ca/edit/files/general_handouts/heat-stress-calculator.html>.
pub fn humidex(temp_k: f64, humidity_pct: f64) -> f64 {
    let temp_c = temp_k - KELVIN_OFFSET;
    let dew_point =
        (humidity_pct / 100.0).powf(1.0 / 8.0) * (112.0 + 0.9 * temp_c) + 0.1 * temp_c - 112.0;
    let vapour_pressure = 6.11 * 10f64.powf(7.5 * dew_point / (237.7 + dew_point));

    temp_c + 0.5555 * (vapour_pressure - 10.0) + KELVIN_OFFSET
}

pub fn precipitation_intensity(total_mm: f64) -> PrecipitationIntensity {
    let [light, moderate, heavy] = PRECIPITATION_BREAKPOINTS_MM;

    if total_mm <= 0.0 {
        PrecipitationIntensity::None
    } else if total_mm < light {
        PrecipitationIntensity::Light
    } else if total_mm < moderate {
        PrecipitationIntensity::Moderate
    } else if total_mm < heavy {
        PrecipitationIntensity::Heavy
    } else {
        PrecipitationIntensity::Violent
    }
}

/// Siple/NWS wind chill in Kelvin, `None` outside its domain of validity.
pub fn wind_chill(temp_k: f64, wind_mps: f64) -> Option<f64> {
    if temp_k > WIND_CHILL_MAX_TEMP_K || wind_mps <= WIND_CHILL_MIN_WIND_MPS {
        return None;
    }

    let factor = 0.453843 * wind_mps.sqrt() + 0.464255 - 0.0453843 * wind_mps;
    Some(306.15 - factor * (306.15 - temp_k))
}

/// NOAA heat index in Kelvin.
///
/// Uses the simple Steadman approximation below 80 °F and the Rothfusz
/// regression (with its two humidity adjustments) above it.
/// <https://www.wpc.ncep.noaa.gov/html/heatindex_equation.shtml>
pub fn heat_index(temp_k: f64, humidity_pct: f64) -> f64 {
    let t = (temp_k - KELVIN_OFFSET) * 9.0 / 5.0 + 32.0;
    let rh = humidity_pct;

    let simple = 0.5 * (t + 61.0 + (t - 68.0) * 1.2 + rh * 0.094);

    let fahrenheit = if simple < 80.0 {
        simple
    } else {
        let regression = -42.379 + 2.04901523 * t + 10.14333127 * rh
            - 0.22475541 * t * rh
            - 0.00683783 * t * t
            - 0.05481717 * rh * rh
            + 0.00122874 * t * t * rh
            + 0.00085282 * t * rh * rh
            - 0.00000199 * t * t * rh * rh;

        // NOAA subtracts the dry-air term; it lowers the index
        let adjustment = if rh < 13.0 && (80.0..=112.0).contains(&t) {
            -((13.0 - rh) / 4.0) * ((17.0 - (t - 95.0).abs()) / 17.0).sqrt()
        } else if rh > 85.0 && (80.0..=87.0).contains(&t) {
            ((rh - 85.0) / 10.0) * ((87.0 - t) / 5.0)
        } else {
            0.0
        };

        regression + adjustment
    };

    (fahrenheit - 32.0) * 5.0 / 9.0 + KELVIN_OFFSET
}
