use std::collections::BTreeSet;
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::StorageError;
use crate::model::{CacheGap, Coordinate, DateRange, RawDaySummary};

pub mod sqlite;

pub use sqlite::SqliteRepository;

/// Durable cache of raw daily summaries keyed by (coordinate at cache
/// precision, date).
#[async_trait]
pub trait WeatherRepository: Send + Sync + Debug {
    /// Cached days inside `range`, ascending by date.
    async fn get_cached(
        &self,
        coordinate: Coordinate,
        range: DateRange,
    ) -> Result<Vec<RawDaySummary>, StorageError>;

    /// Insert or overwrite the given days. Writing a day twice leaves one row.
    async fn save(&self, coordinate: Coordinate, days: &[RawDaySummary])
    -> Result<(), StorageError>;

    /// Maximal runs of days in `range` with nothing cached, ascending.
    async fn compute_gaps(
        &self,
        coordinate: Coordinate,
        range: DateRange,
    ) -> Result<Vec<CacheGap>, StorageError> {
        let cached = self.get_cached(coordinate, range).await?;
        Ok(gaps_in(range, cached.iter().map(|day| day.date)))
    }
}

/// Walk `range` day by day and group the days missing from `cached` into
/// maximal contiguous gaps. Cached dates outside the range are ignored.
pub fn gaps_in(range: DateRange, cached: impl IntoIterator<Item = NaiveDate>) -> Vec<CacheGap> {
    let cached: BTreeSet<NaiveDate> = cached
        .into_iter()
        .filter(|day| range.contains(*day))
        .collect();

    let mut gaps = Vec::new();
    let mut current: Option<CacheGap> = None;

    for day in range.iter() {
        if cached.contains(&day) {
            if let Some(gap) = current.take() {
                gaps.push(gap);
            }
            continue;
        }

        match current.as_mut() {
            Some(gap) => gap.extend_to(day),
            None => current = Some(CacheGap { start: day, end: day }),
        }
    }

    gaps.extend(current);
    gaps
}
