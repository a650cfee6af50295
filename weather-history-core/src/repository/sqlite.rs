//! SQLite-backed cache of raw daily summaries.
//!
//! Rows are keyed by the coordinate's integer cache key and the ISO date, so
//! near-identical coordinates collapse onto one row and writes are plain
//! upserts. All statements run on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params, types::Type};

use crate::error::StorageError;
use crate::model::{Coordinate, DateRange, RawDaySummary};

use super::WeatherRepository;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS daily_summaries (
        lat_key INTEGER NOT NULL,
        lon_key INTEGER NOT NULL,
        date TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        timezone TEXT NOT NULL,
        temp_min REAL NOT NULL,
        temp_max REAL NOT NULL,
        temp_afternoon REAL NOT NULL,
        temp_night REAL NOT NULL,
        temp_evening REAL NOT NULL,
        temp_morning REAL NOT NULL,
        cloud_cover_afternoon REAL NOT NULL,
        humidity_afternoon REAL NOT NULL,
        precipitation_total REAL NOT NULL,
        pressure_afternoon REAL NOT NULL,
        wind_speed_max REAL NOT NULL,
        wind_direction_max REAL NOT NULL,
        fetched_at TEXT NOT NULL,
        PRIMARY KEY (lat_key, lon_key, date)
    );
"#;

const UPSERT: &str = r#"
    INSERT INTO daily_summaries (
        lat_key, lon_key, date, latitude, longitude, timezone,
        temp_min, temp_max, temp_afternoon, temp_night, temp_evening, temp_morning,
        cloud_cover_afternoon, humidity_afternoon, precipitation_total,
        pressure_afternoon, wind_speed_max, wind_direction_max, fetched_at
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
    ON CONFLICT (lat_key, lon_key, date) DO UPDATE SET
        latitude = excluded.latitude,
        longitude = excluded.longitude,
        timezone = excluded.timezone,
        temp_min = excluded.temp_min,
        temp_max = excluded.temp_max,
        temp_afternoon = excluded.temp_afternoon,
        temp_night = excluded.temp_night,
        temp_evening = excluded.temp_evening,
        temp_morning = excluded.temp_morning,
        cloud_cover_afternoon = excluded.cloud_cover_afternoon,
        humidity_afternoon = excluded.humidity_afternoon,
        precipitation_total = excluded.precipitation_total,
        pressure_afternoon = excluded.pressure_afternoon,
        wind_speed_max = excluded.wind_speed_max,
        wind_direction_max = excluded.wind_direction_max,
        fetched_at = excluded.fetched_at
"#;

const SELECT_RANGE: &str = r#"
    SELECT date, latitude, longitude, timezone,
           temp_min, temp_max, temp_afternoon, temp_night, temp_evening, temp_morning,
           cloud_cover_afternoon, humidity_afternoon, precipitation_total,
           pressure_afternoon, wind_speed_max, wind_direction_max
    FROM daily_summaries
    WHERE lat_key = ?1 AND lon_key = ?2 AND date >= ?3 AND date <= ?4
    ORDER BY date ASC
"#;

#[derive(Debug, Clone)]
pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRepository {
    /// Open (or create) the cache database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of cached days across all locations.
    pub async fn count(&self) -> Result<usize, StorageError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM daily_summaries", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    fn row_to_summary(row: &rusqlite::Row) -> rusqlite::Result<RawDaySummary> {
        let date_str: String = row.get(0)?;
        let date = NaiveDate::parse_from_str(&date_str, DATE_FORMAT)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e)))?;

        Ok(RawDaySummary {
            date,
            coordinate: Coordinate {
                latitude: row.get(1)?,
                longitude: row.get(2)?,
            },
            timezone: row.get(3)?,
            temp_min: row.get(4)?,
            temp_max: row.get(5)?,
            temp_afternoon: row.get(6)?,
            temp_night: row.get(7)?,
            temp_evening: row.get(8)?,
            temp_morning: row.get(9)?,
            cloud_cover_afternoon: row.get(10)?,
            humidity_afternoon: row.get(11)?,
            precipitation_total: row.get(12)?,
            pressure_afternoon: row.get(13)?,
            wind_speed_max: row.get(14)?,
            wind_direction_max: row.get(15)?,
        })
    }
}

#[async_trait]
impl WeatherRepository for SqliteRepository {
    async fn get_cached(
        &self,
        coordinate: Coordinate,
        range: DateRange,
    ) -> Result<Vec<RawDaySummary>, StorageError> {
        let (lat_key, lon_key) = coordinate.cache_key();
        let start = range.start().format(DATE_FORMAT).to_string();
        let end = range.end().format(DATE_FORMAT).to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(SELECT_RANGE)?;
            let rows = stmt.query_map(params![lat_key, lon_key, start, end], Self::row_to_summary)?;
            let days = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(days)
        })
        .await
    }

    async fn save(
        &self,
        coordinate: Coordinate,
        days: &[RawDaySummary],
    ) -> Result<(), StorageError> {
        if days.is_empty() {
            return Ok(());
        }

        let (lat_key, lon_key) = coordinate.cache_key();
        let days = days.to_vec();
        let fetched_at = Utc::now().to_rfc3339();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare_cached(UPSERT)?;
                for day in &days {
                    stmt.execute(params![
                        lat_key,
                        lon_key,
                        day.date.format(DATE_FORMAT).to_string(),
                        day.coordinate.latitude,
                        day.coordinate.longitude,
                        day.timezone,
                        day.temp_min,
                        day.temp_max,
                        day.temp_afternoon,
                        day.temp_night,
                        day.temp_evening,
                        day.temp_morning,
                        day.cloud_cover_afternoon,
                        day.humidity_afternoon,
                        day.precipitation_total,
                        day.pressure_afternoon,
                        day.wind_speed_max,
                        day.wind_direction_max,
                        fetched_at,
                    ])?;
                }
            }
            tx.commit()?;
            tracing::debug!(rows = days.len(), "cached day summaries");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(coordinate: Coordinate, day: u32, temp_max: f64) -> RawDaySummary {
        RawDaySummary {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            coordinate,
            timezone: "+01:00".into(),
            temp_min: 270.0,
            temp_max,
            temp_afternoon: 275.0,
            temp_night: 271.0,
            temp_evening: 273.0,
            temp_morning: 272.0,
            cloud_cover_afternoon: 75.0,
            humidity_afternoon: 80.0,
            precipitation_total: 2.5,
            pressure_afternoon: 1020.0,
            wind_speed_max: 4.0,
            wind_direction_max: 270.0,
        }
    }

    fn range(start: u32, end: u32) -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, start).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, end).unwrap(),
        )
        .unwrap()
    }

    fn berlin() -> Coordinate {
        Coordinate::new(52.52, 13.405).unwrap()
    }

    #[tokio::test]
    async fn saved_days_read_back_in_date_order() {
        let repo = SqliteRepository::in_memory().unwrap();
        let coord = berlin();

        repo.save(coord, &[summary(coord, 3, 280.0), summary(coord, 1, 281.0)])
            .await
            .unwrap();

        let days = repo.get_cached(coord, range(1, 5)).await.unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0], summary(coord, 1, 281.0));
        assert_eq!(days[1].date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }

    #[tokio::test]
    async fn saving_twice_keeps_one_row() {
        let repo = SqliteRepository::in_memory().unwrap();
        let coord = berlin();
        let day = summary(coord, 2, 280.0);

        repo.save(coord, std::slice::from_ref(&day)).await.unwrap();
        repo.save(coord, std::slice::from_ref(&day)).await.unwrap();

        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.get_cached(coord, range(2, 2)).await.unwrap(), vec![day]);
    }

    #[tokio::test]
    async fn upsert_overwrites_existing_day() {
        let repo = SqliteRepository::in_memory().unwrap();
        let coord = berlin();

        repo.save(coord, &[summary(coord, 2, 280.0)]).await.unwrap();
        repo.save(coord, &[summary(coord, 2, 285.0)]).await.unwrap();

        let days = repo.get_cached(coord, range(1, 3)).await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].temp_max, 285.0);
    }

    #[tokio::test]
    async fn nearby_coordinate_hits_the_same_rows() {
        let repo = SqliteRepository::in_memory().unwrap();
        let coord = berlin();
        repo.save(coord, &[summary(coord, 1, 280.0)]).await.unwrap();

        let nearby = Coordinate::new(52.520_04, 13.404_96).unwrap();
        assert_eq!(repo.get_cached(nearby, range(1, 1)).await.unwrap().len(), 1);

        let elsewhere = Coordinate::new(52.53, 13.405).unwrap();
        assert!(repo.get_cached(elsewhere, range(1, 1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn compute_gaps_uses_cached_days() {
        let repo = SqliteRepository::in_memory().unwrap();
        let coord = berlin();
        repo.save(coord, &[summary(coord, 2, 280.0), summary(coord, 5, 280.0)])
            .await
            .unwrap();

        let gaps = repo.compute_gaps(coord, range(1, 6)).await.unwrap();
        let spans: Vec<_> = gaps
            .iter()
            .map(|g| (g.start.format("%d").to_string(), g.days()))
            .collect();
        assert_eq!(
            spans,
            vec![("01".to_string(), 1), ("03".to_string(), 2), ("06".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite");

        let repo = SqliteRepository::open(&path).unwrap();
        let coord = berlin();
        repo.save(coord, &[summary(coord, 1, 280.0)]).await.unwrap();
        drop(repo);

        let reopened = SqliteRepository::open(&path).unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
    }
}
