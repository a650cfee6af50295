//! Request orchestration: resolve, read cache, fetch gaps, persist, enrich.
//!
//! One request runs as follows:
//! 1. validate the range and resolve the location to a single coordinate,
//! 2. read the cached days and derive the gaps from them,
//! 3. fetch every missing day in its own task, bounded by a semaphore and
//!    paced by the shared rate limiter,
//! 4. persist the successes and record the failures per day,
//! 5. merge, sort by date and enrich.
//!
//! Dropping the request future (or hitting the configured timeout) drops the
//! `JoinSet`, which aborts every in-flight fetch before anything is saved.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::enrich::enrich;
use crate::error::{DayError, FetchError, ResolutionError, ServiceError, ValidationError};
use crate::fetcher::UpstreamFetcher;
use crate::model::{
    CacheGap, Coordinate, DateRange, GeocodingResult, LocationSpec, RawDaySummary,
    WeatherServiceResponse,
};
use crate::provider::{Geocoder, Upstream};
use crate::repository::{WeatherRepository, gaps_in};

pub const DEFAULT_MAX_DATE_RANGE_DAYS: u32 = 31;
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;
pub const DEFAULT_GEOCODING_RESULTS_LIMIT: u32 = 5;

/// What to do when the cache cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheReadPolicy {
    /// Fail the request with a storage error.
    #[default]
    Propagate,
    /// Log and fetch the whole range from upstream.
    TreatAsGap,
}

/// How to pick a coordinate when the geocoder returns several candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodingPolicy {
    /// Highest confidence wins, ties go to the geocoder's order.
    #[default]
    BestMatch,
    /// Fail unless exactly one candidate is returned.
    RejectAmbiguous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Longest accepted range, in days, both ends included.
    pub max_date_range_days: u32,
    /// Upper bound on in-flight fetch tasks per request.
    pub max_concurrent_fetches: usize,
    pub request_timeout_secs: Option<u64>,
    pub cache_read_policy: CacheReadPolicy,
    pub geocoding_policy: GeocodingPolicy,
    pub geocoding_results_limit: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_date_range_days: DEFAULT_MAX_DATE_RANGE_DAYS,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            request_timeout_secs: None,
            cache_read_policy: CacheReadPolicy::default(),
            geocoding_policy: GeocodingPolicy::default(),
            geocoding_results_limit: DEFAULT_GEOCODING_RESULTS_LIMIT,
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone)]
pub struct WeatherService {
    repository: Arc<dyn WeatherRepository>,
    fetcher: UpstreamFetcher,
    geocoder: Arc<dyn Geocoder>,
    config: ServiceConfig,
}

impl WeatherService {
    pub fn new(
        repository: Arc<dyn WeatherRepository>,
        fetcher: UpstreamFetcher,
        geocoder: Arc<dyn Geocoder>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            repository,
            fetcher,
            geocoder,
            config,
        }
    }

    /// Wire a service from on-disk configuration and a constructed upstream.
    pub fn from_config(
        config: &Config,
        upstream: Upstream,
        repository: Arc<dyn WeatherRepository>,
    ) -> Self {
        let limiter = Arc::new(config.rate_limit.build());
        tracing::debug!(
            provider = %upstream.id,
            max_calls = limiter.max_calls(),
            period = ?limiter.period(),
            "upstream rate limit"
        );
        let fetcher = UpstreamFetcher::new(upstream.weather, limiter, config.retry.clone());
        Self::new(repository, fetcher, upstream.geocoder, config.service.clone())
    }

    /// Enriched daily summaries for `location` over `range`.
    ///
    /// Per-day upstream failures end up in `errors`; only invalid input, an
    /// unresolvable location, an unreadable cache or a timeout fail the call.
    pub async fn get_enriched_range(
        &self,
        location: LocationSpec,
        range: DateRange,
    ) -> Result<WeatherServiceResponse, ServiceError> {
        match self.config.request_timeout() {
            Some(limit) => tokio::time::timeout(limit, self.run(location, range))
                .await
                .map_err(|_| ServiceError::Timeout(limit))?,
            None => self.run(location, range).await,
        }
    }

    async fn run(
        &self,
        location: LocationSpec,
        range: DateRange,
    ) -> Result<WeatherServiceResponse, ServiceError> {
        self.validate(range)?;

        let (coordinate, geocoding_results) = self.resolve(location).await?;
        let (cached, gaps) = self.read_cache(coordinate, range).await?;

        let missing: usize = gaps.iter().map(CacheGap::days).sum();
        tracing::info!(
            %coordinate,
            start = %range.start(),
            end = %range.end(),
            cached = cached.len(),
            missing,
            gaps = gaps.len(),
            "serving weather range"
        );

        let outcomes = self.fetch_missing(coordinate, &gaps).await;

        let mut fetched = Vec::new();
        let mut errors = Vec::new();
        for (date, outcome) in outcomes {
            match outcome {
                Ok(day) => fetched.push(day),
                Err(err) => {
                    tracing::warn!(%date, error = %err, "could not fetch day");
                    errors.push(DayError::new(date, &err));
                }
            }
        }

        if !fetched.is_empty() {
            // the cache is best effort; the response does not depend on it
            if let Err(err) = self.repository.save(coordinate, &fetched).await {
                tracing::warn!(error = %err, days = fetched.len(), "failed to cache fetched days");
            }
        }

        let mut days = cached;
        days.extend(fetched);
        days.sort_by_key(|day| day.date);
        days.dedup_by_key(|day| day.date);
        errors.sort_by_key(|e| e.date);

        Ok(WeatherServiceResponse {
            weather_data: days.iter().map(enrich).collect(),
            errors,
            geocoding_results,
        })
    }

    fn validate(&self, range: DateRange) -> Result<(), ValidationError> {
        let max = self.config.max_date_range_days;
        if range.days() > i64::from(max) {
            return Err(ValidationError::RangeTooLong {
                days: range.days(),
                max,
            });
        }
        Ok(())
    }

    async fn resolve(
        &self,
        location: LocationSpec,
    ) -> Result<(Coordinate, Vec<GeocodingResult>), ServiceError> {
        let name = match location {
            LocationSpec::Coordinate(coordinate) => return Ok((coordinate, Vec::new())),
            LocationSpec::Name(name) => name,
        };

        // geocoding shares the provider quota
        self.fetcher.limiter().acquire().await;
        let candidates = self
            .geocoder
            .resolve(&name)
            .await
            .map_err(ResolutionError::from)?;

        let coordinate = pick_candidate(&name, &candidates, self.config.geocoding_policy)?;
        tracing::debug!(%name, %coordinate, candidates = candidates.len(), "resolved location");

        Ok((coordinate, candidates))
    }

    async fn read_cache(
        &self,
        coordinate: Coordinate,
        range: DateRange,
    ) -> Result<(Vec<RawDaySummary>, Vec<CacheGap>), ServiceError> {
        let cached = match self.repository.get_cached(coordinate, range).await {
            Ok(cached) => cached,
            Err(err) if self.config.cache_read_policy == CacheReadPolicy::TreatAsGap => {
                tracing::warn!(error = %err, "cache read failed, fetching whole range");
                Vec::new()
            }
            Err(err) => return Err(err.into()),
        };

        let gaps = gaps_in(range, cached.iter().map(|day| day.date));
        Ok((cached, gaps))
    }

    /// Fetch every day of `gaps`, one task per day. Each task reports its own
    /// outcome; results come back sorted by date.
    async fn fetch_missing(
        &self,
        coordinate: Coordinate,
        gaps: &[CacheGap],
    ) -> Vec<(NaiveDate, Result<RawDaySummary, FetchError>)> {
        let wanted: BTreeSet<NaiveDate> = gaps.iter().flat_map(CacheGap::dates).collect();
        if wanted.is_empty() {
            return Vec::new();
        }

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_fetches.max(1)));
        let mut tasks = JoinSet::new();

        for &date in &wanted {
            let fetcher = self.fetcher.clone();
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => fetcher.fetch_day(coordinate, date).await,
                    Err(_) => Err(FetchError::Transient("fetch pool closed".to_string())),
                };
                (date, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(wanted.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::error!(error = %err, "fetch task did not complete"),
            }
        }

        // a panicked task still owes its date an entry
        let reported: BTreeSet<NaiveDate> = outcomes.iter().map(|(date, _)| *date).collect();
        for date in wanted.difference(&reported) {
            outcomes.push((
                *date,
                Err(FetchError::Transient("fetch task did not complete".to_string())),
            ));
        }

        outcomes.sort_by_key(|(date, _)| *date);
        outcomes
    }
}

fn pick_candidate(
    name: &str,
    candidates: &[GeocodingResult],
    policy: GeocodingPolicy,
) -> Result<Coordinate, ResolutionError> {
    match (candidates, policy) {
        ([], _) => Err(ResolutionError::NotFound(name.to_string())),
        ([only], _) => Ok(only.coordinate),
        (_, GeocodingPolicy::RejectAmbiguous) => Err(ResolutionError::Ambiguous {
            name: name.to_string(),
            candidates: candidates.to_vec(),
        }),
        (_, GeocodingPolicy::BestMatch) => {
            let mut best = &candidates[0];
            for candidate in &candidates[1..] {
                if candidate.confidence > best.confidence {
                    best = candidate;
                }
            }
            Ok(best.coordinate)
        }
    }
}
