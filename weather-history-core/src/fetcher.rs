//! Rate-limited, retrying access to the upstream provider.
//!
//! Retries cover transient failures (timeouts, connection errors, 5xx) and
//! provider throttling (429). Every attempt goes back through the shared
//! [`RateLimiter`], so a retry never jumps the queue. `NotFound` and
//! `InvalidResponse` are terminal.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::model::{Coordinate, RawDaySummary};
use crate::provider::WeatherProvider;
use crate::ratelimit::RateLimiter;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 200;
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per day, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
        }
    }

    /// Backoff before retry number `retry` (0-based): initial * 2^retry, capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamFetcher {
    provider: Arc<dyn WeatherProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
}

impl UpstreamFetcher {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch one day. The returned error is the last one seen once retries
    /// are exhausted or a terminal error occurs.
    pub async fn fetch_day(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
    ) -> Result<RawDaySummary, FetchError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            self.limiter.acquire().await;
            tracing::debug!(%date, %coordinate, attempt, "fetching day summary");

            let err = match self.provider.day_summary(coordinate, date).await {
                Ok(summary) => {
                    if attempt > 1 {
                        tracing::info!(%date, attempt, "day summary fetched after retry");
                    }
                    return Ok(summary);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::debug!(%date, error = %err, "non-retryable fetch error");
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    %date,
                    attempts = attempt,
                    error = %err,
                    "all fetch attempts exhausted"
                );
                return Err(err);
            }

            let delay = self.retry.delay_for_retry(attempt - 1);
            tracing::warn!(
                %date,
                attempt,
                max_attempts,
                ?delay,
                error = %err,
                "retryable fetch error, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    #[derive(Debug)]
    struct Scripted {
        responses: Mutex<VecDeque<Result<(), FetchError>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(responses: Vec<Result<(), FetchError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    #[async_trait]
    impl WeatherProvider for Scripted {
        async fn day_summary(
            &self,
            coordinate: Coordinate,
            date: NaiveDate,
        ) -> Result<RawDaySummary, FetchError> {
            *self.calls.lock() += 1;
            let next = self.responses.lock().pop_front().unwrap_or(Ok(()));
            next.map(|_| RawDaySummary {
                date,
                coordinate,
                timezone: "+00:00".into(),
                temp_min: 280.0,
                temp_max: 290.0,
                temp_afternoon: 288.0,
                temp_night: 281.0,
                temp_evening: 285.0,
                temp_morning: 282.0,
                cloud_cover_afternoon: 0.0,
                humidity_afternoon: 50.0,
                precipitation_total: 0.0,
                pressure_afternoon: 1013.0,
                wind_speed_max: 3.0,
                wind_direction_max: 90.0,
            })
        }
    }

    fn fetcher(provider: Arc<Scripted>) -> UpstreamFetcher {
        UpstreamFetcher::new(provider, Arc::new(RateLimiter::default()), RetryConfig::default())
    }

    fn args() -> (Coordinate, NaiveDate) {
        (
            Coordinate::new(1.0, 2.0).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        )
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.delay_for_retry(0), Duration::from_millis(200));
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new(10, 100, 1000);

        assert_eq!(config.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_retry(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_retry(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_retry(4), Duration::from_millis(1000));
        assert_eq!(config.delay_for_retry(63), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let provider = Scripted::new(vec![
            Err(FetchError::Transient("502".into())),
            Err(FetchError::RateLimited("429".into())),
        ]);
        let (coord, date) = args();

        let day = fetcher(provider.clone()).fetch_day(coord, date).await.unwrap();
        assert_eq!(day.date, date);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let provider = Scripted::new(vec![
            Err(FetchError::Transient("1".into())),
            Err(FetchError::Transient("2".into())),
            Err(FetchError::Transient("3".into())),
            Err(FetchError::Transient("4".into())),
        ]);
        let (coord, date) = args();

        let err = fetcher(provider.clone()).fetch_day(coord, date).await.unwrap_err();
        assert_eq!(err, FetchError::Transient("3".into()));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_are_not_retried() {
        let provider = Scripted::new(vec![Err(FetchError::NotFound("gone".into()))]);
        let (coord, date) = args();

        let err = fetcher(provider.clone()).fetch_day(coord, date).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(_)));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_attempt_goes_through_the_limiter() {
        let provider = Scripted::new(vec![Err(FetchError::Transient("once".into()))]);
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(10)));
        let fetcher = UpstreamFetcher::new(provider.clone(), limiter, RetryConfig::new(3, 1, 1));
        let (coord, date) = args();

        let start = tokio::time::Instant::now();
        fetcher.fetch_day(coord, date).await.unwrap();

        // second attempt had to wait for the next window
        assert!(tokio::time::Instant::now() - start >= Duration::from_secs(10));
        assert_eq!(provider.calls(), 2);
    }
}
