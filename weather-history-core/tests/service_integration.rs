//! End-to-end tests: WeatherService over a mocked OpenWeather upstream and an
//! on-disk SQLite cache.

use std::sync::Arc;

use chrono::NaiveDate;
use weather_history_core::provider::openweather::OpenWeatherProvider;
use weather_history_core::{
    Config, Coordinate, DateRange, FetchErrorKind, LocationSpec, ProviderId, RetryConfig, Season,
    SqliteRepository, Upstream, WeatherRepository, WeatherService,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn day_summary(date: &str, temp_max: f64) -> serde_json::Value {
    serde_json::json!({
        "lat": 40.7128, "lon": -74.006, "tz": "-05:00", "date": date, "units": "standard",
        "cloud_cover": {"afternoon": 75.0},
        "humidity": {"afternoon": 64.0},
        "precipitation": {"total": 60.0},
        "temperature": {"min": 260.0, "max": temp_max, "afternoon": 268.0,
                        "night": 261.0, "evening": 265.0, "morning": 262.0},
        "pressure": {"afternoon": 1021.0},
        "wind": {"max": {"speed": 8.2, "direction": 250.0}}
    })
}

fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn new_york() -> Coordinate {
    Coordinate::new(40.7128, -74.006).unwrap()
}

async fn mount_day(server: &MockServer, date: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/data/3.0/onecall/day_summary"))
        .and(query_param("date", date))
        .respond_with(ResponseTemplate::new(200).set_body_json(day_summary(date, 270.0)))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn service(server: &MockServer, repository: Arc<dyn WeatherRepository>) -> WeatherService {
    let provider =
        Arc::new(OpenWeatherProvider::with_base_url("KEY".into(), &server.uri()).unwrap());
    let upstream = Upstream {
        id: ProviderId::OpenWeather,
        weather: provider.clone(),
        geocoder: provider,
    };

    let config = Config {
        retry: RetryConfig::new(2, 1, 1),
        ..Config::default()
    };
    WeatherService::from_config(&config, upstream, repository)
}

#[tokio::test]
async fn test_second_request_is_served_from_disk() {
    let mock_server = MockServer::start().await;
    for date in ["2024-01-01", "2024-01-02", "2024-01-03"] {
        mount_day(&mock_server, date, 1).await;
    }

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache").join("weather.sqlite");
    let range = DateRange::new(jan(1), jan(3)).unwrap();

    let first = {
        let repository = Arc::new(SqliteRepository::open(&db).unwrap());
        service(&mock_server, repository)
            .get_enriched_range(LocationSpec::Coordinate(new_york()), range)
            .await
            .unwrap()
    };

    assert_eq!(first.weather_data.len(), 3);
    assert!(first.errors.is_empty());
    let day = &first.weather_data[0];
    assert_eq!(day.season, Season::Winter);
    assert!(day.extreme_temperature);
    assert!(day.extreme_precipitation);
    assert!(!day.extreme_wind);
    assert_eq!(day.temp_range, 10.0);

    // fresh handle on the same file: everything comes from the cache
    let repository = Arc::new(SqliteRepository::open(&db).unwrap());
    let second = service(&mock_server, repository)
        .get_enriched_range(LocationSpec::Coordinate(new_york()), range)
        .await
        .unwrap();

    assert_eq!(second.weather_data, first.weather_data);
    // expect(1) on each mock is verified when the server drops
}

#[tokio::test]
async fn test_partial_failure_reports_the_failed_day() {
    let mock_server = MockServer::start().await;
    mount_day(&mock_server, "2024-01-01", 1).await;
    mount_day(&mock_server, "2024-01-03", 1).await;

    Mock::given(method("GET"))
        .and(path("/data/3.0/onecall/day_summary"))
        .and(query_param("date", "2024-01-02"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&mock_server)
        .await;

    let repository = Arc::new(SqliteRepository::in_memory().unwrap());
    let response = service(&mock_server, repository.clone())
        .get_enriched_range(
            LocationSpec::Coordinate(new_york()),
            DateRange::new(jan(1), jan(3)).unwrap(),
        )
        .await
        .unwrap();

    let dates: Vec<_> = response.weather_data.iter().map(|d| d.raw.date).collect();
    assert_eq!(dates, vec![jan(1), jan(3)]);
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].date, jan(2));
    assert_eq!(response.errors[0].kind, FetchErrorKind::Transient);
    assert_eq!(repository.count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_location_name_goes_through_geocoding() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/geo/1.0/direct"))
        .and(query_param("q", "New York"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"name": "New York", "lat": 40.7128, "lon": -74.006, "country": "US",
             "state": "New York"}
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;
    mount_day(&mock_server, "2024-01-05", 1).await;

    let repository = Arc::new(SqliteRepository::in_memory().unwrap());
    let response = service(&mock_server, repository)
        .get_enriched_range(LocationSpec::Name("New York".into()), DateRange::single(jan(5)))
        .await
        .unwrap();

    assert_eq!(response.geocoding_results.len(), 1);
    assert_eq!(response.geocoding_results[0].display_name, "New York, New York, US");
    assert_eq!(response.weather_data.len(), 1);
    assert_eq!(response.weather_data[0].raw.coordinate, new_york());
}
