// Tests for WeatherFetcher against a mocked archive API

mod common;

use std::time::{Duration, Instant};

use common::{api_config, archive_body, hour, range, ARCHIVE_PATH};
use mockito::{Matcher, Server};
use outlet_weather_ingest::config::WeatherApiConfig;
use outlet_weather_ingest::db::Location;
use outlet_weather_ingest::fetch_error::FetchError;
use outlet_weather_ingest::fetcher::{is_hourly_sequence, LocationStatus, WeatherFetcher};

fn fetcher(config: &WeatherApiConfig) -> WeatherFetcher {
    WeatherFetcher::new(config).expect("Failed to build fetcher")
}

fn location(outlet_id: i64, latitude: f64, longitude: f64) -> Location {
    Location {
        outlet_id,
        latitude,
        longitude,
    }
}

fn latitude_is(value: &str) -> Matcher {
    Matcher::UrlEncoded("latitude".into(), value.into())
}

#[tokio::test]
async fn test_fetch_one_sends_expected_query() {
    let mut server = Server::new_async().await;
    let days = range(1, 1);

    let mock = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("latitude".into(), "40.7128".into()),
            Matcher::UrlEncoded("longitude".into(), "-74.006".into()),
            Matcher::UrlEncoded("start_date".into(), "2023-01-01".into()),
            Matcher::UrlEncoded("end_date".into(), "2023-01-01".into()),
            Matcher::UrlEncoded(
                "hourly".into(),
                "temperature_2m,relative_humidity_2m,wind_speed_10m".into(),
            ),
            Matcher::UrlEncoded("timezone".into(), "UTC".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(archive_body(&days, 2.0))
        .create_async()
        .await;

    let readings = fetcher(&api_config(&server.url()))
        .fetch_one(40.7128, -74.006, &days)
        .await
        .unwrap();

    assert_eq!(readings.len(), 24);
    assert_eq!(readings[0].timestamp, hour(1, 0));
    assert_eq!(readings[23].timestamp, hour(1, 23));
    assert_eq!(readings[0].temperature_celsius, Some(2.0));
    assert_eq!(readings[4].temperature_celsius, Some(3.0));
    assert_eq!(readings[3].relative_humidity_pct, Some(63.0));
    assert_eq!(readings[2].wind_speed_kmh, Some(7.5));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_one_covers_range_inclusively() {
    let mut server = Server::new_async().await;
    let days = range(1, 7);

    let mock = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(archive_body(&days, 0.0))
        .create_async()
        .await;

    let readings = fetcher(&api_config(&server.url()))
        .fetch_one(-33.86, 151.2, &days)
        .await
        .unwrap();

    assert_eq!(readings.len(), 7 * 24);
    assert_eq!(readings.first().unwrap().timestamp, hour(1, 0));
    assert_eq!(readings.last().unwrap().timestamp, hour(7, 23));
    assert!(is_hourly_sequence(&readings));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_one_retries_server_errors() {
    let mut server = Server::new_async().await;
    let days = range(1, 1);

    let failing = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .with_status(500)
        .expect(2)
        .create_async()
        .await;
    let succeeding = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(archive_body(&days, 5.0))
        .expect(1)
        .create_async()
        .await;

    let config = WeatherApiConfig {
        retry_delay: Duration::from_millis(100),
        ..api_config(&server.url())
    };
    let started = Instant::now();
    let readings = fetcher(&config).fetch_one(10.0, 10.0, &days).await.unwrap();

    assert_eq!(readings.len(), 24);
    assert!(
        started.elapsed() >= Duration::from_millis(200),
        "Expected two retry delays, took {:?}",
        started.elapsed()
    );

    failing.assert_async().await;
    succeeding.assert_async().await;
}

#[tokio::test]
async fn test_fetch_one_gives_up_after_configured_attempts() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("upstream overloaded")
        .expect(3)
        .create_async()
        .await;

    let result = fetcher(&api_config(&server.url()))
        .fetch_one(10.0, 10.0, &range(1, 1))
        .await;

    match result {
        Err(FetchError::SourceUnavailable {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            match *last_error {
                FetchError::Status { status, ref body } => {
                    assert_eq!(status, 503);
                    assert!(body.contains("overloaded"));
                }
                other => panic!("Expected Status error, got {other:?}"),
            }
        }
        other => panic!("Expected SourceUnavailable, got {other:?}"),
    }

    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_errors_are_retried_too() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .with_status(429)
        .expect(2)
        .create_async()
        .await;

    let config = WeatherApiConfig {
        retry_attempts: 2,
        ..api_config(&server.url())
    };
    let result = fetcher(&config).fetch_one(10.0, 10.0, &range(1, 1)).await;

    assert!(matches!(
        result,
        Err(FetchError::SourceUnavailable { attempts: 2, .. })
    ));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_invalid_coordinates_never_hit_the_api() {
    let mut server = Server::new_async().await;

    let mock = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let fetcher = fetcher(&api_config(&server.url()));
    let days = range(1, 1);

    assert!(matches!(
        fetcher.fetch_one(90.0001, 0.0, &days).await,
        Err(FetchError::InvalidCoordinates { .. })
    ));
    assert!(matches!(
        fetcher.fetch_one(0.0, 180.0001, &days).await,
        Err(FetchError::InvalidCoordinates { .. })
    ));

    mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_many_skips_unset_and_tolerates_failures() {
    let mut server = Server::new_async().await;
    let days = range(1, 1);

    let ok = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(latitude_is("40.5"))
        .with_status(200)
        .with_body(archive_body(&days, 1.0))
        .expect(1)
        .create_async()
        .await;
    let broken = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(latitude_is("51.5"))
        .with_status(500)
        .expect(3)
        .create_async()
        .await;
    let unset = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(latitude_is("0"))
        .expect(0)
        .create_async()
        .await;

    let locations = vec![
        location(1, 40.5, -74.0),
        location(2, 0.0, 0.0),
        location(3, 51.5, -0.12),
    ];
    let report = fetcher(&api_config(&server.url()))
        .fetch_many(&locations, &days, Duration::ZERO)
        .await;

    assert_eq!(report.observations.len(), 24);
    assert!(report.observations.iter().all(|o| o.outlet_id == 1));
    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(
        report.outcomes[0].status,
        LocationStatus::Fetched { records: 24 }
    );
    assert_eq!(report.outcomes[1].status, LocationStatus::Skipped);
    assert!(matches!(
        report.outcomes[2].status,
        LocationStatus::Failed { .. }
    ));
    assert_eq!(report.failed_locations(), 1);

    ok.assert_async().await;
    broken.assert_async().await;
    unset.assert_async().await;
}

#[tokio::test]
async fn test_fetch_many_total_is_sum_of_locations_in_input_order() {
    let mut server = Server::new_async().await;
    let days = range(1, 2);

    let _mock = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(archive_body(&days, 3.0))
        .expect(2)
        .create_async()
        .await;

    let locations = vec![location(7, 10.0, 20.0), location(3, -10.0, -20.0)];
    let report = fetcher(&api_config(&server.url()))
        .fetch_many(&locations, &days, Duration::ZERO)
        .await;

    assert_eq!(report.observations.len(), 2 * 48);
    assert!(report.observations[..48].iter().all(|o| o.outlet_id == 7));
    assert!(report.observations[48..].iter().all(|o| o.outlet_id == 3));
}

#[tokio::test]
async fn test_fetch_many_empty_results_are_not_errors() {
    let mut server = Server::new_async().await;

    let _mock = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;

    let config = WeatherApiConfig {
        retry_attempts: 1,
        ..api_config(&server.url())
    };
    let fetcher = fetcher(&config);
    let days = range(1, 1);

    let report = fetcher.fetch_many(&[], &days, Duration::ZERO).await;
    assert!(report.observations.is_empty());
    assert!(report.outcomes.is_empty());

    let report = fetcher
        .fetch_many(
            &[location(1, 1.0, 1.0), location(2, 2.0, 2.0)],
            &days,
            Duration::ZERO,
        )
        .await;
    assert!(report.observations.is_empty());
    assert_eq!(report.failed_locations(), 2);
}

#[tokio::test]
async fn test_inter_request_delay_only_between_attempted_fetches() {
    let mut server = Server::new_async().await;
    let days = range(1, 1);

    let _mock = server
        .mock("GET", ARCHIVE_PATH)
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(archive_body(&days, 3.0))
        .create_async()
        .await;

    let fetcher = fetcher(&api_config(&server.url()));
    let delay = Duration::from_millis(300);

    // Two attempted fetches with a skipped location between them: one delay.
    let started = Instant::now();
    let report = fetcher
        .fetch_many(
            &[
                location(1, 1.0, 1.0),
                location(2, 0.0, 0.0),
                location(3, 3.0, 3.0),
            ],
            &days,
            delay,
        )
        .await;
    let elapsed = started.elapsed();
    assert_eq!(report.fetched_locations(), 2);
    assert!(elapsed >= delay, "Expected one delay, took {elapsed:?}");
    assert!(elapsed < delay * 2, "Expected only one delay, took {elapsed:?}");

    // A single location never sleeps.
    let started = Instant::now();
    fetcher
        .fetch_many(&[location(1, 1.0, 1.0)], &days, delay)
        .await;
    assert!(started.elapsed() < delay);
}
