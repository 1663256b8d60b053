//! Integration tests for the live weather fetch.
//!
//! These tests use wiremock to simulate the forecast provider and verify the
//! strict full-horizon contract and error handling of the live path.

use chrono::{Duration, TimeZone};
use chrono_tz::America::New_York;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};
use zonecast::{ForecastApiClient, config::NetworkConfig};

fn network_config() -> NetworkConfig {
    NetworkConfig {
        request_timeout_secs: 10,
        connect_timeout_secs: 5,
    }
}

fn start_hour() -> chrono::DateTime<chrono_tz::Tz> {
    New_York.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()
}

/// Build a provider response with `count` hourly points beginning `lead`
/// hours before the forecast start.
fn provider_body(count: usize, lead: i64) -> serde_json::Value {
    let first = start_hour() - Duration::hours(lead);
    let times: Vec<String> = (0..count)
        .map(|i| {
            (first + Duration::hours(i as i64))
                .format("%Y-%m-%dT%H:%M")
                .to_string()
        })
        .collect();

    json!({
        "hourly": {
            "time": times,
            "temperature_2m": vec![4.5; count],
            "relative_humidity_2m": vec![62.0; count],
            "precipitation": vec![0.0; count],
            "wind_speed_10m": vec![11.0; count],
        }
    })
}

/// Test a successful fetch covering the full horizon.
#[tokio::test]
async fn test_fetch_hourly_success() {
    let mock_server = MockServer::start().await;

    // Three forecast days starting a few hours before the horizon start
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("timezone", "America/New_York"))
        .and(query_param("forecast_days", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(provider_body(72, 6)))
        .mount(&mock_server)
        .await;

    let client = ForecastApiClient::new(mock_server.uri(), &network_config())
        .expect("Client creation should succeed");

    let points = client
        .fetch_hourly(40.7128, -74.0060, start_hour(), 48)
        .await
        .expect("Fetch should succeed");

    assert_eq!(points.len(), 48);
    assert_eq!(points[0].hour, start_hour());
    assert_eq!(points[47].hour, start_hour() + Duration::hours(47));
    assert_eq!(points[0].temperature, 4.5);
}

/// Test that a response covering fewer hours than the horizon fails.
#[tokio::test]
async fn test_fetch_hourly_short_response_fails() {
    let mock_server = MockServer::start().await;

    // Only 40 points at or after the start, 48 requested
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(provider_body(40, 0)))
        .mount(&mock_server)
        .await;

    let client = ForecastApiClient::new(mock_server.uri(), &network_config()).unwrap();
    let result = client.fetch_hourly(40.7128, -74.0060, start_hour(), 48).await;

    assert!(result.is_err(), "Short response must not produce a partial forecast");
    let err = result.unwrap_err();
    assert!(
        err.to_string().contains("expected 48"),
        "Error should state the shortfall: {err}"
    );
}

/// Test handling of HTTP 500 errors.
#[tokio::test]
async fn test_fetch_hourly_server_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let client = ForecastApiClient::new(mock_server.uri(), &network_config()).unwrap();
    let result = client.fetch_hourly(40.7128, -74.0060, start_hour(), 48).await;

    assert!(result.is_err(), "Should fail on 500 error");
    let err = result.unwrap_err();
    assert!(
        err.to_string().contains("500"),
        "Error should mention status code"
    );
}

/// Test handling of a malformed (non-JSON) payload.
#[tokio::test]
async fn test_fetch_hourly_malformed_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&mock_server)
        .await;

    let client = ForecastApiClient::new(mock_server.uri(), &network_config()).unwrap();
    let result = client.fetch_hourly(40.7128, -74.0060, start_hour(), 48).await;

    assert!(result.is_err(), "Should fail on malformed payload");
}

/// Test handling of a response missing the hourly block.
#[tokio::test]
async fn test_fetch_hourly_missing_hourly_block() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"latitude": 40.7})))
        .mount(&mock_server)
        .await;

    let client = ForecastApiClient::new(mock_server.uri(), &network_config()).unwrap();
    let result = client.fetch_hourly(40.7128, -74.0060, start_hour(), 48).await;

    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("hourly"));
}
