//! HTTP gateway tests against a mock Pulse API
//!
//! These validate request shape and outcome classification:
//! - Identification headers and camelCase body
//! - API status mapping
//! - HTTP error statuses, including non-standard codes
//! - Malformed bodies and timeouts

use pulu_cli::api::{ApiGateway, HttpApiGateway};
use pulu_cli::config::{ApiConfig, HeaderConfig};
use pulu_cli::records::{DiscardRecord, HoldRecord, Record};
use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn api_config(server: &MockServer) -> ApiConfig {
    ApiConfig {
        base_url: server.uri(),
        hold_endpoint: "/api/v1/holds/clear".to_string(),
        discard_endpoint: "/api/v1/discard-fates/clear".to_string(),
        timeout_secs: 1,
        headers: HeaderConfig {
            user_id: "batch-user".to_string(),
            app_name: "PULU01".to_string(),
            environment: "Test".to_string(),
        },
    }
}

fn hold() -> Record {
    let placed = chrono::NaiveDate::from_ymd_opt(2024, 8, 13)
        .unwrap()
        .and_hms_milli_opt(14, 27, 24, 591)
        .unwrap();
    HoldRecord::new("G0956250001234A", "PROD", "H01", Some(placed)).into()
}

async fn mount_hold_response(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/api/v1/holds/clear"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_cleared_hold_is_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/holds/clear"))
        .and(header("X-UserId", "batch-user"))
        .and(header("X-AppName", "PULU01"))
        .and(header("X-Environment", "Test"))
        .and(header("Accept", "application/json"))
        .and(body_partial_json(json!({
            "unitNumber": "G0956250001234A",
            "productCode": "PROD",
            "holdCode": "H01",
            "clearCode": "RD",
            "programId": "PULS11",
            "dateTimePlaced": "2024-08-13T14:27:24.591",
            "clearType": "Direct",
            "clearConstituents": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Cleared" })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpApiGateway::new(&api_config(&server)).unwrap();
    let result = gateway.submit(&hold(), "RD").await;

    assert!(result.is_success(), "unexpected failure: {:?}", result.error_message());
}

#[tokio::test]
async fn test_non_cleared_status_is_failure_with_api_message() {
    let server = MockServer::start().await;
    mount_hold_response(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "status": "IgnoredAlreadyCleared",
            "errorMessage": "Hold already cleared",
            "errorNumber": 2001
        })),
    )
    .await;

    let gateway = HttpApiGateway::new(&api_config(&server)).unwrap();
    let result = gateway.submit(&hold(), "RD").await;

    assert!(!result.is_success());
    assert_eq!(result.error_message(), Some("Hold already cleared"));
}

#[tokio::test]
async fn test_error_status_without_message_uses_fallback() {
    let server = MockServer::start().await;
    mount_hold_response(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({ "status": "NotClearedIndirectHoldDoesNotExist" })),
    )
    .await;

    let gateway = HttpApiGateway::new(&api_config(&server)).unwrap();
    let result = gateway.submit(&hold(), "RD").await;

    assert_eq!(
        result.error_message(),
        Some("Not cleared: indirect hold does not exist")
    );
}

#[tokio::test]
async fn test_http_error_includes_code_reason_and_body() {
    let server = MockServer::start().await;
    mount_hold_response(&server, ResponseTemplate::new(500).set_body_string("boom")).await;

    let gateway = HttpApiGateway::new(&api_config(&server)).unwrap();
    let result = gateway.submit(&hold(), "RD").await;

    assert_eq!(result.error_message(), Some("HTTP 500 Internal Server Error: boom"));
}

#[tokio::test]
async fn test_non_standard_status_code_is_tolerated() {
    let server = MockServer::start().await;
    mount_hold_response(&server, ResponseTemplate::new(499).set_body_string("client went away")).await;

    let gateway = HttpApiGateway::new(&api_config(&server)).unwrap();
    let result = gateway.submit(&hold(), "RD").await;

    let message = result.error_message().unwrap();
    assert!(message.starts_with("HTTP 499 "), "got: {message}");
    assert!(message.ends_with(": client went away"));
}

#[tokio::test]
async fn test_undecodable_body_is_deserialization_error() {
    let server = MockServer::start().await;
    mount_hold_response(&server, ResponseTemplate::new(200).set_body_string("<html>ok</html>")).await;

    let gateway = HttpApiGateway::new(&api_config(&server)).unwrap();
    let result = gateway.submit(&hold(), "RD").await;

    assert!(result
        .error_message()
        .unwrap()
        .starts_with("Deserialization error:"));
}

#[tokio::test]
async fn test_slow_response_is_timeout() {
    let server = MockServer::start().await;
    mount_hold_response(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "status": "Cleared" }))
            .set_delay(std::time::Duration::from_secs(3)),
    )
    .await;

    let gateway = HttpApiGateway::new(&api_config(&server)).unwrap();
    let result = gateway.submit(&hold(), "RD").await;

    assert_eq!(result.error_message(), Some("Request timeout"));
}

#[tokio::test]
async fn test_discard_goes_to_discard_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/discard-fates/clear"))
        .and(body_partial_json(json!({
            "unitNumber": "U100",
            "productCode": "E0791",
            "locationCode": "LAB1",
            "clearCode": "DF"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "Cleared" })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = HttpApiGateway::new(&api_config(&server)).unwrap();
    let record: Record = DiscardRecord::new("U100", "E0791", "LAB1").into();
    let result = gateway.submit(&record, "DF").await;

    assert!(result.is_success());
}
