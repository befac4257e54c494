use apiwatch::db::entities::tracked_api;
use apiwatch::db::enums::ApiStatus;
use apiwatch::monitoring::probe::DeprecationSignal;
use apiwatch::monitoring::{HttpProber, ProbeConfig, ProbeErrorKind, Prober};
use chrono::Utc;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tracked(url: &str, http_method: &str, expected_status: i32) -> tracked_api::Model {
    let now = Utc::now();
    tracked_api::Model {
        id: 7,
        user_id: 1,
        name: "Example".to_string(),
        base_url: url.to_string(),
        documentation_url: None,
        health_check_url: Some(format!("{url}/health")),
        http_method: http_method.to_string(),
        expected_status,
        check_interval_seconds: 300,
        current_status: ApiStatus::Unknown,
        last_checked: None,
        next_check_at: None,
        last_fingerprint: None,
        is_active: true,
        consecutive_failures: 0,
        created_at: now,
        updated_at: now,
    }
}

fn prober(timeout_seconds: u64) -> HttpProber {
    HttpProber::new(&ProbeConfig {
        timeout_seconds,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn healthy_json_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "uptime": 12})))
        .expect(1)
        .mount(&server)
        .await;

    let result = prober(5).probe(&tracked(&server.uri(), "GET", 200)).await;
    assert!(result.success);
    assert_eq!(result.status_code, Some(200));
    assert!(result.error_kind.is_none());
    assert_eq!(result.fingerprint.as_ref().map(String::len), Some(64));
    assert_eq!(result.deprecation, DeprecationSignal::None);
}

#[tokio::test]
async fn value_changes_keep_the_fingerprint() {
    let server = MockServer::start().await;
    Mock::given(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "uptime": 12})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "busy", "uptime": 99})))
        .mount(&server)
        .await;

    let p = prober(5);
    let api = tracked(&server.uri(), "GET", 200);
    let first = p.probe(&api).await;
    let second = p.probe(&api).await;
    assert_eq!(first.fingerprint, second.fingerprint);
}

#[tokio::test]
async fn same_family_status_still_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let result = prober(5).probe(&tracked(&server.uri(), "post", 200)).await;
    assert!(result.success);
    assert_eq!(result.status_code, Some(204));
}

#[tokio::test]
async fn server_error_is_an_unexpected_status() {
    let server = MockServer::start().await;
    Mock::given(path("/health"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let result = prober(5).probe(&tracked(&server.uri(), "GET", 200)).await;
    assert!(!result.success);
    assert_eq!(result.status_code, Some(503));
    assert_eq!(result.error_kind, Some(ProbeErrorKind::UnexpectedStatus));
    assert_eq!(
        result.error_message.as_deref(),
        Some("Expected status 200 but got 503")
    );
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let result = prober(1).probe(&tracked(&server.uri(), "GET", 200)).await;
    assert!(!result.success);
    assert_eq!(result.status_code, None);
    assert_eq!(result.error_kind, Some(ProbeErrorKind::Timeout));
}

#[tokio::test]
async fn refused_connection_is_a_connect_error() {
    let result = prober(2)
        .probe(&tracked("http://127.0.0.1:1", "GET", 200))
        .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ProbeErrorKind::Connect));
    assert!(result.error_message.is_some());
}

#[tokio::test]
async fn unsupported_method_is_a_monitor_error() {
    let result = prober(2)
        .probe(&tracked("http://127.0.0.1:1", "GET /", 200))
        .await;
    assert_eq!(result.error_kind, Some(ProbeErrorKind::Monitor));
    assert!(result.is_monitor_error());
}

#[tokio::test]
async fn deprecation_header_is_reported() {
    let server = MockServer::start().await;
    Mock::given(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Deprecation", "@1735689600")
                .set_body_string("ok"),
        )
        .mount(&server)
        .await;

    let result = prober(5).probe(&tracked(&server.uri(), "GET", 200)).await;
    assert!(result.success);
    assert_eq!(result.deprecation, DeprecationSignal::Deprecated);
}
