//! Tests for the HTTP-backed tunnel API against a mock host

use std::sync::Arc;
use std::time::Duration;
use tunnel_proxy::readiness::{AppState, HttpTunnelApi, TunnelApi};
use tunnel_proxy::{Credential, TunnelEndpoint};
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATUS_PATH: &str = "/AppServiceTunnel/Tunnel.ashx";

fn credential() -> Credential {
    Credential::new("$myapp", "publish-secret")
}

fn api_for(server: &MockServer, app_url: &str) -> HttpTunnelApi {
    let endpoint = TunnelEndpoint::insecure(
        server.address().to_string(),
        Url::parse(app_url).unwrap(),
    );
    HttpTunnelApi::new(Arc::new(endpoint), Arc::new(credential()), "tunnel-proxy-test").unwrap()
}

#[tokio::test]
async fn test_status_query_is_authenticated_and_parsed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .and(query_param("GetStatus", ""))
        .and(query_param("GetStatusAPIVer", "2"))
        .and(header("authorization", credential().basic_auth_header().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"{"port":2222,"canReachPort":true,"state":"STARTED","msg":"Success"}"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server, &server.uri());
    let status = api.tunnel_status().await.unwrap();

    assert_eq!(status.port, 2222);
    assert!(status.can_reach_port);
    assert_eq!(status.state, AppState::Started);
    assert_eq!(status.message, "Success");
}

#[tokio::test]
async fn test_status_error_response_is_status_query_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let err = api_for(&server, &server.uri()).tunnel_status().await.unwrap_err();
    assert_eq!(err.kind(), "status_query");
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_unparsable_status_body_is_status_query_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(STATUS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>starting</html>"))
        .mount(&server)
        .await;

    let err = api_for(&server, &server.uri()).tunnel_status().await.unwrap_err();
    assert_eq!(err.kind(), "status_query");
}

#[tokio::test]
async fn test_ping_reports_error_status_codes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let app_url = format!("{}/", server.uri());
    let code = api_for(&server, &app_url).ping_app().await.unwrap();
    assert_eq!(code, 503);
}

#[tokio::test]
async fn test_ping_waits_for_a_slow_wake_up() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(31)))
        .expect(1)
        .mount(&server)
        .await;

    let app_url = format!("{}/", server.uri());
    let code = api_for(&server, &app_url).ping_app().await.unwrap();
    assert_eq!(code, 200);
}

#[tokio::test]
async fn test_ping_does_not_send_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app_url = format!("{}/", server.uri());
    api_for(&server, &app_url).ping_app().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn test_ping_transport_failure_is_transport_error() {
    let server = MockServer::start().await;
    // Nothing listens on the discard port.
    let err = api_for(&server, "http://127.0.0.1:9/")
        .ping_app()
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport");
}
