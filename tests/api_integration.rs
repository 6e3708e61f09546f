//! API integration tests.
//!
//! These drive the router with `tower::ServiceExt::oneshot` against simulated
//! devices, so no sockets are opened.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use netgate::api::{AppState, create_router};
use netgate::dispatcher::Dispatcher;
use netgate::session::{RegistrySettings, SessionRegistry, ShellSettings};
use netgate::sim::{SimulatedConnector, SimulatedDevice};
use serde_json::{Value, json};
use tower::ServiceExt;

fn lab() -> SimulatedConnector {
    SimulatedConnector::new()
        .with_device(
            "192.168.1.1",
            SimulatedDevice::cisco_router("Router1")
                .with_credentials("admin", "cisco")
                .with_paging(5),
        )
        .with_device(
            "192.168.1.254",
            SimulatedDevice::cisco_asa("fw1").privileged(),
        )
        .with_device(
            "192.168.1.2",
            SimulatedDevice::cisco_router("Router2").hang_on("show tech-support"),
        )
        .with_device(
            "192.168.1.3",
            SimulatedDevice::cisco_router("Router3").drop_on("reload"),
        )
}

fn app() -> Router {
    let settings = RegistrySettings {
        shell: Arc::new(ShellSettings {
            command_timeout: Duration::from_secs(2),
            login_timeout: Duration::from_secs(2),
            nudge_after: Duration::from_millis(200),
            ..ShellSettings::default()
        }),
        ..RegistrySettings::default()
    };
    let registry = SessionRegistry::new(Arc::new(lab()), settings);
    create_router(AppState::new(Dispatcher::new(Arc::new(registry))))
}

/// Helper to create a JSON request.
fn json_request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    match body {
        Some(json) => builder.body(Body::from(json.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(json_request(method, uri, body))
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn router_device(ip: &str) -> Value {
    json!({
        "name": "Router1",
        "ip_address": ip,
        "device_type": "router",
        "username": "admin",
        "password": "cisco"
    })
}

async fn connect(app: &Router, device: Value) -> u64 {
    let (status, body) = call(
        app,
        Method::POST,
        "/api/connect/network",
        Some(json!({ "device": device })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["connection_id"].as_u64().expect("numeric connection id")
}

// ============================================================================
// Health & Info
// ============================================================================

#[tokio::test]
async fn health_endpoint() {
    let response = app()
        .oneshot(json_request(Method::GET, "/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn api_info_and_schema() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/api", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "netgate");
    assert_eq!(body["status"], "running");

    let (status, body) = call(&app, Method::GET, "/api/schema", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["connect"]["properties"]["device"].is_object());
    assert!(body["send_command"]["properties"]["command"].is_object());
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn connect_command_device_info_disconnect() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/connect/network",
        Some(json!({ "device": router_device("192.168.1.1"), "protocol": "ssh" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    let id = body["connection_id"].as_u64().unwrap();

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/send_command/{id}"),
        Some(json!({ "command": "show version" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["command"], "show version");
    assert_eq!(body["success"], true);
    assert_eq!(body["truncated"], false);
    let output = body["output"].as_str().unwrap();
    assert!(output.contains("Version 12.4(25d)"));
    assert!(!output.contains("--More--"));
    assert!(body["timestamp_ms"].as_u64().unwrap() > 0);

    let (status, body) = call(&app, Method::GET, &format!("/api/device_info/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ios_version"], "12.4(25d)");
    assert_eq!(body["total_interfaces"], 5);
    assert_eq!(body["interfaces_up"], 2);
    assert_eq!(body["device_type"], "router");

    let (status, body) = call(&app, Method::GET, "/api/connections", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["connections"][0]["connection_id"], id);
    assert!(body["connections"][0]["device"].get("password").is_none());

    let (status, body) = call(
        &app,
        Method::GET,
        &format!("/api/connections/{id}/history"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 3);

    let (status, body) = call(&app, Method::POST, &format!("/api/disconnect/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["status"], "disconnected");

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/send_command/{id}"),
        Some(json!({ "command": "show version" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "CONNECTION_NOT_FOUND");

    let (status, _) = call(&app, Method::POST, &format!("/api/disconnect/{id}"), None).await;
    assert_eq!(status, StatusCode::OK, "disconnect is idempotent");
}

#[tokio::test]
async fn firewall_running_config() {
    let app = app();
    let id = connect(
        &app,
        json!({
            "name": "fw1",
            "ip_address": "192.168.1.254",
            "device_type": "firewall",
            "username": "admin",
            "password": "x"
        }),
    )
    .await;

    let (status, body) = call(&app, Method::GET, &format!("/api/running_config/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["config"]["hostname"], "fw1");
    let acl = body["config"]["access_lists"]["OUTSIDE_IN"][0].as_str().unwrap();
    assert!(acl.starts_with("access-list OUTSIDE_IN extended permit tcp"));
    assert_eq!(body["config"]["static_routes"][0]["interface"], "outside");
}

// ============================================================================
// Error mapping
// ============================================================================

#[tokio::test]
async fn wrong_password_is_401() {
    let app = app();
    let mut device = router_device("192.168.1.1");
    device["password"] = json!("wrong");
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/connect/network",
        Some(json!({ "device": device })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "AUTH_FAILED");
}

#[tokio::test]
async fn unreachable_device_is_502() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/connect/network",
        Some(json!({ "device": router_device("10.255.0.1") })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "CONNECT_FAILED");
}

#[tokio::test]
async fn malformed_bodies_are_400() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/connect/network",
        Some(json!({ "device": { "name": "x" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let id = connect(&app, router_device("192.168.1.1")).await;
    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/send_command/{id}"),
        Some(json!({ "command": "show clock\nreload" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_id_is_404() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/api/device_info/999999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "CONNECTION_NOT_FOUND");
}

#[tokio::test]
async fn timeout_is_504_with_partial_output() {
    let app = app();
    let id = connect(&app, router_device("192.168.1.2")).await;
    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/send_command/{id}"),
        Some(json!({ "command": "show tech-support", "timeout_secs": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["code"], "COMMAND_TIMEOUT");
    assert_eq!(body["truncated"], true);
    assert!(body["output"].as_str().unwrap().contains("Collecting data"));

    let (_, body) = call(&app, Method::GET, "/api/connections", None).await;
    assert_eq!(body["count"], 1, "session survives a timeout");
}

#[tokio::test]
async fn dropped_session_is_410_then_404() {
    let app = app();
    let id = connect(&app, router_device("192.168.1.3")).await;
    let uri = format!("/api/send_command/{id}");

    let (status, body) = call(&app, Method::POST, &uri, Some(json!({ "command": "reload" }))).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "SESSION_CLOSED");

    let (status, _) = call(&app, Method::POST, &uri, Some(json!({ "command": "show clock" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
