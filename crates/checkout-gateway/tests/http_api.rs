//! Integration tests for the gateway HTTP surface
//!
//! Tests the following:
//! - Offer/answer mailboxes (replacement, non-destructive reads, 404 when absent)
//! - ICE candidate lists per role, including the legacy `type` parameter
//! - Barcode read-once delivery and device isolation
//! - Frame relay reads
//! - Session creation, join, status and teardown (410 afterwards)
//! - Validation errors and the catalog endpoint

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use checkout_common::{Catalog, Product};
use checkout_gateway::{router, AppState, GatewayConfig, MemoryStore, SharedStore};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn catalog() -> Catalog {
    Catalog::new(vec![
        Product {
            id: "1".to_string(),
            barcode: "8801234567890".to_string(),
            name: "Sparkling Water".to_string(),
            price: 1200.0,
            image: None,
        },
        Product {
            id: "2".to_string(),
            barcode: "8809876543210".to_string(),
            name: "Rice Crackers".to_string(),
            price: 2500.0,
            image: Some("/images/crackers.png".to_string()),
        },
    ])
    .unwrap()
}

fn app_with(config: GatewayConfig) -> Router {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let state = AppState::new(&config, store, catalog()).unwrap();
    router(state, &config)
}

fn app() -> Router {
    app_with(GatewayConfig::default())
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    call(app, Method::GET, uri, None).await
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    call(app, Method::POST, uri, Some(body)).await
}

#[tokio::test]
async fn test_offer_absent_returns_404() {
    let app = app();
    let (status, body) = get(&app, "/signal/offer?sessionId=device_abc").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_offer_answer_round_trip() {
    let app = app();
    let (status, body) = post(
        &app,
        "/signal/offer",
        json!({"sessionId": "device_123", "offer": {"type": "offer", "sdp": "v=0 kiosk"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    let (status, body) = get(&app, "/signal/offer?sessionId=device_123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["offer"]["sdp"], "v=0 kiosk");

    post(
        &app,
        "/signal/answer",
        json!({"sessionId": "device_123", "answer": {"type": "answer", "sdp": "v=0 phone"}}),
    )
    .await;
    for _ in 0..2 {
        let (status, body) = get(&app, "/signal/answer?sessionId=device_123").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["answer"], json!({"type": "answer", "sdp": "v=0 phone"}));
    }
}

#[tokio::test]
async fn test_second_offer_replaces_first() {
    let app = app();
    for sdp in ["v=0 one", "v=0 two"] {
        post(
            &app,
            "/signal/offer",
            json!({"sessionId": "device_1", "offer": {"type": "offer", "sdp": sdp}}),
        )
        .await;
    }
    let (_, body) = get(&app, "/signal/offer?sessionId=device_1").await;
    assert_eq!(body["offer"]["sdp"], "v=0 two");
}

#[tokio::test]
async fn test_ice_lists_by_role() {
    let app = app();
    let (_, body) = get(&app, "/signal/ice?sessionId=device_1&role=phone").await;
    assert_eq!(body, json!({"candidates": []}));

    for n in 0..3 {
        let (status, _) = post(
            &app,
            "/signal/ice",
            json!({
                "sessionId": "device_1",
                "role": "web",
                "candidate": {"candidate": format!("candidate:{n}"), "sdpMid": "0", "sdpMLineIndex": 0}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    // Legacy field name for the role.
    post(
        &app,
        "/signal/ice",
        json!({"deviceId": "device_1", "type": "phone", "candidate": {"candidate": "candidate:p"}}),
    )
    .await;

    let (status, body) = get(&app, "/signal/ice?sessionId=device_1&role=web").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["candidates"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["candidate"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["candidate:0", "candidate:1", "candidate:2"]);

    let (_, body) = get(&app, "/signal/ice?sessionId=device_1&type=phone").await;
    assert_eq!(body["candidates"][0]["candidate"], "candidate:p");
}

#[tokio::test]
async fn test_barcode_consumed_once_and_isolated() {
    let app = app();
    let (status, _) = post(
        &app,
        "/relay/barcode",
        json!({"deviceId": "device_123", "barcode": "8801234567890"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(&app, "/relay/barcode?deviceId=device_999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(&app, "/relay/barcode?deviceId=device_123").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["barcode"], "8801234567890");

    let (status, _) = get(&app, "/relay/barcode?deviceId=device_123").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_frame_reads_repeat_until_replaced() {
    let app = app();
    post(
        &app,
        "/relay/frame",
        json!({"deviceId": "device_1", "imageData": "data:image/jpeg;base64,AAAA"}),
    )
    .await;
    for _ in 0..2 {
        let (status, body) = get(&app, "/relay/frame?deviceId=device_1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["imageData"], "data:image/jpeg;base64,AAAA");
    }
}

#[tokio::test]
async fn test_frame_expires() {
    let mut config = GatewayConfig::default();
    config.ttl.frame = Duration::from_millis(50);
    let app = app_with(config);
    post(
        &app,
        "/relay/frame",
        json!({"deviceId": "device_1", "imageData": "data:image/jpeg;base64,AAAA"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let (status, _) = get(&app, "/relay/frame?deviceId=device_1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_fields_are_bad_requests() {
    let app = app();
    let cases = [
        ("/signal/offer", json!({"sessionId": "device_1"})),
        ("/signal/offer", json!({"offer": {"type": "offer", "sdp": "v=0"}})),
        ("/signal/answer", json!({"sessionId": "device_1", "answer": {"type": "offer", "sdp": "v=0"}})),
        ("/signal/ice", json!({"sessionId": "device_1", "candidate": {"candidate": "c"}})),
        ("/relay/barcode", json!({"deviceId": "device_1"})),
        ("/relay/frame", json!({"deviceId": "device_1", "imageData": ""})),
        ("/session/connect", json!({"deviceId": "device_1"})),
    ];
    for (uri, body) in cases {
        let (status, resp) = post(&app, uri, body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(resp["error"].is_string(), "{uri}");
    }

    let (status, _) = get(&app, "/signal/ice?sessionId=device_1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&app, "/signal/ice?sessionId=device_1&role=tablet").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = get(&app, "/signal/offer").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/signal/offer")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let app = app();
    let (status, session) = call(&app, Method::POST, "/session", None).await;
    assert_eq!(status, StatusCode::OK);
    let session_id = session["sessionId"].as_str().unwrap().to_string();
    assert!(session["joinUrl"]
        .as_str()
        .unwrap()
        .ends_with(&format!("/phone-scan?deviceId={session_id}")));
    assert!(session["qrSvg"].as_str().unwrap().contains("<svg"));

    let (_, status_body) = get(&app, &format!("/session/status?sessionId={session_id}")).await;
    assert_eq!(status_body, json!({"phoneJoined": false, "closed": false, "signaling": "idle"}));

    let (status, body) = post(
        &app,
        "/session/connect",
        json!({"deviceId": session_id, "phoneId": "phone_1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    post(
        &app,
        "/signal/offer",
        json!({"sessionId": session_id, "offer": {"type": "offer", "sdp": "v=0"}}),
    )
    .await;

    let (_, status_body) = get(&app, &format!("/session/status?sessionId={session_id}")).await;
    assert_eq!(status_body["phoneJoined"], true);
    assert_eq!(status_body["signaling"], "offerPublished");

    let (status, _) = call(
        &app,
        Method::DELETE,
        &format!("/session?sessionId={session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(&app, &format!("/signal/offer?sessionId={session_id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post(
        &app,
        "/relay/frame",
        json!({"deviceId": session_id, "imageData": "data:image/jpeg;base64,AAAA"}),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);

    let (_, status_body) = get(&app, &format!("/session/status?sessionId={session_id}")).await;
    assert_eq!(status_body["closed"], true);
}

#[tokio::test]
async fn test_products_lookup() {
    let app = app();
    let (status, body) = get(&app, "/products?barcode=8801234567890").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["product"]["name"], "Sparkling Water");

    let (status, _) = get(&app, "/products?barcode=0000").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = get(&app, "/products").await;
    assert_eq!(body["products"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_detect_without_detector_is_bad_gateway() {
    let config = GatewayConfig {
        detector_url: "http://127.0.0.1:9/api/yolo/detect".to_string(),
        ..GatewayConfig::default()
    };
    let app = app_with(config);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/detect")
        .header("content-type", "image/jpeg")
        .body(Body::from(vec![0xffu8, 0xd8, 0xff]))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let config = GatewayConfig {
        rate_limit: 2,
        ..GatewayConfig::default()
    };
    let app = app_with(config);
    let mut statuses = Vec::new();
    for _ in 0..3 {
        let (status, _) = get(&app, "/relay/frame?deviceId=device_1").await;
        statuses.push(status);
    }
    assert_eq!(
        statuses,
        vec![StatusCode::NOT_FOUND, StatusCode::NOT_FOUND, StatusCode::TOO_MANY_REQUESTS]
    );

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn test_prometheus_counts_relay_traffic() {
    let app = app();
    post(
        &app,
        "/relay/barcode",
        json!({"deviceId": "device_1", "barcode": "8801234567890"}),
    )
    .await;
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics/prometheus").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("checkout_gateway_barcodes_published_total 1"));
}
