//! HTTP surface tests driven through the router without a socket

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{harness, FROM, TO};
use launcher::endpoints::build_router;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, value)
}

#[tokio::test]
async fn test_create_then_get_by_item() {
    let h = harness().await;
    let router = build_router(h.coordinator.clone(), true);

    let (status, body) = call(
        &router,
        "POST",
        "/v1/create",
        Some(json!({"from": FROM, "to": TO, "value": "1.5", "gasPrice": "20", "itemId": "9", "itemType": "bonus"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "REQUEST_SUCCESSFUL");
    assert_eq!(body["message"], "");
    assert!(body["id"].is_u64());

    let (status, body) = call(
        &router,
        "POST",
        "/v1/get",
        Some(json!({"itemType": "bonus", "itemId": "9"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["status"], "CREATED");
    assert_eq!(data[0]["gasPrice"], "20");
    assert_eq!(data[0]["itemType"], "bonus");
    assert_eq!(data[0]["hash"], "");
}

#[tokio::test]
async fn test_error_codes() {
    let h = harness().await;
    let router = build_router(h.coordinator.clone(), true);

    let (status, body) = call(
        &router,
        "POST",
        "/v1/create",
        Some(json!({"from": "0x12", "to": TO, "itemId": "1", "itemType": "t"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], "REQUEST_FAILED");
    assert_eq!(body["kind"], "InvalidArgument");

    let (status, body) = call(&router, "POST", "/v1/get", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InvalidArgument");

    let (status, body) = call(
        &router,
        "POST",
        "/v1/notify",
        Some(json!({"hash": "0x99", "status": "SUCCESSFUL"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFound");

    let (status, body) = call(&router, "POST", "/v1/create", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InvalidArgument");
}

#[tokio::test]
async fn test_notify_transitions_and_conflicts() {
    let h = harness().await;
    let log = h
        .coordinator
        .create(common::request("1", "1"))
        .await
        .unwrap();
    h.coordinator
        .record_dispatch(log.id, "0xc0ffee".into(), 3)
        .await
        .unwrap();
    let router = build_router(h.coordinator.clone(), true);

    let (status, body) = call(
        &router,
        "POST",
        "/v1/notify",
        Some(json!({"hash": "0xc0ffee", "status": "SUCCESSFUL"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, body) = call(
        &router,
        "POST",
        "/v1/notify",
        Some(json!({"hash": "0xc0ffee", "status": "FAILED"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "InvalidTransition");

    let (_, body) = call(&router, "POST", "/v1/get", Some(json!({"hash": "0xc0ffee"}))).await;
    assert_eq!(body["data"][0]["status"], "SUCCESSFUL");
}

#[tokio::test]
async fn test_hello_subscribe_and_metrics() {
    let h = harness().await;
    let router = build_router(h.coordinator.clone(), true);

    let (status, body) = call(&router, "GET", "/v1/hello", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));

    let (status, body) = call(&router, "GET", "/v1/subscribe", None).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert_eq!(body["kind"], "NotImplemented");

    let (status, body) = call(&router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("launcher_requests_total"));
}

#[tokio::test]
async fn test_metrics_route_can_be_disabled() {
    let h = harness().await;
    let router = build_router(h.coordinator.clone(), false);
    let (status, _) = call(&router, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
