//! HTTP surface over the in-memory sync stack

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use stampsync_core::auth::{pass_auth_token, sign_payload, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use stampsync_core::clock::Clock;
use stampsync_core::memory::{sample_design, MemoryHarness, TEST_ISSUER};
use stampsync_core::types::Platform;
use tower::ServiceExt;

use super::app;
use crate::state::{AppState, AuthConfig};

const INTERNAL_TOKEN: &str = "internal-secret";
const PASS_SECRET: &str = "pass-secret";
const PASS_TYPE: &str = "pass.com.stampsync.loyalty";

fn auth(callback_secret: Option<&str>) -> AuthConfig {
    AuthConfig {
        internal_token: Some(INTERNAL_TOKEN.to_string()),
        callback_secret: callback_secret.map(str::to_string),
        pass_auth_secret: Some(PASS_SECRET.to_string()),
        pass_type_id: PASS_TYPE.to_string(),
    }
}

fn seeded(callback_secret: Option<&str>) -> (MemoryHarness, Router) {
    let h = MemoryHarness::new();
    h.store.seed_business("biz_1", "Bean There");
    h.store.seed_customer("cus_1", "biz_1", 0);
    h.store.seed_design(sample_design("des_1", "biz_1", 3));
    let router = app(AppState {
        sync: h.sync.clone(),
        auth: Arc::new(auth(callback_secret)),
    });
    (h, router)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn internal(method: &str, uri: &str, body: Option<&Value>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", INTERNAL_TOKEN))
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap()
}

fn device_request(method: &str, serial: &str, token: &str, body: Option<&Value>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(format!(
            "/v1/devices/dev_1/registrations/{}/{}",
            PASS_TYPE, serial
        ))
        .header("authorization", format!("ApplePass {}", token))
        .header("content-type", "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap()
}

fn save_callback(nonce: &str) -> Value {
    json!({
        "eventType": "save",
        "objectId": format!("{}.cus_1", TEST_ISSUER),
        "classId": format!("{}.biz_1", TEST_ISSUER),
        "nonce": nonce,
        "expTimeMillis": 1_900_000_000_000i64,
    })
}

// ============================================================
// Health
// ============================================================

#[tokio::test]
async fn test_health_and_ready() {
    let (_h, router) = seeded(None);
    let (status, body) = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = send(&router, Request::get("/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let (_h, router) = seeded(None);
    let response = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("stampsync_sync_total"), "got {}", text);
    assert!(text.contains("stampsync_http_responses_total"));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let (_h, router) = seeded(None);
    let response = router
        .oneshot(
            Request::post("/internal/designs/des_1/created")
                .header("x-request-id", "req_from_caller")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-request-id"], "req_from_caller");
    let body = to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["request_id"], "req_from_caller");
}

// ============================================================
// Google callbacks
// ============================================================

#[tokio::test]
async fn test_save_callback_registers_once() {
    let (h, router) = seeded(None);

    let (status, body) = send(&router, post_json("/v1/google/callback", &save_callback("n1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["action"], "register");

    let (status, body) = send(&router, post_json("/v1/google/callback", &save_callback("n1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "duplicate");

    let registrations = h.store.registrations();
    assert_eq!(registrations.len(), 1, "replayed nonce must not register twice");
    assert_eq!(registrations[0].platform, Platform::Google);
}

#[tokio::test]
async fn test_del_callback_unregisters() {
    let (h, router) = seeded(None);
    send(&router, post_json("/v1/google/callback", &save_callback("n1"))).await;

    let mut del = save_callback("n2");
    del["eventType"] = json!("del");
    let (status, body) = send(&router, post_json("/v1/google/callback", &del)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "unregister");
    assert!(h.store.registrations().is_empty());
}

#[tokio::test]
async fn test_callback_without_nonce_is_ignored() {
    let (h, router) = seeded(None);
    let mut payload = save_callback("n1");
    payload.as_object_mut().unwrap().remove("nonce");

    let (status, body) = send(&router, post_json("/v1/google/callback", &payload)).await;
    assert_eq!(status, StatusCode::OK, "never ask the provider to retry");
    assert_eq!(body["status"], "ignored");
    assert_eq!(h.store.nonce_count(), 0);
}

#[tokio::test]
async fn test_callback_for_unknown_customer_is_ignored() {
    let (h, router) = seeded(None);
    let mut payload = save_callback("n1");
    payload["objectId"] = json!(format!("{}.cus_missing", TEST_ISSUER));

    let (status, body) = send(&router, post_json("/v1/google/callback", &payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(h.store.registrations().is_empty());
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let (_h, router) = seeded(None);
    let request = Request::post("/v1/google/callback")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_failed_callback_releases_nonce() {
    let (h, router) = seeded(None);
    h.store.fail_registrations.store(true, Ordering::SeqCst);

    let (status, _) = send(&router, post_json("/v1/google/callback", &save_callback("n1"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(h.store.nonce_count(), 0, "nonce must be free for the retry");

    h.store.fail_registrations.store(false, Ordering::SeqCst);
    let (status, body) = send(&router, post_json("/v1/google/callback", &save_callback("n1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok", "retry is processed, not treated as duplicate");
    assert_eq!(h.store.registrations().len(), 1);
}

#[tokio::test]
async fn test_signed_callbacks() {
    let secret = "whsec_test";
    let (h, router) = seeded(Some(secret));
    let body = save_callback("n1").to_string();

    let (status, _) = send(
        &router,
        Request::post("/v1/google/callback")
            .header("content-type", "application/json")
            .body(Body::from(body.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.store.nonce_count(), 0, "rejected before the nonce is recorded");

    let timestamp = h.clock.now().timestamp();
    let signature = sign_payload(secret, timestamp, &body);
    let (status, json) = send(
        &router,
        Request::post("/v1/google/callback")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .body(Body::from(body))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

// ============================================================
// Apple device registration
// ============================================================

#[tokio::test]
async fn test_device_registration_lifecycle() {
    let (h, router) = seeded(None);
    let token = pass_auth_token(PASS_SECRET, "cus_1");
    let body = json!({ "pushToken": "apns_tok_1" });

    let (status, _) = send(&router, device_request("POST", "cus_1", &token, Some(&body))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&router, device_request("POST", "cus_1", &token, Some(&body))).await;
    assert_eq!(status, StatusCode::OK, "re-registration is acknowledged");

    let rotated = json!({ "pushToken": "apns_tok_2" });
    let (status, _) = send(&router, device_request("POST", "cus_1", &token, Some(&rotated))).await;
    assert_eq!(status, StatusCode::CREATED);
    let registrations = h.store.registrations();
    assert_eq!(registrations.len(), 1, "a device keeps one token");
    assert_eq!(registrations[0].handle, "apns_tok_2");

    let (status, _) = send(&router, device_request("DELETE", "cus_1", &token, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(h.store.registrations().is_empty());
}

#[tokio::test]
async fn test_device_registration_rejects_bad_token() {
    let (h, router) = seeded(None);
    let other = pass_auth_token(PASS_SECRET, "cus_2");
    let body = json!({ "pushToken": "apns_tok_1" });

    let (status, json) = send(&router, device_request("POST", "cus_1", &other, Some(&body))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], "unauthorized");
    assert!(h.store.registrations().is_empty());
}

#[tokio::test]
async fn test_device_registration_needs_push_token() {
    let (_h, router) = seeded(None);
    let token = pass_auth_token(PASS_SECRET, "cus_1");
    let (status, _) = send(&router, device_request("POST", "cus_1", &token, Some(&json!({})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_foreign_pass_type_is_not_found() {
    let (_h, router) = seeded(None);
    let token = pass_auth_token(PASS_SECRET, "cus_1");
    let request = Request::post("/v1/devices/dev_1/registrations/pass.other/cus_1")
        .header("authorization", format!("ApplePass {}", token))
        .header("content-type", "application/json")
        .body(Body::from(json!({ "pushToken": "t" }).to_string()))
        .unwrap();
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_device_logs_are_accepted() {
    let (_h, router) = seeded(None);
    let (status, _) = send(
        &router,
        post_json("/v1/log", &json!({ "logs": ["Web service error for pass"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================
// Internal events
// ============================================================

#[tokio::test]
async fn test_internal_endpoints_need_token() {
    let (_h, router) = seeded(None);
    let request = Request::post("/internal/designs/des_1/created")
        .header("authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["message"], "invalid token");
}

#[tokio::test]
async fn test_design_lifecycle_through_events() {
    let (h, router) = seeded(None);
    h.sync
        .registry
        .register("cus_1", Platform::Apple, "tok_cus_1")
        .await
        .unwrap();

    let (status, summary) = send(&router, internal("POST", "/internal/designs/des_1/created", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total_keys"], 16);
    assert_eq!(summary["rendered"], 16);

    let (status, report) = send(&router, internal("POST", "/internal/designs/des_1/activate", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["design"]["is_active"], true);

    let stamps = json!({ "stamps": 2 });
    let (status, outcomes) = send(
        &router,
        internal("POST", "/internal/customers/cus_1/stamps", Some(&stamps)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcomes["apple"]["updated"], 1);
    assert_eq!(outcomes["google"]["skipped"], 1, "no google object registered");

    let (status, refs) = send(&router, internal("POST", "/internal/customers/cus_1/created", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refs["apple"], "https://cards.example.test/passes/cus_1");
    assert!(refs["google"].is_string() || refs["google"].is_null());

    let (status, body) = send(&router, internal("DELETE", "/internal/designs/des_1", None)).await;
    assert_eq!(status, StatusCode::CONFLICT, "active design cannot be deleted");
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn test_stamp_count_out_of_range_is_conflict() {
    let (_h, router) = seeded(None);
    send(&router, internal("POST", "/internal/designs/des_1/created", None)).await;
    send(&router, internal("POST", "/internal/designs/des_1/activate", None)).await;

    let (status, body) = send(
        &router,
        internal("POST", "/internal/customers/cus_1/stamps", Some(&json!({ "stamps": 4 }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
}

#[tokio::test]
async fn test_customer_without_active_design() {
    let (_h, router) = seeded(None);
    let (status, body) = send(&router, internal("POST", "/internal/customers/cus_1/created", None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["message"], "business biz_1 has no active design");
}

#[tokio::test]
async fn test_unknown_design_is_not_found() {
    let (_h, router) = seeded(None);
    let (status, _) = send(&router, internal("POST", "/internal/designs/des_404/created", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_design_update_statuses() {
    let (h, router) = seeded(None);
    send(&router, internal("POST", "/internal/designs/des_1/created", None)).await;
    let design = h.store.design("des_1").unwrap();

    let same = json!({
        "previous_total_stamps": 3,
        "previous_style": design.style,
    });
    let (status, body) = send(
        &router,
        internal("POST", "/internal/designs/des_1/updated", Some(&same)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unchanged");

    let mut old_style = design.style.clone();
    old_style.background_color = "#000000".to_string();
    let restyled = json!({
        "previous_total_stamps": 3,
        "previous_style": old_style,
    });
    let (status, body) = send(
        &router,
        internal("POST", "/internal/designs/des_1/updated", Some(&restyled)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "regenerated", "inactive designs regenerate inline");
    assert_eq!(body["report"]["cache"]["generation"], 2);

    let (status, body) = send(&router, internal("DELETE", "/internal/designs/des_1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed_strips"], 16);
}
