use super::*;
use crate::channels::base::sign;
use crate::providers::base::DateRange;
use crate::test_support::{Fakes, temp_store};
use async_trait::async_trait;
use axum::http::Request;
use chrono::NaiveDate;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

/// Adapter whose outcome is chosen by the body text.
struct EchoAdapter {
    secret: String,
}

#[async_trait]
impl ChannelAdapter for EchoAdapter {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn signature_header(&self) -> &'static str {
        "x-echo-signature"
    }

    fn webhook_secret(&self) -> &str {
        &self.secret
    }

    async fn handle_webhook(&self, body: &[u8]) -> Result<Value, AdapterError> {
        match body {
            b"malformed" => Err(AdapterError::Malformed("cannot parse".into())),
            b"disk-full" => Err(AdapterError::Persistence(anyhow::anyhow!("database is locked"))),
            other => Ok(json!({ "echo": String::from_utf8_lossy(other) })),
        }
    }
}

fn app_with(secret: &str) -> (Router, Fakes, Arc<ServiceGateway>, TempDir) {
    let (dir, store) = temp_store();
    let fakes = Fakes::new(vec![]);
    let gateway = fakes.gateway();
    let adapter: Arc<dyn ChannelAdapter> = Arc::new(EchoAdapter {
        secret: secret.to_string(),
    });
    let state = ServerState::new(store, gateway.clone(), vec![adapter]);
    (build_router(state), fakes, gateway, dir)
}

fn post(uri: &str, signature: Option<&str>, body: Vec<u8>) -> Request<axum::body::Body> {
    let mut req = Request::builder().method("POST").uri(uri);
    if let Some(sig) = signature {
        req = req.header("x-echo-signature", sig);
    }
    req.body(axum::body::Body::from(body)).unwrap()
}

async fn json_body(resp: axum::http::Response<axum::body::Body>) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_signed_webhook_is_accepted() {
    let (app, _fakes, _gw, _dir) = app_with("s3cret");
    let sig = sign("s3cret", b"hello");
    let resp = app
        .oneshot(post("/webhooks/echo", Some(&sig), b"hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["echo"], "hello");
}

#[tokio::test]
async fn test_missing_signature_is_unauthorized() {
    let (app, _fakes, _gw, _dir) = app_with("s3cret");
    let resp = app
        .oneshot(post("/webhooks/echo", None, b"hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_wrong_signature_is_unauthorized() {
    let (app, _fakes, _gw, _dir) = app_with("s3cret");
    let sig = sign("other-secret", b"hello");
    let resp = app
        .oneshot(post("/webhooks/echo", Some(&sig), b"hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_unsigned_channel_accepts_without_header() {
    let (app, _fakes, _gw, _dir) = app_with("");
    let resp = app
        .oneshot(post("/webhooks/echo", None, b"hello".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_malformed_payload_is_422() {
    let (app, _fakes, _gw, _dir) = app_with("");
    let resp = app
        .oneshot(post("/webhooks/echo", None, b"malformed".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(resp).await["error"], "cannot parse");
}

#[tokio::test]
async fn test_persistence_failure_is_500_without_details() {
    let (app, _fakes, _gw, _dir) = app_with("");
    let resp = app
        .oneshot(post("/webhooks/echo", None, b"disk-full".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(resp).await["error"], "temporary failure");
}

#[tokio::test]
async fn test_unknown_channel_is_404() {
    let (app, _fakes, _gw, _dir) = app_with("");
    let resp = app
        .oneshot(post("/webhooks/telegram", None, b"{}".to_vec()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let (app, _fakes, _gw, _dir) = app_with("");
    let resp = app
        .oneshot(post("/webhooks/echo", None, vec![b'a'; WEBHOOK_MAX_BODY + 1]))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_health_reports_store_and_breakers() {
    let (app, _fakes, _gw, _dir) = app_with("");
    let req = Request::builder()
        .uri("/api/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = json_body(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], crate::VERSION);
    assert_eq!(json["store"]["active_conversations"], 0);
    assert_eq!(json["breakers"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_health_is_degraded_with_open_breaker() {
    let (app, fakes, gateway, _dir) = app_with("");
    fakes.calendar.set_down(true);
    let day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
    for _ in 0..5 {
        let _ = gateway.list_free_slots(&DateRange::new(day, day), 60, None).await;
    }

    let req = Request::builder()
        .uri("/api/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let json = json_body(app.oneshot(req).await.unwrap()).await;
    assert_eq!(json["status"], "degraded");
}
