use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use cardrelay_api::{build_router, config::Config, routes::health::HealthResponse, state::AppState};
use cardrelay_core::testing::{answer, message_end, MockPlaceholderService, ScriptedBackend};
use cardrelay_core::{PoolConfig, RelayConfig, TurnOrchestrator};
use serde_json::{json, Value};
use tower::util::ServiceExt;

struct Harness {
    app: Router,
    service: Arc<MockPlaceholderService>,
    backend: Arc<ScriptedBackend>,
}

fn harness(config: Config) -> Harness {
    let service = Arc::new(MockPlaceholderService::new());
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_events(vec![answer("Hi there", "conv_1"), message_end("conv_1")]),
    );
    let relay = RelayConfig {
        pool: PoolConfig::default().with_target_size(5),
        ..RelayConfig::default()
    };
    let orchestrator = TurnOrchestrator::new(service.clone(), backend.clone(), relay);
    let state = Arc::new(AppState::new(config, orchestrator));

    Harness {
        app: build_router(state),
        service,
        backend,
    }
}

fn text_message(message_id: &str, text: &str) -> Value {
    json!({
        "schema": "2.0",
        "header": {
            "event_id": format!("ev_{message_id}"),
            "event_type": "im.message.receive_v1",
            "token": "verify_me"
        },
        "event": {
            "sender": {"sender_id": {"open_id": "ou_1"}},
            "message": {
                "message_id": message_id,
                "message_type": "text",
                "content": json!({"text": text}).to_string()
            }
        }
    })
}

async fn post(app: &Router, path: &str, body: String) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn wait_for_requests(backend: &ScriptedBackend, count: usize) {
    for _ in 0..100 {
        if backend.requests().len() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_url_verification_echoes_challenge() {
    let harness = harness(Config::default());

    let (status, body) = post(
        &harness.app,
        "/webhook/event",
        json!({"challenge": "abc123", "token": "verify_me", "type": "url_verification"}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"challenge": "abc123"}));
}

#[tokio::test(start_paused = true)]
async fn test_text_message_starts_turn() {
    let harness = harness(Config::default());

    let (status, body) = post(
        &harness.app,
        "/webhook/event",
        text_message("om_1", "hello").to_string(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": 0}));

    wait_for_requests(&harness.backend, 1).await;
    let requests = harness.backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].user_id, "ou_1");
    assert_eq!(requests[0].query, "hello");

    for _ in 0..100 {
        if harness.service.content_of("card_1") == "Hi there" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.service.content_of("card_1"), "Hi there");
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_message_is_ignored() {
    let harness = harness(Config::default());
    let payload = text_message("om_1", "hello").to_string();

    let (first, _) = post(&harness.app, "/webhook/event", payload.clone()).await;
    let (second, body) = post(&harness.app, "/webhook/event", payload).await;
    wait_for_requests(&harness.backend, 2).await;

    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body, json!({"code": 0}));
    assert_eq!(harness.backend.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_text_message_is_acknowledged_without_turn() {
    let harness = harness(Config::default());
    let mut payload = text_message("om_1", "hello");
    payload["event"]["message"]["message_type"] = json!("image");
    payload["event"]["message"]["content"] = json!(r#"{"image_key":"img_1"}"#);

    let (status, body) = post(&harness.app, "/webhook/event", payload.to_string()).await;
    wait_for_requests(&harness.backend, 1).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": 0}));
    assert!(harness.backend.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_payload_is_bad_request() {
    let harness = harness(Config::default());

    let (status, body) = post(&harness.app, "/webhook/event", "{not json".to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().starts_with("Malformed payload"));
}

#[tokio::test(start_paused = true)]
async fn test_wrong_verification_token_is_rejected() {
    let config = Config {
        feishu_verification_token: Some("expected".to_string()),
        ..Config::default()
    };
    let harness = harness(config);

    let (status, _) = post(
        &harness.app,
        "/webhook/event",
        text_message("om_1", "hello").to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(harness.backend.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_card_callback_is_acknowledged() {
    let harness = harness(Config::default());

    let (status, body) = post(
        &harness.app,
        "/webhook/card",
        json!({"action": {"value": {}}}).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"code": 0}));
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_pool_and_turns() {
    let harness = harness(Config::default());

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = harness.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: HealthResponse = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(health.status, "degraded");
    assert_eq!(health.pool_size, 0);
    assert_eq!(health.pool_target, 5);
    assert_eq!(health.sessions, 0);
    assert_eq!(health.active_turns, 0);
}
