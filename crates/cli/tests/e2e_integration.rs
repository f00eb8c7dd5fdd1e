//! Full-stack tests: configuration, the SQLite store, the in-memory cache,
//! the local admission controller and the OpenAI-compatible client, wired by
//! `GatewayState::from_config` and driven through the router against a local
//! mock completion backend.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use http_body_util::BodyExt;
use promptgate_config::{AppConfig, CacheBackend, RateLimitBackend, StoreBackend};
use promptgate_gateway::{GatewayState, build_router};
use serde_json::{Value, json};
use tower::ServiceExt;

// ── Mock completion backend ──────────────────────────────────────────────

async fn completions(Json(body): Json<Value>) -> Response {
    let messages = body["messages"].as_array().cloned().unwrap_or_default();
    let last = messages
        .last()
        .and_then(|m| m["content"].as_str())
        .unwrap_or_default()
        .to_string();

    if body["stream"] == true {
        let mut sse = String::new();
        for word in ["streamed ", "reply"] {
            sse.push_str(&format!(
                "data: {}\n\n",
                json!({ "id": "s1", "model": body["model"], "choices": [{ "delta": { "content": word } }] })
            ));
        }
        sse.push_str("data: {\"id\":\"s1\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
        sse.push_str("data: [DONE]\n\n");
        return ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response();
    }

    Json(json!({
        "id": "cmpl-1",
        "model": body["model"],
        "choices": [{
            "message": { "role": "assistant", "content": format!("echo: {last} ({} turns)", messages.len()) },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 7, "completion_tokens": 3, "total_tokens": 10 }
    }))
    .into_response()
}

async fn spawn_backend() -> String {
    let app = Router::new()
        .route("/v1/chat/completions", post(completions))
        .route("/v1/models", get(|| async { Json(json!({ "data": [] })) }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1")
}

// ── Harness ──────────────────────────────────────────────────────────────

struct Stack {
    app: Router,
    _dir: tempfile::TempDir,
}

async fn stack(max_requests: u32) -> Stack {
    let api_base = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();

    let mut config = AppConfig::default();
    config.api_key = Some("sk-test".into());
    config.api_base = api_base;
    config.store.backend = StoreBackend::Sqlite;
    config.store.url = format!("sqlite://{}", dir.path().join("promptgate.db").display());
    config.cache.backend = CacheBackend::Memory;
    config.rate_limit.backend = RateLimitBackend::Local;
    config.rate_limit.max_requests = max_requests;
    config.pipeline.system_prompt = "Be brief.".into();
    config.gateway.tokens.insert("tok-alice".into(), "alice".into());
    config.gateway.tokens.insert("tok-bob".into(), "bob".into());
    config.validate().unwrap();

    let state = Arc::new(GatewayState::from_config(&config).await.unwrap());
    Stack {
        app: build_router(state, &config.gateway),
        _dir: dir,
    }
}

fn peer() -> ConnectInfo<SocketAddr> {
    ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 51_000)))
}

fn get_req(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .extension(peer())
        .body(Body::empty())
        .unwrap()
}

fn complete_req(token: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/inference/complete")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .extension(peer())
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_live_collaborators() {
    let stack = stack(100).await;
    let (status, body) = send(
        &stack.app,
        Request::builder()
            .uri("/health")
            .extension(peer())
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let health = parse(&body);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["database"], "up");
    assert_eq!(health["cache"], "up");
}

#[tokio::test]
async fn conversation_round_trip_through_every_layer() {
    let stack = stack(100).await;

    let (status, body) = send(
        &stack.app,
        complete_req("tok-alice", json!({ "prompt": "hello there" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let first = parse(&body);
    // System prompt plus the user turn.
    assert_eq!(first["content"], "echo: hello there (2 turns)");
    assert_eq!(first["model"], "gpt-4o-mini");
    assert_eq!(first["token_count"], 10);
    assert_eq!(first["cached"], false);
    let conversation_id = first["conversation_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &stack.app,
        complete_req(
            "tok-alice",
            json!({ "prompt": "and again", "conversation_id": conversation_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let second = parse(&body);
    // System prompt, first exchange, new user turn.
    assert_eq!(second["content"], "echo: and again (4 turns)");
    assert_eq!(second["conversation_id"], conversation_id.as_str());

    let (status, body) = send(
        &stack.app,
        get_req(
            &format!("/api/v1/conversations/{conversation_id}/messages"),
            "tok-alice",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = parse(&body);
    let roles: Vec<&str> = messages
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, ["user", "assistant", "user", "assistant"]);
    assert_eq!(messages[1]["model_used"], "gpt-4o-mini");
    assert_eq!(messages[1]["token_count"], 10);

    let (status, body) = send(&stack.app, get_req("/api/v1/conversations", "tok-alice")).await;
    assert_eq!(status, StatusCode::OK);
    let conversations = parse(&body);
    assert_eq!(conversations.as_array().unwrap().len(), 1);
    assert_eq!(conversations[0]["user_id"], "alice");

    let (status, _) = send(
        &stack.app,
        get_req(
            &format!("/api/v1/conversation-messages?conversation_id={conversation_id}"),
            "tok-bob",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = send(&stack.app, get_req("/api/v1/conversations", "tok-bob")).await;
    assert_eq!(parse(&body), json!([]));
}

#[tokio::test]
async fn repeated_prompt_is_served_from_cache() {
    let stack = stack(100).await;
    let request = json!({ "prompt": "cache me", "temperature": 0.2 });

    let (_, body) = send(&stack.app, complete_req("tok-alice", request.clone())).await;
    assert_eq!(parse(&body)["cached"], false);

    let (status, body) = send(&stack.app, complete_req("tok-alice", request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let hit = parse(&body);
    assert_eq!(hit["cached"], true);
    assert_eq!(hit["content"], "echo: cache me (2 turns)");

    // Another principal never sees alice's entry.
    let (_, body) = send(&stack.app, complete_req("tok-bob", request)).await;
    assert_eq!(parse(&body)["cached"], false);
}

#[tokio::test]
async fn streamed_reply_is_relayed_and_persisted() {
    let stack = stack(100).await;

    let (status, body) = send(
        &stack.app,
        complete_req("tok-alice", json!({ "prompt": "stream it", "stream": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.ends_with("data: [DONE]\n\n"), "{body}");

    let frames: Vec<Value> = body
        .split("\n\n")
        .filter_map(|event| event.strip_prefix("data: "))
        .filter(|data| *data != "[DONE]")
        .map(parse)
        .collect();
    let text: String = frames
        .iter()
        .map(|f| f["delta"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(text, "streamed reply");
    let conversation_id = frames[0]["conversation_id"].as_str().unwrap().to_string();

    let (_, body) = send(
        &stack.app,
        get_req(
            &format!("/api/v1/conversations/{conversation_id}/messages"),
            "tok-alice",
        ),
    )
    .await;
    let messages = parse(&body);
    assert_eq!(messages.as_array().unwrap().len(), 2);
    assert_eq!(messages[1]["content"], "streamed reply");
}

#[tokio::test]
async fn admission_limit_applies_across_the_stack() {
    let stack = stack(2).await;

    for _ in 0..2 {
        let (status, _) = send(&stack.app, get_req("/api/v1/conversations", "tok-alice")).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&stack.app, get_req("/api/v1/conversations", "tok-alice")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(parse(&body)["error"], "rate limit exceeded");
}
