use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Duration;
use newsboard::{
    AppState,
    auth::{Claims, JwtIdentity},
    clock::SystemClock,
    config::{Config, PoolConfig, RankingConfig, StorageBackend},
    create_app,
    services::vote_service::VoteLedger,
    store::{DocumentStore, MemoryStore},
};
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "api-test-secret";

fn test_config() -> Config {
    Config {
        storage_backend: StorageBackend::Memory,
        database_url: None,
        pool: PoolConfig::default(),
        redis_url: None,
        jwt_secret: SECRET.to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        allowed_origins: vec!["http://localhost:3000".to_string()],
        vote_rate_limit: 100,
        reconcile_interval_secs: 3600,
        ranking: RankingConfig::default(),
    }
}

fn app() -> Router {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);
    create_app(AppState {
        ledger: Arc::new(VoteLedger::new(store.clone(), clock.clone())),
        store,
        identity: Arc::new(JwtIdentity::new(SECRET)),
        clock,
        redis: None,
        config: Arc::new(test_config()),
    })
}

fn token(user_id: &str) -> String {
    Claims::issue(user_id, SECRET, Duration::hours(1)).unwrap()
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_post(app: &Router, bearer: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/posts",
        Some(bearer),
        Some(json!({ "title": "Show: a thing", "url": "https://example.com" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn voting_requires_a_credential() {
    let app = app();
    let vote = json!({ "resourceId": "p1", "resourceType": "post", "direction": "up" });

    let (status, _) = send(&app, "POST", "/api/votes", None, Some(vote.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = Claims::issue("alice", SECRET, Duration::hours(-3)).unwrap();
    let (status, _) = send(&app, "POST", "/api/votes", Some(&expired), Some(vote)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn vote_round_trip_over_http() {
    let app = app();
    let alice = token("alice");
    let post_id = create_post(&app, &token("author")).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/votes",
        Some(&alice),
        Some(json!({ "resourceId": post_id, "resourceType": "post", "direction": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "created");
    assert_eq!(body["direction"], "up");
    assert_eq!(body["score"], 1);

    let uri = format!("/api/votes/post/{}", post_id);
    let (status, body) = send(&app, "GET", &uri, Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["direction"], "up");

    let (_, body) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(body["direction"], Value::Null);
    assert_eq!(body["score"], 1);

    let (status, body) = send(
        &app,
        "POST",
        "/api/votes/batch",
        Some(&alice),
        Some(json!({ "resources": [
            { "resourceId": post_id, "resourceType": "post" },
            { "resourceId": "nope", "resourceType": "comment" }
        ] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["votes"][post_id.as_str()]["countUp"], 1);
    assert_eq!(body["votes"]["nope"]["score"], 0);
}

#[tokio::test]
async fn bad_vote_requests_are_rejected() {
    let app = app();
    let alice = token("alice");
    let post_id = create_post(&app, &token("author")).await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/votes",
        Some(&alice),
        Some(json!({ "resourceId": post_id, "resourceType": "story", "direction": "up" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/votes",
        Some(&alice),
        Some(json!({ "resourceId": "ghost", "resourceType": "post", "direction": "down" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/api/votes/post/ghost", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn posts_are_listed_and_deleted_by_their_author() {
    let app = app();
    let author = token("author");
    let post_id = create_post(&app, &author).await;

    let (status, body) = send(&app, "GET", "/api/posts?limit=10", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["posts"][0]["id"], post_id.as_str());
    assert_eq!(body["posts"][0]["timeScore"], 100.0);

    let (status, body) = send(
        &app,
        "POST",
        "/api/comments",
        Some(&token("bob")),
        Some(json!({ "postId": post_id, "text": "neat" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["postId"], post_id.as_str());

    let uri = format!("/api/posts/{}", post_id);
    let (status, _) = send(&app, "DELETE", &uri, Some(&token("bob")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, "DELETE", &uri, Some(&author), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = send(&app, "GET", "/api/posts", None, None).await;
    assert_eq!(body["posts"], json!([]));
}
