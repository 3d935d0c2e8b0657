use axum::{
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use populate_api::{State, construct_router};
use populate_crawler::{
    Client, InMemoryScheduler, IntegrationManager, LifecycleConfig, MemoryRegistry, Registry,
    SourceCredentials,
};
use std::sync::Arc;
use tower::ServiceExt;

const SECRET: &str = "endpoint-secret";
const ENTRYPOINT: &str = "arn:aws:lambda:eu-west-1:000000000000:function:crawl";

struct Fixture {
    registry: MemoryRegistry,
    scheduler: InMemoryScheduler,
    router: axum::Router,
}

async fn fixture() -> Fixture {
    let registry = MemoryRegistry::new();
    registry
        .put_client(&Client {
            user_id: "7".to_string(),
            account_id: None,
            credentials: Some(SourceCredentials::new("tok", "sec")),
        })
        .await
        .unwrap();

    let scheduler = InMemoryScheduler::new();
    let manager = IntegrationManager::new(
        Arc::new(registry.clone()),
        Arc::new(scheduler.clone()),
        LifecycleConfig::new(ENTRYPOINT),
    );
    let router = construct_router(Arc::new(State::new(manager, SECRET)));

    Fixture {
        registry,
        scheduler,
        router,
    }
}

fn token(user_id: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &serde_json::json!({ "userId": user_id, "accountId": 1 }),
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn post(path: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn subscribe_body(webhook_id: u64) -> serde_json::Value {
    serde_json::json!({
        "payload": {
            "inputFields": { "query": "rust lang" },
            "webhookUrl": format!("https://api-gw.monday.com/automations/apps-events/{}", webhook_id),
        }
    })
}

#[tokio::test]
async fn test_subscribe_arms_a_trigger() {
    let fx = fixture().await;
    let token = token(serde_json::json!(7));

    let response = fx
        .router
        .clone()
        .oneshot(post("/monday/subscribe", Some(&token), subscribe_body(42)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let trigger = fx.scheduler.get_trigger("42").expect("trigger created");
    assert!(trigger.enabled);
    assert_eq!(trigger.targets.len(), 1);
    assert!(fx.scheduler.has_grant("42"));

    let integrations = fx.registry.integrations();
    assert_eq!(integrations.len(), 1);
    assert_eq!(integrations[0].user_id, "7");
    assert_eq!(integrations[0].query, "rust lang");
}

#[tokio::test]
async fn test_subscribe_without_credentials_is_unprocessable() {
    let fx = fixture().await;
    let token = token(serde_json::json!("stranger"));

    let response = fx
        .router
        .clone()
        .oneshot(post("/monday/subscribe", Some(&token), subscribe_body(43)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "UNPROCESSABLE_ENTITY");
    assert!(!fx.scheduler.get_trigger("43").unwrap().enabled);
}

#[tokio::test]
async fn test_subscribe_rejects_bad_token() {
    let fx = fixture().await;

    let response = fx
        .router
        .clone()
        .oneshot(post("/monday/subscribe", None, subscribe_body(42)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fx
        .router
        .clone()
        .oneshot(post(
            "/monday/subscribe",
            Some("not-a-token"),
            subscribe_body(42),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(fx.scheduler.get_trigger("42").is_none());
}

#[tokio::test]
async fn test_unsubscribe_tears_down() {
    let fx = fixture().await;
    let token = token(serde_json::json!(7));

    fx.router
        .clone()
        .oneshot(post("/monday/subscribe", Some(&token), subscribe_body(42)))
        .await
        .unwrap();

    let body = serde_json::json!({ "payload": { "webhookId": 42 } });
    let response = fx
        .router
        .clone()
        .oneshot(post("/monday/unsubscribe", Some(&token), body.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(fx.scheduler.get_trigger("42").is_none());
    assert!(!fx.scheduler.has_grant("42"));
    assert!(fx.registry.integrations().is_empty());

    // A second teardown finds nothing left and still succeeds
    let response = fx
        .router
        .clone()
        .oneshot(post("/monday/unsubscribe", Some(&token), body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_tweet_definition() {
    let fx = fixture().await;

    let response = fx
        .router
        .clone()
        .oneshot(post("/monday/tweet-definition", None, serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    let fields = body.as_array().unwrap();
    assert_eq!(fields.len(), 4);
    assert_eq!(fields[3]["id"], "creationDate");
    assert_eq!(fields[3]["outboundType"], "date_time");
    assert_eq!(
        fields[1]["inboundTypes"],
        serde_json::json!(["empty_value", "text", "text_array"])
    );
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let fx = fixture().await;

    let response = fx
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/nowhere")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_malformed_body_gets_error_envelope() {
    let fx = fixture().await;
    let token = token(serde_json::json!(7));

    let request = Request::builder()
        .method("POST")
        .uri("/monday/subscribe")
        .header("content-type", "application/json")
        .header("authorization", &token)
        .body(Body::from("{not json"))
        .unwrap();
    let response = fx.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"]["code"], "INVALID_BODY");

    // Well-formed JSON missing the webhook id
    let response = fx
        .router
        .clone()
        .oneshot(post(
            "/monday/unsubscribe",
            Some(&token),
            serde_json::json!({ "payload": {} }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(json_body(response).await["error"]["code"], "INVALID_BODY");
    assert!(fx.scheduler.snapshot().triggers.is_empty());
}
