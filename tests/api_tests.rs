use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

use parley::{AppState, ServerConfig, routes};

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        webhook_base_url: Some("https://bridge.example".to_string()),
        twilio_account_sid: "AC0".to_string(),
        twilio_auth_token: "auth-token".to_string(),
        twilio_phone_number: "+15550000000".to_string(),
        stt_provider: "deepgram".to_string(),
        stt_language: "en-US".to_string(),
        stt_model: None,
        tts_provider: "openai".to_string(),
        tts_voice: None,
        tts_model: None,
        deepgram_api_key: Some("dg-test".to_string()),
        openai_api_key: Some("sk-test".to_string()),
        groq_api_key: None,
        elevenlabs_api_key: None,
        agent_gateway_url: None,
        default_country_code: "1".to_string(),
        say_voice: "alice".to_string(),
        barge_in: true,
    }
}

fn app() -> Router {
    let state = AppState::new(test_config()).expect("app state");
    routes::api::create_api_router()
        .merge(routes::voice::create_voice_router())
        .with_state(state)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "OK");
    assert_eq!(json["activeCalls"], 0);
}

#[tokio::test]
async fn test_place_call_requires_message_or_greeting() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/call")
        .header("content-type", "application/json")
        .body(Body::from(json!({"to": "+15551234567"}).to_string()))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("message"));
}

#[tokio::test]
async fn test_place_call_requires_destination() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/call")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"to": "", "message": "hello"}).to_string(),
        ))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_unknown_call_is_404() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/call/CA404")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("CA404"));
}

#[tokio::test]
async fn test_speak_unknown_call_is_404() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/speak")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"callSid": "CA404", "message": "hello"}).to_string(),
        ))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_speak_rejects_empty_message() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/speak")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"callSid": "CA1", "message": "  "}).to_string(),
        ))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_calls_empty() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/calls")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["calls"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
