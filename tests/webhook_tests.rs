//! Carrier webhook surface: signature enforcement and TwiML responses.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use std::collections::HashMap;
use tower::util::ServiceExt;

use parley::twilio::compute_signature;
use parley::{AppState, ServerConfig, routes};

const AUTH_TOKEN: &str = "auth-token";
const BASE_URL: &str = "https://bridge.example";

fn test_config(base_url: Option<&str>) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        webhook_base_url: base_url.map(str::to_string),
        twilio_account_sid: "AC0".to_string(),
        twilio_auth_token: AUTH_TOKEN.to_string(),
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

fn app(base_url: Option<&str>) -> Router {
    let state = AppState::new(test_config(base_url)).expect("app state");
    routes::voice::create_voice_router()
        .merge(routes::api::create_api_router())
        .with_state(state)
}

/// Form-encode params and compute the matching carrier signature.
fn signed_form(path: &str, params: &[(&str, &str)]) -> (String, String) {
    let body = params
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                key,
                value.replace('+', "%2B").replace(' ', "%20")
            )
        })
        .collect::<Vec<_>>()
        .join("&");

    let map: HashMap<String, String> = params
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    let signature = compute_signature(AUTH_TOKEN, &format!("{BASE_URL}{path}"), &map);
    (body, signature)
}

fn inbound_params() -> Vec<(&'static str, &'static str)> {
    vec![
        ("CallSid", "CA1"),
        ("AccountSid", "AC0"),
        ("From", "+15550001111"),
        ("To", "+15559992222"),
    ]
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_inbound_with_valid_signature_returns_stream_twiml() {
    let (body, signature) = signed_form("/voice/inbound", &inbound_params());

    let request = Request::builder()
        .method("POST")
        .uri("/voice/inbound")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("X-Twilio-Signature", signature)
        .body(Body::from(body))
        .unwrap();

    let response = app(Some(BASE_URL)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap(),
        "application/xml"
    );

    let xml = body_string(response).await;
    assert!(xml.contains(
        "<Connect><Stream url=\"wss://bridge.example/voice/stream\" track=\"inbound_track\"/></Connect>"
    ));
}

#[tokio::test]
async fn test_tampered_body_is_rejected_with_403() {
    let (_, signature) = signed_form("/voice/status", &inbound_params());

    // Signature was computed for CA1; the body says CA2
    let tampered = "CallSid=CA2&AccountSid=AC0&From=%2B15550001111&To=%2B15559992222";
    let request = Request::builder()
        .method("POST")
        .uri("/voice/status")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("X-Twilio-Signature", signature)
        .body(Body::from(tampered))
        .unwrap();

    let app = app(Some(BASE_URL));
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // No side effects: the record was not created
    let lookup = Request::builder()
        .uri("/api/call/CA2")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(lookup).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_signature_is_rejected_when_configured() {
    let (body, _) = signed_form("/voice/status", &inbound_params());
    let request = Request::builder()
        .method("POST")
        .uri("/voice/status")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();

    let response = app(Some(BASE_URL)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_development_mode_accepts_unsigned_status() {
    let body = "CallSid=CA7&CallStatus=ringing&From=%2B15550001111&To=%2B15559992222";
    let request = Request::builder()
        .method("POST")
        .uri("/voice/status")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap();

    let app = app(None);
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The unknown call SID got a record (observed on a webhook)
    let lookup = Request::builder()
        .uri("/api/call/CA7")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(lookup).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value =
        serde_json::from_slice(&axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap())
            .unwrap();
    assert_eq!(json["state"], "ringing");
}

#[tokio::test]
async fn test_development_mode_still_rejects_bad_signature() {
    // Header present but no base URL configured: cannot verify, reject
    let body = "CallSid=CA1&CallStatus=ringing";
    let request = Request::builder()
        .method("POST")
        .uri("/voice/status")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("X-Twilio-Signature", "Zm9yZ2VkIHNpZ25hdHVyZQ==")
        .body(Body::from(body))
        .unwrap();

    let response = app(None).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_status_callback_lifecycle_via_webhooks() {
    let app = app(Some(BASE_URL));

    // Inbound call creates the record
    let (body, signature) = signed_form("/voice/inbound", &inbound_params());
    let request = Request::builder()
        .method("POST")
        .uri("/voice/inbound")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("X-Twilio-Signature", signature)
        .body(Body::from(body))
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );

    // Terminal status releases the call
    let mut params = inbound_params();
    params.push(("CallStatus", "completed"));
    let (body, signature) = signed_form("/voice/status", &params);
    let request = Request::builder()
        .method("POST")
        .uri("/voice/status")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("X-Twilio-Signature", signature)
        .body(Body::from(body))
        .unwrap();
    assert_eq!(
        app.clone().oneshot(request).await.unwrap().status(),
        StatusCode::OK
    );

    // The record is terminal and no longer listed as active
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/call/CA1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json: serde_json::Value =
        serde_json::from_slice(&axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap())
            .unwrap();
    assert_eq!(json["state"], "completed");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/calls")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json: serde_json::Value =
        serde_json::from_slice(&axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap())
            .unwrap();
    assert_eq!(json["calls"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_gather_with_valid_signature_returns_gather_loop() {
    let params = vec![
        ("CallSid", "CA1"),
        ("From", "+15550001111"),
        ("To", "+15559992222"),
        ("SpeechResult", "what time is it"),
        ("Confidence", "0.91"),
    ];
    let (body, signature) = signed_form("/voice/gather", &params);

    let request = Request::builder()
        .method("POST")
        .uri("/voice/gather")
        .header("content-type", "application/x-www-form-urlencoded")
        .header("X-Twilio-Signature", signature)
        .body(Body::from(body))
        .unwrap();

    let response = app(Some(BASE_URL)).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_string(response).await;
    assert!(xml.contains("<Gather input=\"speech\""));
    assert!(xml.contains("action=\"https://bridge.example/voice/gather\""));
    assert!(xml.contains("speechTimeout=\"auto\""));
}
