//! Carrier-facing webhook handlers and the media-stream WebSocket endpoint.
//!
//! Signaling webhooks (`/voice/inbound`, `/voice/status`, `/voice/gather`)
//! carry the carrier's HMAC-SHA1 signature and are rejected with 403 on
//! mismatch. The media-stream WebSocket is unsigned; the carrier's stream
//! protocol does not sign upgrade requests.

use axum::{
    Form,
    extract::{OriginalUri, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::state::AppState;
use crate::twilio::validate_signature;

const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

/// Reconstruct the public URL the carrier signed: configured base plus the
/// request's path and query.
fn signed_url(state: &AppState, uri: &OriginalUri) -> Option<String> {
    state.config.webhook_base_url.as_ref().map(|base| {
        let base = base.trim_end_matches('/');
        match uri.0.path_and_query() {
            Some(path_and_query) => format!("{base}{path_and_query}"),
            None => format!("{base}{}", uri.0.path()),
        }
    })
}

/// Enforce the carrier signature.
///
/// Development mode: with no public base URL configured and no signature
/// header present, the request is accepted so local testing works without a
/// carrier in the loop.
fn verify_webhook(
    state: &AppState,
    headers: &HeaderMap,
    uri: &OriginalUri,
    params: &HashMap<String, String>,
) -> Result<(), AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    match (signed_url(state, uri), signature) {
        (None, None) => {
            debug!("development mode: accepting unsigned webhook");
            Ok(())
        }
        (Some(url), Some(signature)) => {
            if validate_signature(&state.config.twilio_auth_token, &url, params, signature) {
                Ok(())
            } else {
                Err(AppError::Forbidden("invalid webhook signature".to_string()))
            }
        }
        _ => Err(AppError::Forbidden("missing webhook signature".to_string())),
    }
}

fn xml_response(body: String) -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        body,
    )
        .into_response()
}

/// `POST /voice/inbound` - a call is arriving; answer with TwiML that opens
/// a media stream back to this bridge.
pub async fn inbound_call_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: OriginalUri,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    verify_webhook(&state, &headers, &uri, &params)?;
    info!(
        call_sid = params.get("CallSid").map_or("", String::as_str),
        from = params.get("From").map_or("", String::as_str),
        "inbound call webhook"
    );

    let twiml = state.manager.handle_inbound_call(&params, None).await?;
    Ok(xml_response(twiml))
}

/// `POST /voice/status` - signaling state reconciliation.
pub async fn status_callback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: OriginalUri,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    verify_webhook(&state, &headers, &uri, &params)?;
    state.manager.handle_status_callback(&params).await;
    Ok(StatusCode::OK.into_response())
}

/// `POST /voice/gather` - carrier-recognizer speech and DTMF results.
pub async fn gather_callback_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: OriginalUri,
    Form(params): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    verify_webhook(&state, &headers, &uri, &params)?;
    let twiml = state.manager.handle_gather_callback(&params).await;
    Ok(xml_response(twiml))
}

/// `GET /voice/stream` - upgrade to the carrier's media-stream WebSocket.
///
/// Unsigned by protocol design; the call is only trusted once its `start`
/// envelope names a known call SID.
pub async fn stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("media stream upgrade requested");
    let manager = state.manager.clone();
    ws.on_upgrade(move |socket| manager.handle_media_stream(socket))
}
