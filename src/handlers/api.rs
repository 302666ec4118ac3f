//! REST API for programmatic call control.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::core::call::CallSummary;
use crate::errors::AppError;
use crate::state::AppState;

/// Request body for `POST /api/call`
#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub to: String,
    /// One-shot announcement; the call plays it and hangs up
    pub message: Option<String>,
    /// Opening line for a conversational call
    pub greeting: Option<String>,
    /// Force a conversational call even without a greeting
    #[serde(default)]
    pub conversation: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub success: bool,
    #[serde(rename = "callSid")]
    pub call_sid: String,
    pub state: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    #[serde(rename = "callSid")]
    pub call_sid: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct EndRequest {
    #[serde(rename = "callSid")]
    pub call_sid: String,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct CallListResponse {
    pub calls: Vec<CallSummary>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(rename = "activeCalls")]
    pub active_calls: usize,
}

/// `POST /api/call` - place an outbound call.
///
/// With `greeting` or `conversation`, the call opens a media stream for a
/// full conversation; with only `message`, it speaks once and hangs up.
pub async fn place_call_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CallRequest>,
) -> Result<Json<CallResponse>, AppError> {
    if request.to.trim().is_empty() {
        return Err(AppError::BadRequest("'to' is required".to_string()));
    }

    let summary = if request.greeting.is_some() || request.conversation {
        info!(to = %request.to, "placing conversation call");
        state
            .manager
            .make_conversation_call(&request.to, request.greeting, request.metadata)
            .await?
    } else if let Some(message) = request.message.as_deref() {
        if message.trim().is_empty() {
            return Err(AppError::BadRequest("'message' must not be empty".to_string()));
        }
        info!(to = %request.to, "placing announcement call");
        state
            .manager
            .make_call(&request.to, message, request.metadata)
            .await?
    } else {
        return Err(AppError::BadRequest(
            "either 'message', 'greeting' or 'conversation' is required".to_string(),
        ));
    };

    Ok(Json(CallResponse {
        success: true,
        call_sid: summary.call_sid,
        state: summary.state,
    }))
}

/// `POST /api/speak` - speak text into a live call.
pub async fn speak_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpeakRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    if request.message.trim().is_empty() {
        return Err(AppError::BadRequest("'message' must not be empty".to_string()));
    }
    state
        .manager
        .speak(&request.call_sid, &request.message)
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// `POST /api/end` - end a call, optionally with a goodbye.
pub async fn end_call_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<EndRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    state
        .manager
        .end_call(&request.call_sid, request.message.as_deref())
        .await?;
    Ok(Json(SuccessResponse { success: true }))
}

/// `GET /api/call/{callSid}` - fetch one call record.
pub async fn get_call_handler(
    State(state): State<Arc<AppState>>,
    Path(call_sid): Path<String>,
) -> Result<Json<CallSummary>, AppError> {
    state
        .manager
        .get_call(&call_sid)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("call not found: {call_sid}")))
}

/// `GET /api/calls` - list active (non-terminal) calls.
pub async fn list_calls_handler(
    State(state): State<Arc<AppState>>,
) -> Json<CallListResponse> {
    Json(CallListResponse {
        calls: state.manager.active_calls().await,
    })
}

/// `GET /health`
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        active_calls: state.manager.active_call_count().await,
    })
}
