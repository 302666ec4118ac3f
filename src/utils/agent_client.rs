//! HTTP client for the conversational agent gateway.
//!
//! The bridge's only link to the host assistant: final transcripts are POSTed
//! to the gateway, which may answer with text for the bridge to speak.

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("agent returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Serialize)]
struct VoiceMessage<'a> {
    call_sid: &'a str,
    from: &'a str,
    text: &'a str,
}

/// Client for `POST {gateway_url}/api/voice/message`.
#[derive(Debug, Clone)]
pub struct AgentClient {
    gateway_url: String,
    client: reqwest::Client,
}

impl AgentClient {
    pub fn new(gateway_url: String) -> Self {
        Self {
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Forward a caller utterance to the agent.
    ///
    /// Returns the agent's textual reply, or `None` when the agent chose not
    /// to respond. Any response body that is not `{"response": "..."}` is
    /// treated as no reply.
    pub async fn forward(
        &self,
        call_sid: &str,
        from: &str,
        text: &str,
    ) -> Result<Option<String>, AgentError> {
        let url = format!("{}/api/voice/message", self.gateway_url);
        debug!(call_sid = %call_sid, "forwarding transcript to agent");

        let response = self
            .client
            .post(&url)
            .json(&VoiceMessage {
                call_sid,
                from,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::Status(status.as_u16()));
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) => return Ok(None),
        };
        Ok(body
            .get("response")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string))
    }
}
