//! REST client for the carrier's call-control API.
//!
//! Places outbound calls, live-updates in-progress calls with new TwiML, and
//! hangs calls up. All requests are form-encoded with HTTP basic auth, as the
//! carrier's 2010-04-01 API expects.

use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

const STATUS_CALLBACK_EVENTS: [&str; 4] = ["initiated", "ringing", "answered", "completed"];
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by carrier API calls
#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    #[error("carrier request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("carrier API error ({status}): {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

/// Carrier REST API client. Cheap to clone; the underlying HTTP client pools
/// connections.
#[derive(Debug, Clone)]
pub struct TwilioClient {
    account_sid: String,
    auth_token: String,
    phone_number: String,
    base_url: String,
    client: reqwest::Client,
}

impl TwilioClient {
    pub fn new(account_sid: String, auth_token: String, phone_number: String) -> Self {
        Self::with_base_url(account_sid, auth_token, phone_number, TWILIO_API_BASE.to_string())
    }

    /// Point the client at an alternate API host. Used by tests.
    pub fn with_base_url(
        account_sid: String,
        auth_token: String,
        phone_number: String,
        base_url: String,
    ) -> Self {
        Self {
            account_sid,
            auth_token,
            phone_number,
            base_url,
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.account_sid
        )
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, call_sid
        )
    }

    /// Place an outbound call executing the given TwiML.
    ///
    /// Returns the carrier-assigned call SID and the initial call status.
    pub async fn create_call(
        &self,
        to: &str,
        twiml: &str,
        status_callback: Option<&str>,
    ) -> Result<(String, String), CarrierError> {
        let mut form: Vec<(&str, String)> = vec![
            ("To", to.to_string()),
            ("From", self.phone_number.clone()),
            ("Twiml", twiml.to_string()),
        ];
        if let Some(url) = status_callback {
            form.push(("StatusCallback", url.to_string()));
            for event in STATUS_CALLBACK_EVENTS {
                form.push(("StatusCallbackEvent", event.to_string()));
            }
        }

        let response = self
            .client
            .post(self.calls_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CarrierError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let resource: CallResource = response.json().await?;
        info!(call_sid = %resource.sid, to = %to, "outbound call placed");
        Ok((
            resource.sid,
            resource.status.unwrap_or_else(|| "queued".to_string()),
        ))
    }

    /// Replace the TwiML of an in-progress call.
    pub async fn update_call(&self, call_sid: &str, twiml: &str) -> Result<(), CarrierError> {
        debug!(call_sid = %call_sid, "updating live call TwiML");
        self.modify_call(call_sid, &[("Twiml", twiml.to_string())])
            .await
    }

    /// Hang up a call by moving it to the completed status.
    pub async fn complete_call(&self, call_sid: &str) -> Result<(), CarrierError> {
        debug!(call_sid = %call_sid, "completing call");
        self.modify_call(call_sid, &[("Status", "completed".to_string())])
            .await
    }

    async fn modify_call(
        &self,
        call_sid: &str,
        form: &[(&str, String)],
    ) -> Result<(), CarrierError> {
        let response = self
            .client
            .post(self.call_url(call_sid))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CarrierError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
