//! Deepgram Aura speech synthesis.
//!
//! `POST /v1/speak` with `encoding=linear16&container=none` returns raw
//! 16-bit PCM at the requested sample rate.

use serde_json::json;

use super::base::{TTSConfig, TTSError};
use super::provider::TTSRequestBuilder;

const DEEPGRAM_TTS_URL: &str = "https://api.deepgram.com/v1/speak";
const DEFAULT_VOICE: &str = "aura-asteria-en";

pub struct DeepgramRequestBuilder {
    config: TTSConfig,
}

impl DeepgramRequestBuilder {
    pub fn new(config: TTSConfig) -> Self {
        Self { config }
    }
}

impl TTSRequestBuilder for DeepgramRequestBuilder {
    fn build_http_request(
        &self,
        client: &reqwest::Client,
        text: &str,
    ) -> Result<reqwest::RequestBuilder, TTSError> {
        let model = self.config.voice.as_deref().unwrap_or(DEFAULT_VOICE);
        let sample_rate = self.config.sample_rate.to_string();
        Ok(client
            .post(DEEPGRAM_TTS_URL)
            .header("Authorization", format!("Token {}", self.config.api_key))
            .query(&[
                ("model", model),
                ("encoding", "linear16"),
                ("container", "none"),
                ("sample_rate", sample_rate.as_str()),
            ])
            .json(&json!({ "text": text })))
    }

    fn provider_name(&self) -> &'static str {
        "deepgram"
    }
}
