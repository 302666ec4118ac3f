//! OpenAI speech synthesis.
//!
//! `POST /v1/audio/speech` with `response_format: pcm` returns headerless
//! 24 kHz 16-bit mono PCM. The vendor cuts off sharply at the end of the
//! utterance, so a short tail of silence is appended.

use serde_json::json;

use super::base::{TTSConfig, TTSError};
use super::provider::TTSRequestBuilder;

const OPENAI_TTS_URL: &str = "https://api.openai.com/v1/audio/speech";
const DEFAULT_VOICE: &str = "nova";
const DEFAULT_MODEL: &str = "tts-1";
const TRAILING_SILENCE_MS: u64 = 200;

pub struct OpenAIRequestBuilder {
    config: TTSConfig,
}

impl OpenAIRequestBuilder {
    pub fn new(config: TTSConfig) -> Self {
        Self { config }
    }
}

impl TTSRequestBuilder for OpenAIRequestBuilder {
    fn build_http_request(
        &self,
        client: &reqwest::Client,
        text: &str,
    ) -> Result<reqwest::RequestBuilder, TTSError> {
        let body = json!({
            "model": self.config.model.as_deref().unwrap_or(DEFAULT_MODEL),
            "input": text,
            "voice": self.config.voice.as_deref().unwrap_or(DEFAULT_VOICE),
            "response_format": "pcm",
        });

        Ok(client
            .post(OPENAI_TTS_URL)
            .bearer_auth(&self.config.api_key)
            .json(&body))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn trailing_silence_ms(&self) -> u64 {
        TRAILING_SILENCE_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_applied() {
        let builder = OpenAIRequestBuilder::new(TTSConfig {
            provider: "openai".to_string(),
            api_key: "sk-test".to_string(),
            ..TTSConfig::default()
        });
        assert_eq!(builder.provider_name(), "openai");
        assert_eq!(builder.trailing_silence_ms(), 200);
        assert_eq!(builder.config.voice.as_deref().unwrap_or(DEFAULT_VOICE), "nova");
    }
}
