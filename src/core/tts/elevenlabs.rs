//! ElevenLabs speech synthesis.
//!
//! `POST /v1/text-to-speech/{voice}?output_format=pcm_24000` returns raw
//! 24 kHz 16-bit mono PCM.

use serde_json::json;

use super::base::{TTSConfig, TTSError};
use super::provider::TTSRequestBuilder;

const ELEVENLABS_TTS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const DEFAULT_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";
const DEFAULT_MODEL: &str = "eleven_multilingual_v2";

pub struct ElevenLabsRequestBuilder {
    config: TTSConfig,
}

impl ElevenLabsRequestBuilder {
    pub fn new(config: TTSConfig) -> Self {
        Self { config }
    }

    fn output_format(&self) -> String {
        match self.config.sample_rate {
            16000 => "pcm_16000".to_string(),
            22050 => "pcm_22050".to_string(),
            44100 => "pcm_44100".to_string(),
            _ => "pcm_24000".to_string(),
        }
    }
}

impl TTSRequestBuilder for ElevenLabsRequestBuilder {
    fn build_http_request(
        &self,
        client: &reqwest::Client,
        text: &str,
    ) -> Result<reqwest::RequestBuilder, TTSError> {
        let voice = self.config.voice.as_deref().unwrap_or(DEFAULT_VOICE);
        let url = format!("{ELEVENLABS_TTS_URL}/{voice}");

        let body = json!({
            "text": text,
            "model_id": self.config.model.as_deref().unwrap_or(DEFAULT_MODEL),
            "voice_settings": {
                "stability": 0.5,
                "similarity_boost": 0.75,
                "style": 0.0,
                "use_speaker_boost": true,
            },
        });

        Ok(client
            .post(url)
            .header("xi-api-key", &self.config.api_key)
            .header("Accept", "audio/pcm")
            .query(&[("output_format", self.output_format())])
            .json(&body))
    }

    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_tracks_sample_rate() {
        let mut config = TTSConfig {
            provider: "elevenlabs".to_string(),
            api_key: "xi-test".to_string(),
            ..TTSConfig::default()
        };
        assert_eq!(
            ElevenLabsRequestBuilder::new(config.clone()).output_format(),
            "pcm_24000"
        );
        config.sample_rate = 16000;
        assert_eq!(
            ElevenLabsRequestBuilder::new(config).output_format(),
            "pcm_16000"
        );
    }
}
