//! Shared HTTP synthesis engine.
//!
//! Every wired TTS vendor is a plain request/response HTTP API; the engine
//! owns the pooled client, timeout, status handling and trailing-silence
//! padding, while a [`TTSRequestBuilder`] describes the vendor-specific
//! request shape.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use async_trait::async_trait;

use super::base::{BaseTTS, TTSConfig, TTSError, TTSResult};
use crate::core::audio;

/// Vendor-specific request construction
pub trait TTSRequestBuilder: Send + Sync {
    /// Build the synthesis POST for one utterance
    fn build_http_request(
        &self,
        client: &reqwest::Client,
        text: &str,
    ) -> Result<reqwest::RequestBuilder, TTSError>;

    fn provider_name(&self) -> &'static str;

    /// Silence appended after the synthesized audio, avoiding end-of-utterance
    /// clipping on vendors that stop abruptly
    fn trailing_silence_ms(&self) -> u64 {
        0
    }
}

/// HTTP-based TTS provider, parameterized by a [`TTSRequestBuilder`]
pub struct HttpTTS {
    builder: Arc<dyn TTSRequestBuilder>,
    client: reqwest::Client,
    sample_rate: u32,
}

impl HttpTTS {
    pub fn new(builder: Arc<dyn TTSRequestBuilder>, config: &TTSConfig) -> TTSResult<Self> {
        if config.api_key.is_empty() {
            return Err(TTSError::InvalidConfiguration(format!(
                "{} API key is required",
                builder.provider_name()
            )));
        }
        Ok(Self {
            builder,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.request_timeout_secs))
                .build()
                .unwrap_or_default(),
            sample_rate: config.sample_rate,
        })
    }
}

#[async_trait]
impl BaseTTS for HttpTTS {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn provider_name(&self) -> &'static str {
        self.builder.provider_name()
    }

    async fn synthesize(&self, text: &str) -> TTSResult<Vec<u8>> {
        let request = self.builder.build_http_request(&self.client, text)?;
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TTSError::ProviderError {
                status: status.as_u16(),
                body,
            });
        }

        let mut pcm = response.bytes().await?.to_vec();
        // Keep sample alignment if the vendor returned an odd byte count
        if pcm.len() % 2 != 0 {
            pcm.pop();
        }

        let silence_ms = self.builder.trailing_silence_ms();
        if silence_ms > 0 {
            let samples = (self.sample_rate as u64 * silence_ms / 1000) as usize;
            pcm.resize(pcm.len() + samples * 2, 0u8);
        }

        debug!(
            provider = self.provider_name(),
            bytes = pcm.len(),
            duration_ms = audio::audio_duration_ms(pcm.len(), self.sample_rate),
            "synthesis complete"
        );
        Ok(pcm)
    }
}
