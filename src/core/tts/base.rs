//! Base abstractions for text-to-speech providers.
//!
//! Every provider produces 16-bit little-endian mono PCM at a known sample
//! rate (24 kHz for all currently wired providers). Providers are stateless
//! between requests and shared across calls; only the underlying HTTP client
//! is held.

use async_trait::async_trait;

use crate::core::audio;

/// Configuration for TTS providers
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct TTSConfig {
    pub provider: String,
    /// API key for the TTS provider
    pub api_key: String,
    /// Voice ID or name, provider-specific
    #[serde(default)]
    pub voice: Option<String>,
    /// Model ID, provider-specific
    #[serde(default)]
    pub model: Option<String>,
    /// Output sample rate in Hz
    pub sample_rate: u32,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for TTSConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            api_key: String::new(),
            voice: None,
            model: None,
            sample_rate: audio::TTS_SAMPLE_RATE,
            request_timeout_secs: 30,
        }
    }
}

/// TTS-specific error types
#[derive(Debug, thiserror::Error)]
pub enum TTSError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("Provider error ({status}): {body}")]
    ProviderError { status: u16, body: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for TTS operations
pub type TTSResult<T> = Result<T, TTSError>;

/// Base trait for text-to-speech providers.
///
/// Implementations must be safe under concurrent `synthesize` calls; the call
/// manager shares one provider instance across all live calls.
#[async_trait]
pub trait BaseTTS: Send + Sync {
    /// Output sample rate of `synthesize`
    fn sample_rate(&self) -> u32;

    /// Provider identification for logs
    fn provider_name(&self) -> &'static str;

    /// Synthesize text to 16-bit LE mono PCM at `sample_rate()`
    async fn synthesize(&self, text: &str) -> TTSResult<Vec<u8>>;

    /// Synthesize and reframe as carrier-ready 160-byte mu-law frames
    async fn synthesize_for_twilio(&self, text: &str) -> TTSResult<Vec<Vec<u8>>> {
        let pcm = self.synthesize(text).await?;
        Ok(audio::convert_to_twilio(&pcm, self.sample_rate()))
    }
}
