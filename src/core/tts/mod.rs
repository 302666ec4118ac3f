pub mod base;
pub mod deepgram;
pub mod elevenlabs;
pub mod openai;
pub mod provider;

pub use base::{BaseTTS, TTSConfig, TTSError, TTSResult};
pub use provider::{HttpTTS, TTSRequestBuilder};

use std::sync::Arc;

use deepgram::DeepgramRequestBuilder;
use elevenlabs::ElevenLabsRequestBuilder;
use openai::OpenAIRequestBuilder;

/// Create a TTS provider from configuration.
///
/// The returned provider is shared across every live call; it holds no
/// per-call state.
pub fn create_tts_provider(config: &TTSConfig) -> TTSResult<Arc<dyn BaseTTS>> {
    let builder: Arc<dyn TTSRequestBuilder> = match config.provider.to_lowercase().as_str() {
        "openai" => Arc::new(OpenAIRequestBuilder::new(config.clone())),
        "deepgram" => Arc::new(DeepgramRequestBuilder::new(config.clone())),
        "elevenlabs" => Arc::new(ElevenLabsRequestBuilder::new(config.clone())),
        other => {
            return Err(TTSError::InvalidConfiguration(format!(
                "Unknown TTS provider: {other}"
            )));
        }
    };
    Ok(Arc::new(HttpTTS::new(builder, config)?))
}

/// Supported TTS provider names
pub fn supported_tts_providers() -> Vec<&'static str> {
    vec!["openai", "deepgram", "elevenlabs"]
}
