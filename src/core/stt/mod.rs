pub mod base;
pub mod batch;
pub mod deepgram;

pub use base::{BaseSTT, STTConfig, STTError, STTEvent, STTEventCallback, STTResult};
pub use batch::{
    BatchRequestBuilder, BatchSTT, ElevenLabsBatchBuilder, GroqBatchBuilder, OpenAIBatchBuilder,
};
pub use deepgram::DeepgramSTT;

use std::sync::Arc;

/// Normalize a language tag to its ISO 639-1 two-letter form.
///
/// Several providers reject region-qualified tags ("en-US"), so everything
/// before the first `-` or `_` is kept, lowercased.
pub fn normalize_language(language: &str) -> String {
    language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_lowercase()
}

/// Create an STT provider from configuration.
///
/// Each call gets its own instance: streaming providers hold a stateful
/// session and batch providers hold a per-call utterance buffer.
pub fn create_stt_provider(config: &STTConfig) -> Result<Box<dyn BaseSTT>, STTError> {
    match config.provider.to_lowercase().as_str() {
        "deepgram" => Ok(Box::new(DeepgramSTT::new(config.clone())?)),
        "openai" => Ok(Box::new(BatchSTT::new(
            config.clone(),
            Arc::new(OpenAIBatchBuilder),
        )?)),
        "groq" => Ok(Box::new(BatchSTT::new(
            config.clone(),
            Arc::new(GroqBatchBuilder),
        )?)),
        "elevenlabs" => Ok(Box::new(BatchSTT::new(
            config.clone(),
            Arc::new(ElevenLabsBatchBuilder),
        )?)),
        other => Err(STTError::ConfigurationError(format!(
            "Unknown STT provider: {other}"
        ))),
    }
}

/// Supported STT provider names
pub fn supported_stt_providers() -> Vec<&'static str> {
    vec!["deepgram", "openai", "groq", "elevenlabs"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("en-US"), "en");
        assert_eq!(normalize_language("en_GB"), "en");
        assert_eq!(normalize_language("TR"), "tr");
        assert_eq!(normalize_language("de"), "de");
    }

    #[test]
    fn test_factory_dispatch() {
        for provider in supported_stt_providers() {
            let config = STTConfig {
                provider: provider.to_string(),
                api_key: "key".to_string(),
                ..STTConfig::default()
            };
            let stt = create_stt_provider(&config).unwrap();
            assert_eq!(stt.provider_name(), provider);
        }
    }

    #[test]
    fn test_factory_rejects_unknown_provider() {
        let config = STTConfig {
            provider: "vapor".to_string(),
            api_key: "key".to_string(),
            ..STTConfig::default()
        };
        assert!(matches!(
            create_stt_provider(&config),
            Err(STTError::ConfigurationError(_))
        ));
    }
}
