//! Base abstractions for speech-to-text providers.
//!
//! Providers come in two shapes: streaming (a live WebSocket that returns
//! interim and final transcripts as audio flows) and batch (audio is buffered
//! into utterances and POSTed as WAV). Both are driven through the same
//! [`BaseSTT`] trait; results and lifecycle changes arrive through a single
//! registered event callback.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A transcription result from an STT provider
#[derive(Debug, Clone, PartialEq)]
pub struct STTResult {
    /// The transcribed text
    pub transcript: String,
    /// Whether this is a final result (not an interim hypothesis)
    pub is_final: bool,
    /// Confidence score in [0.0, 1.0]
    pub confidence: f32,
}

impl STTResult {
    pub fn new(transcript: String, is_final: bool, confidence: f32) -> Self {
        Self {
            transcript,
            is_final,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Configuration for STT providers
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct STTConfig {
    pub provider: String,
    /// API key for the STT provider
    pub api_key: String,
    /// Language code for transcription (e.g. "en-US")
    pub language: String,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
    /// Model to use, when the provider supports a choice
    #[serde(default)]
    pub model: Option<String>,
    /// Emit interim results (streaming providers)
    pub interim_results: bool,
    /// Emit voice-activity events (streaming providers); enables barge-in
    pub vad_events: bool,
    /// Batch providers: flush the utterance buffer after this much silence
    pub silence_flush_ms: u64,
    /// Batch providers: hard cap on the utterance buffer in bytes
    pub max_buffer_bytes: usize,
    /// Batch providers: drop utterances shorter than this many bytes
    pub min_audio_bytes: usize,
    /// Batch providers: RMS threshold separating speech from silence
    pub energy_threshold: u32,
}

impl Default for STTConfig {
    fn default() -> Self {
        Self {
            provider: String::new(),
            api_key: String::new(),
            language: "en-US".to_string(),
            sample_rate: 16000,
            model: None,
            interim_results: true,
            vad_events: true,
            silence_flush_ms: 1500,
            // ~5 s of 16 kHz 16-bit mono
            max_buffer_bytes: 160_000,
            // ~100 ms
            min_audio_bytes: 3200,
            energy_threshold: 500,
        }
    }
}

/// Error types for STT operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum STTError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
}

/// Lifecycle and result events emitted by a provider
#[derive(Debug, Clone)]
pub enum STTEvent {
    /// The backing session is established
    Connected,
    /// A transcription result, interim or final
    Transcript(STTResult),
    /// The provider's VAD detected the start of speech (streaming only)
    SpeechStarted,
    /// The backing session ended
    Disconnected,
    /// A streaming or request error
    Error(STTError),
}

/// Callback invoked for every provider event
pub type STTEventCallback =
    Arc<dyn Fn(STTEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Base trait for speech-to-text providers
#[async_trait::async_trait]
pub trait BaseSTT: Send + Sync {
    /// Establish the backing session. Idempotent: connecting an already
    /// connected provider is a no-op.
    async fn connect(&mut self) -> Result<(), STTError>;

    /// Submit a chunk of 16 kHz, 16-bit LE, mono PCM.
    ///
    /// Streaming providers forward immediately; batch providers accumulate
    /// until silence or the buffer cap triggers a flush.
    async fn send_audio(&mut self, audio: Vec<u8>) -> Result<(), STTError>;

    /// Flush any buffered audio and close the session cleanly. A final
    /// transcript is emitted if one is produced.
    async fn finalize(&mut self) -> Result<(), STTError>;

    /// Tear down unconditionally; pending buffers are discarded.
    async fn disconnect(&mut self) -> Result<(), STTError>;

    /// Discard any internally buffered audio without closing the session.
    /// Called while the bridge itself is speaking so stale audio never
    /// produces a transcript.
    async fn clear_buffer(&mut self) -> Result<(), STTError> {
        Ok(())
    }

    /// Whether the provider is ready to accept audio
    fn is_ready(&self) -> bool;

    /// Whether the provider can signal `speech_started` early enough to
    /// support barge-in
    fn supports_barge_in(&self) -> bool {
        false
    }

    /// Register the event callback. Replaces any previous callback.
    fn on_event(&mut self, callback: STTEventCallback);

    /// Provider identification for logs
    fn provider_name(&self) -> &'static str;
}
