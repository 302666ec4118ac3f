//! Batch speech-to-text over provider HTTP APIs.
//!
//! Inbound PCM accumulates in an utterance buffer. The buffer is wrapped in a
//! WAV container and POSTed when either the idle-silence timer fires or the
//! hard byte cap is hit. Utterances below the provider minimum are dropped -
//! they transcribe to noise.
//!
//! A shared engine drives the buffering, silence detection and retrying;
//! providers only describe how to build their HTTP request and read their
//! response shape.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::base::{BaseSTT, STTConfig, STTError, STTEvent, STTEventCallback, STTResult};
use super::normalize_language;
use crate::core::audio;

/// Silence watchdog tick interval
const WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);
/// Transient HTTP statuses worth retrying
const RETRYABLE_STATUS: [u16; 4] = [429, 500, 502, 503];
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Provider-specific request construction and response parsing
pub trait BatchRequestBuilder: Send + Sync {
    /// Build the transcription POST for one WAV-wrapped utterance
    fn build_request(
        &self,
        client: &reqwest::Client,
        wav: Vec<u8>,
        config: &STTConfig,
    ) -> Result<reqwest::RequestBuilder, STTError>;

    /// Extract `(text, confidence)` from a successful response body
    fn parse_response(&self, body: &Value) -> Option<(String, f32)>;

    fn provider_name(&self) -> &'static str;
}

struct BatchShared {
    buffer: Mutex<Vec<u8>>,
    last_speech: Mutex<Instant>,
    has_speech: AtomicBool,
    callback: parking_lot::RwLock<Option<STTEventCallback>>,
}

/// Buffering batch STT engine, parameterized by a [`BatchRequestBuilder`]
pub struct BatchSTT {
    config: STTConfig,
    builder: Arc<dyn BatchRequestBuilder>,
    client: reqwest::Client,
    shared: Arc<BatchShared>,
    watchdog: Option<JoinHandle<()>>,
    connected: bool,
}

impl BatchSTT {
    pub fn new(config: STTConfig, builder: Arc<dyn BatchRequestBuilder>) -> Result<Self, STTError> {
        if config.api_key.is_empty() {
            return Err(STTError::ConfigurationError(format!(
                "{} API key is required",
                builder.provider_name()
            )));
        }
        Ok(Self {
            config,
            builder,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            shared: Arc::new(BatchShared {
                buffer: Mutex::new(Vec::new()),
                last_speech: Mutex::new(Instant::now()),
                has_speech: AtomicBool::new(false),
                callback: parking_lot::RwLock::new(None),
            }),
            watchdog: None,
            connected: false,
        })
    }

    async fn emit(shared: &Arc<BatchShared>, event: STTEvent) {
        let cb = shared.callback.read().clone();
        if let Some(cb) = cb {
            cb(event).await;
        }
    }

    /// Take the buffered utterance and POST it, retrying transient failures
    /// with exponential backoff.
    async fn flush(
        client: reqwest::Client,
        builder: Arc<dyn BatchRequestBuilder>,
        config: STTConfig,
        shared: Arc<BatchShared>,
    ) {
        let pcm = {
            let mut buffer = shared.buffer.lock();
            shared.has_speech.store(false, Ordering::Release);
            std::mem::take(&mut *buffer)
        };

        if pcm.len() < config.min_audio_bytes {
            if !pcm.is_empty() {
                debug!(
                    bytes = pcm.len(),
                    duration_ms = audio::audio_duration_ms(pcm.len(), config.sample_rate),
                    "utterance too short, dropping"
                );
            }
            return;
        }

        let wav = audio::wav_from_pcm(&pcm, config.sample_rate, 1);
        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY * 2u32.pow(attempt - 1);
                warn!(
                    provider = builder.provider_name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying batch transcription"
                );
                tokio::time::sleep(delay).await;
            }

            let request = match builder.build_request(&client, wav.clone(), &config) {
                Ok(request) => request,
                Err(e) => {
                    Self::emit(&shared, STTEvent::Error(e)).await;
                    return;
                }
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body: Value = match response.json().await {
                            Ok(body) => body,
                            Err(e) => {
                                last_error = e.to_string();
                                continue;
                            }
                        };
                        if let Some((text, confidence)) = builder.parse_response(&body) {
                            if !text.is_empty() {
                                Self::emit(
                                    &shared,
                                    STTEvent::Transcript(STTResult::new(text, true, confidence)),
                                )
                                .await;
                            }
                        }
                        return;
                    }

                    last_error = format!("HTTP {}", status.as_u16());
                    if !RETRYABLE_STATUS.contains(&status.as_u16()) {
                        break;
                    }
                }
                Err(e) => last_error = e.to_string(),
            }
        }

        warn!(
            provider = builder.provider_name(),
            error = %last_error,
            "batch transcription failed"
        );
        Self::emit(
            &shared,
            STTEvent::Error(STTError::NetworkError(last_error)),
        )
        .await;
    }

    fn spawn_watchdog(&self) -> JoinHandle<()> {
        let shared = self.shared.clone();
        let client = self.client.clone();
        let builder = self.builder.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
            loop {
                interval.tick().await;

                let due = {
                    let buffer = shared.buffer.lock();
                    !buffer.is_empty()
                        && shared.has_speech.load(Ordering::Acquire)
                        && shared.last_speech.lock().elapsed()
                            >= Duration::from_millis(config.silence_flush_ms)
                };
                if due {
                    Self::flush(
                        client.clone(),
                        builder.clone(),
                        config.clone(),
                        shared.clone(),
                    )
                    .await;
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl BaseSTT for BatchSTT {
    async fn connect(&mut self) -> Result<(), STTError> {
        if self.connected {
            return Ok(());
        }
        self.watchdog = Some(self.spawn_watchdog());
        self.connected = true;
        Self::emit(&self.shared, STTEvent::Connected).await;
        Ok(())
    }

    async fn send_audio(&mut self, audio_data: Vec<u8>) -> Result<(), STTError> {
        if !self.connected {
            return Err(STTError::ConnectionFailed("not connected".to_string()));
        }

        let flush_now = {
            let mut buffer = self.shared.buffer.lock();
            buffer.extend_from_slice(&audio_data);

            if audio::has_speech_energy(&audio_data, self.config.energy_threshold) {
                *self.shared.last_speech.lock() = Instant::now();
                self.shared.has_speech.store(true, Ordering::Release);
            }

            buffer.len() >= self.config.max_buffer_bytes
        };

        if flush_now {
            Self::flush(
                self.client.clone(),
                self.builder.clone(),
                self.config.clone(),
                self.shared.clone(),
            )
            .await;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), STTError> {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        if self.connected {
            Self::flush(
                self.client.clone(),
                self.builder.clone(),
                self.config.clone(),
                self.shared.clone(),
            )
            .await;
            self.connected = false;
            Self::emit(&self.shared, STTEvent::Disconnected).await;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), STTError> {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
        self.shared.buffer.lock().clear();
        self.shared.has_speech.store(false, Ordering::Release);
        if self.connected {
            self.connected = false;
            Self::emit(&self.shared, STTEvent::Disconnected).await;
        }
        Ok(())
    }

    async fn clear_buffer(&mut self) -> Result<(), STTError> {
        self.shared.buffer.lock().clear();
        self.shared.has_speech.store(false, Ordering::Release);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.connected
    }

    fn on_event(&mut self, callback: STTEventCallback) {
        *self.shared.callback.write() = Some(callback);
    }

    fn provider_name(&self) -> &'static str {
        self.builder.provider_name()
    }
}

impl Drop for BatchSTT {
    fn drop(&mut self) {
        if let Some(watchdog) = self.watchdog.take() {
            watchdog.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Provider request builders
// ---------------------------------------------------------------------------

fn wav_part(wav: Vec<u8>, field: &str) -> Result<reqwest::multipart::Form, STTError> {
    let part = reqwest::multipart::Part::bytes(wav)
        .file_name("audio.wav")
        .mime_str("audio/wav")
        .map_err(|e| STTError::ConfigurationError(e.to_string()))?;
    Ok(reqwest::multipart::Form::new().part(field.to_string(), part))
}

/// OpenAI Whisper transcription endpoint
pub struct OpenAIBatchBuilder;

impl BatchRequestBuilder for OpenAIBatchBuilder {
    fn build_request(
        &self,
        client: &reqwest::Client,
        wav: Vec<u8>,
        config: &STTConfig,
    ) -> Result<reqwest::RequestBuilder, STTError> {
        let form = wav_part(wav, "file")?
            .text(
                "model",
                config
                    .model
                    .clone()
                    .unwrap_or_else(|| "whisper-1".to_string()),
            )
            .text("language", normalize_language(&config.language))
            .text("response_format", "json");
        Ok(client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&config.api_key)
            .multipart(form))
    }

    fn parse_response(&self, body: &Value) -> Option<(String, f32)> {
        body.get("text")
            .and_then(Value::as_str)
            .map(|text| (text.trim().to_string(), 1.0))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Groq's hosted Whisper, OpenAI-compatible surface
pub struct GroqBatchBuilder;

impl BatchRequestBuilder for GroqBatchBuilder {
    fn build_request(
        &self,
        client: &reqwest::Client,
        wav: Vec<u8>,
        config: &STTConfig,
    ) -> Result<reqwest::RequestBuilder, STTError> {
        let form = wav_part(wav, "file")?
            .text(
                "model",
                config
                    .model
                    .clone()
                    .unwrap_or_else(|| "whisper-large-v3-turbo".to_string()),
            )
            .text("language", normalize_language(&config.language))
            .text("response_format", "json");
        Ok(client
            .post("https://api.groq.com/openai/v1/audio/transcriptions")
            .bearer_auth(&config.api_key)
            .multipart(form))
    }

    fn parse_response(&self, body: &Value) -> Option<(String, f32)> {
        body.get("text")
            .and_then(Value::as_str)
            .map(|text| (text.trim().to_string(), 1.0))
    }

    fn provider_name(&self) -> &'static str {
        "groq"
    }
}

/// ElevenLabs Scribe transcription
pub struct ElevenLabsBatchBuilder;

impl BatchRequestBuilder for ElevenLabsBatchBuilder {
    fn build_request(
        &self,
        client: &reqwest::Client,
        wav: Vec<u8>,
        config: &STTConfig,
    ) -> Result<reqwest::RequestBuilder, STTError> {
        let form = wav_part(wav, "audio")?
            .text(
                "model_id",
                config
                    .model
                    .clone()
                    .unwrap_or_else(|| "scribe_v1".to_string()),
            )
            .text("language_code", normalize_language(&config.language));
        Ok(client
            .post("https://api.elevenlabs.io/v1/speech-to-text")
            .header("xi-api-key", &config.api_key)
            .multipart(form))
    }

    fn parse_response(&self, body: &Value) -> Option<(String, f32)> {
        body.get("text")
            .and_then(Value::as_str)
            .map(|text| (text.trim().to_string(), 1.0))
    }

    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::samples_to_pcm_bytes;

    fn config(provider: &str) -> STTConfig {
        STTConfig {
            provider: provider.to_string(),
            api_key: "test-key".to_string(),
            ..STTConfig::default()
        }
    }

    fn collector() -> (STTEventCallback, Arc<Mutex<Vec<STTEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: STTEventCallback = Arc::new(move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().push(event);
            })
        });
        (callback, events)
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mut stt = BatchSTT::new(config("openai"), Arc::new(OpenAIBatchBuilder)).unwrap();
        let (callback, events) = collector();
        stt.on_event(callback);

        assert!(!stt.is_ready());
        stt.connect().await.unwrap();
        stt.connect().await.unwrap();
        assert!(stt.is_ready());

        // A single Connected event despite two connects
        tokio::task::yield_now().await;
        let events = events.lock();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, STTEvent::Connected))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_send_audio_requires_connect() {
        let mut stt = BatchSTT::new(config("groq"), Arc::new(GroqBatchBuilder)).unwrap();
        assert!(matches!(
            stt.send_audio(vec![0u8; 320]).await,
            Err(STTError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_short_buffer_dropped_on_finalize() {
        let mut stt = BatchSTT::new(config("openai"), Arc::new(OpenAIBatchBuilder)).unwrap();
        let (callback, events) = collector();
        stt.on_event(callback);
        stt.connect().await.unwrap();

        // 50 ms of audio: below the 100 ms minimum, must not produce a POST
        let short = samples_to_pcm_bytes(&vec![2000i16; 800]);
        stt.send_audio(short).await.unwrap();
        stt.finalize().await.unwrap();

        let events = events.lock();
        assert!(
            events
                .iter()
                .all(|e| !matches!(e, STTEvent::Transcript(_) | STTEvent::Error(_)))
        );
        assert!(events.iter().any(|e| matches!(e, STTEvent::Disconnected)));
    }

    #[tokio::test]
    async fn test_clear_buffer_discards_audio() {
        let mut stt = BatchSTT::new(config("openai"), Arc::new(OpenAIBatchBuilder)).unwrap();
        stt.connect().await.unwrap();

        stt.send_audio(samples_to_pcm_bytes(&vec![2000i16; 1600]))
            .await
            .unwrap();
        assert!(!stt.shared.buffer.lock().is_empty());

        stt.clear_buffer().await.unwrap();
        assert!(stt.shared.buffer.lock().is_empty());
        assert!(!stt.shared.has_speech.load(Ordering::Acquire));
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let mut bad = config("openai");
        bad.api_key = String::new();
        assert!(BatchSTT::new(bad, Arc::new(OpenAIBatchBuilder)).is_err());
    }

    #[test]
    fn test_response_parsing() {
        let builder = OpenAIBatchBuilder;
        let body = serde_json::json!({"text": "  hello there  "});
        assert_eq!(
            builder.parse_response(&body),
            Some(("hello there".to_string(), 1.0))
        );
        assert_eq!(builder.parse_response(&serde_json::json!({})), None);

        let eleven = ElevenLabsBatchBuilder;
        let body = serde_json::json!({"language_code": "en", "text": "hi"});
        assert_eq!(eleven.parse_response(&body), Some(("hi".to_string(), 1.0)));
    }
}
