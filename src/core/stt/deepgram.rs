//! Streaming STT over Deepgram's live transcription WebSocket.
//!
//! Audio is forwarded to the socket as it arrives; transcripts and VAD events
//! flow back asynchronously. Abnormal disconnects are retried up to
//! [`MAX_RECONNECT_ATTEMPTS`] times with linear backoff; audio submitted while
//! the link is down queues in order and is flushed on reconnect.

use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::base::{BaseSTT, STTConfig, STTError, STTEvent, STTEventCallback, STTResult};

const DEEPGRAM_WS_URL: &str = "wss://api.deepgram.com/v1/listen";
const DEFAULT_MODEL: &str = "nova-2";
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Subset of Deepgram's live transcription response
#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    #[serde(rename = "type")]
    response_type: String,
    #[serde(default)]
    channel: Option<DeepgramChannel>,
    #[serde(default)]
    is_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    confidence: f32,
}

/// Deepgram live transcription client
pub struct DeepgramSTT {
    config: STTConfig,
    state: Arc<RwLock<ConnectionState>>,
    ws_sender: Option<mpsc::UnboundedSender<Message>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    callback: Arc<RwLock<Option<STTEventCallback>>>,
    connection_handle: Option<tokio::task::JoinHandle<()>>,
}

impl DeepgramSTT {
    pub fn new(config: STTConfig) -> Result<Self, STTError> {
        if config.api_key.is_empty() {
            return Err(STTError::ConfigurationError(
                "Deepgram API key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            ws_sender: None,
            shutdown_tx: None,
            callback: Arc::new(RwLock::new(None)),
            connection_handle: None,
        })
    }

    /// Build the WebSocket URL with query parameters
    fn build_websocket_url(config: &STTConfig) -> Result<String, STTError> {
        let mut url = Url::parse(DEEPGRAM_WS_URL)
            .map_err(|e| STTError::ConfigurationError(format!("Invalid WebSocket URL: {e}")))?;

        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair(
                "model",
                config.model.as_deref().unwrap_or(DEFAULT_MODEL),
            );
            query_pairs.append_pair("language", &config.language);
            query_pairs.append_pair("encoding", "linear16");
            query_pairs.append_pair("sample_rate", &config.sample_rate.to_string());
            query_pairs.append_pair("channels", "1");
            query_pairs.append_pair("punctuate", "true");
            query_pairs.append_pair("interim_results", &config.interim_results.to_string());
            query_pairs.append_pair("vad_events", &config.vad_events.to_string());
        }

        Ok(url.to_string())
    }

    async fn emit(callback: &Arc<RwLock<Option<STTEventCallback>>>, event: STTEvent) {
        let cb = callback.read().clone();
        if let Some(cb) = cb {
            cb(event).await;
        }
    }

    /// Handle one text frame from Deepgram
    async fn handle_text(text: &str, callback: &Arc<RwLock<Option<STTEventCallback>>>) {
        let response: DeepgramResponse = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "unparseable Deepgram response");
                return;
            }
        };

        match response.response_type.as_str() {
            "Results" => {
                if let Some(channel) = response.channel {
                    if let Some(alternative) = channel.alternatives.first() {
                        if alternative.transcript.is_empty() {
                            return;
                        }
                        let result = STTResult::new(
                            alternative.transcript.clone(),
                            response.is_final.unwrap_or(false),
                            alternative.confidence,
                        );
                        Self::emit(callback, STTEvent::Transcript(result)).await;
                    }
                }
            }
            "SpeechStarted" => {
                Self::emit(callback, STTEvent::SpeechStarted).await;
            }
            "Metadata" | "UtteranceEnd" => {
                debug!(response_type = %response.response_type, "Deepgram control message");
            }
            other => debug!(response_type = %other, "unhandled Deepgram response type"),
        }
    }

    /// Connection task: connects, pumps messages, and reconnects with linear
    /// backoff on abnormal closure. Outgoing audio queues in `ws_rx` while the
    /// link is down and flushes in order once it is back.
    async fn connection_task(
        ws_url: String,
        api_key: String,
        mut ws_rx: mpsc::UnboundedReceiver<Message>,
        mut shutdown_rx: broadcast::Receiver<()>,
        state: Arc<RwLock<ConnectionState>>,
        callback: Arc<RwLock<Option<STTEventCallback>>>,
    ) {
        let mut attempt: u32 = 0;

        'outer: loop {
            *state.write() = ConnectionState::Connecting;

            let request = match ws_url.as_str().into_client_request() {
                Ok(mut request) => {
                    let header = format!("Token {api_key}");
                    match header.parse::<tokio_tungstenite::tungstenite::http::HeaderValue>() {
                        Ok(value) => {
                            request.headers_mut().insert("Authorization", value);
                            request
                        }
                        Err(_) => {
                            Self::emit(
                                &callback,
                                STTEvent::Error(STTError::ConfigurationError(
                                    "API key contains invalid header characters".to_string(),
                                )),
                            )
                            .await;
                            break;
                        }
                    }
                }
                Err(e) => {
                    Self::emit(
                        &callback,
                        STTEvent::Error(STTError::ConfigurationError(e.to_string())),
                    )
                    .await;
                    break;
                }
            };

            match connect_async(request).await {
                Ok((ws_stream, _)) => {
                    attempt = 0;
                    *state.write() = ConnectionState::Connected;
                    info!("connected to Deepgram live transcription");
                    Self::emit(&callback, STTEvent::Connected).await;

                    let (mut sink, mut source) = ws_stream.split();
                    let mut clean_close = false;

                    loop {
                        tokio::select! {
                            outgoing = ws_rx.recv() => match outgoing {
                                Some(message) => {
                                    if let Err(e) = sink.send(message).await {
                                        warn!(error = %e, "Deepgram send failed");
                                        break;
                                    }
                                }
                                None => {
                                    clean_close = true;
                                    break;
                                }
                            },
                            incoming = source.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    Self::handle_text(text.as_str(), &callback).await;
                                }
                                Some(Ok(Message::Close(_))) => {
                                    clean_close = true;
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(error = %e, "Deepgram socket error");
                                    break;
                                }
                                None => break,
                            },
                            _ = shutdown_rx.recv() => {
                                let _ = sink.send(Message::Close(None)).await;
                                clean_close = true;
                                break;
                            }
                        }
                    }

                    if clean_close {
                        break 'outer;
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempt, "failed to connect to Deepgram");
                }
            }

            attempt += 1;
            if attempt > MAX_RECONNECT_ATTEMPTS {
                error!("Deepgram reconnect attempts exhausted");
                Self::emit(
                    &callback,
                    STTEvent::Error(STTError::ConnectionFailed(
                        "reconnect attempts exhausted".to_string(),
                    )),
                )
                .await;
                break;
            }

            // Linear backoff: 1 s x attempt number
            let backoff = Duration::from_secs(attempt as u64);
            info!(attempt, backoff_secs = backoff.as_secs(), "reconnecting to Deepgram");
            tokio::time::sleep(backoff).await;
        }

        *state.write() = ConnectionState::Disconnected;
        Self::emit(&callback, STTEvent::Disconnected).await;
    }
}

#[async_trait::async_trait]
impl BaseSTT for DeepgramSTT {
    async fn connect(&mut self) -> Result<(), STTError> {
        if self.connection_handle.is_some() {
            return Ok(());
        }

        let ws_url = Self::build_websocket_url(&self.config)?;
        let (ws_tx, ws_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        self.ws_sender = Some(ws_tx);
        self.shutdown_tx = Some(shutdown_tx);

        let handle = tokio::spawn(Self::connection_task(
            ws_url,
            self.config.api_key.clone(),
            ws_rx,
            shutdown_rx,
            self.state.clone(),
            self.callback.clone(),
        ));
        self.connection_handle = Some(handle);
        Ok(())
    }

    async fn send_audio(&mut self, audio: Vec<u8>) -> Result<(), STTError> {
        let sender = self
            .ws_sender
            .as_ref()
            .ok_or_else(|| STTError::ConnectionFailed("not connected".to_string()))?;
        sender
            .send(Message::Binary(audio.into()))
            .map_err(|_| STTError::ConnectionFailed("connection task ended".to_string()))
    }

    async fn finalize(&mut self) -> Result<(), STTError> {
        if let Some(sender) = &self.ws_sender {
            // Deepgram flushes pending results and closes on CloseStream
            let _ = sender.send(Message::Text(r#"{"type":"CloseStream"}"#.into()));
        }
        self.ws_sender = None;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), STTError> {
        if let Some(shutdown) = self.shutdown_tx.take() {
            let _ = shutdown.send(());
        }
        self.ws_sender = None;
        if let Some(mut handle) = self.connection_handle.take() {
            // Give the task a moment to close the socket, then abort
            if tokio::time::timeout(Duration::from_secs(2), &mut handle)
                .await
                .is_err()
            {
                debug!("Deepgram connection task did not exit in time");
                handle.abort();
            }
        }
        *self.state.write() = ConnectionState::Disconnected;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        *self.state.read() == ConnectionState::Connected
    }

    fn supports_barge_in(&self) -> bool {
        self.config.vad_events
    }

    fn on_event(&mut self, callback: STTEventCallback) {
        *self.callback.write() = Some(callback);
    }

    fn provider_name(&self) -> &'static str {
        "deepgram"
    }
}
