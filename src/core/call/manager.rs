//! Call manager: owns every live call and wires stream, STT, TTS and the
//! agent together per call.
//!
//! Each call runs an independent pump task that merges media-stream events
//! and STT events and enforces the turn-taking discipline: inbound audio only
//! reaches STT while the call is `listening`, and the bridge never talks over
//! its own playback. Mutation of a call record is serialized through its own
//! lock; the calls map takes a separate coarse lock for insert and lookup.

use futures::{Sink, Stream};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use axum::extract::ws::Message;

use super::record::{CallRecord, CallSummary, ConversationState, SignalingState};
use crate::core::stream::{MediaStreamSession, SessionError, SessionEvent, SessionHandle};
use crate::core::stt::{BaseSTT, STTConfig, STTError, STTEvent, create_stt_provider};
use crate::core::tts::{BaseTTS, TTSError};
use crate::twilio::{CarrierError, GatherOptions, TwilioClient, TwimlResponse};
use crate::utils::normalize_phone_number;

/// Spoken to the caller when the agent cannot produce a reply
pub const FALLBACK_APOLOGY: &str = "Sorry, I couldn't process that; please try again.";

const DEFAULT_SPEAK_AND_LISTEN_TIMEOUT_MS: u64 = 30_000;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Errors surfaced by call manager operations
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("call not found: {0}")]
    NotFound(String),
    #[error("call is already speaking")]
    AlreadySpeaking,
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("webhook base URL is not configured")]
    MissingBaseUrl,
    #[error(transparent)]
    Carrier(#[from] CarrierError),
    #[error(transparent)]
    Tts(#[from] TTSError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl From<CallError> for crate::errors::AppError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::NotFound(sid) => Self::NotFound(format!("call not found: {sid}")),
            CallError::AlreadySpeaking => Self::BadRequest("call is already speaking".to_string()),
            CallError::MissingParameter(name) => {
                Self::BadRequest(format!("missing parameter: {name}"))
            }
            other => Self::InternalServerError(other.to_string()),
        }
    }
}

/// Events broadcast by the manager to interested subscribers (the webhook
/// server's agent forwarder, `speak_and_listen` waiters).
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// A final user transcript was accepted for a call
    Transcription {
        call_sid: String,
        from: String,
        text: String,
        confidence: f32,
    },
    /// The caller pressed digits; surfaced, never interpreted
    Dtmf { call_sid: String, digits: String },
    /// Bridge playback ended; `interrupted` marks barge-in truncation
    SpeechEnded { call_sid: String, interrupted: bool },
    /// The call reached a terminal state
    Ended { call_sid: String },
}

/// Per-call STT instances are built through this factory, letting tests plug
/// in fakes.
pub type SttFactory =
    Arc<dyn Fn(&STTConfig) -> Result<Box<dyn BaseSTT>, STTError> + Send + Sync>;

/// Construction options for [`CallManager`]
pub struct CallManagerOptions {
    pub stt_config: STTConfig,
    pub webhook_base_url: Option<String>,
    pub default_country: String,
    /// Carrier-side `<Say>` voice used for TwiML fallbacks
    pub say_voice: String,
    /// BCP-47 tag for carrier-side speech verbs
    pub language: String,
    /// Cut off bridge playback when the caller starts talking
    pub barge_in: bool,
    /// Inbound audio flush threshold in 20 ms frames
    pub flush_frames: usize,
    /// Override the STT provider factory; None uses the configured provider
    pub stt_factory: Option<SttFactory>,
}

struct CallHandle {
    record: tokio::sync::Mutex<CallRecord>,
    session: Mutex<Option<SessionHandle>>,
    stt: tokio::sync::Mutex<Option<Box<dyn BaseSTT>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CallHandle {
    fn new(record: CallRecord) -> Self {
        Self {
            record: tokio::sync::Mutex::new(record),
            session: Mutex::new(None),
            stt: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

/// Orchestrates all live calls
pub struct CallManager {
    twilio: TwilioClient,
    tts: Arc<dyn BaseTTS>,
    stt_config: STTConfig,
    stt_factory: SttFactory,
    calls: RwLock<HashMap<String, Arc<CallHandle>>>,
    events_tx: broadcast::Sender<CallEvent>,
    webhook_base_url: Option<String>,
    default_country: String,
    say_voice: String,
    language: String,
    barge_in: bool,
    flush_frames: usize,
}

impl CallManager {
    pub fn new(
        options: CallManagerOptions,
        twilio: TwilioClient,
        tts: Arc<dyn BaseTTS>,
    ) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            twilio,
            tts,
            stt_config: options.stt_config,
            stt_factory: options
                .stt_factory
                .unwrap_or_else(|| Arc::new(|config: &STTConfig| create_stt_provider(config))),
            calls: RwLock::new(HashMap::new()),
            events_tx,
            webhook_base_url: options.webhook_base_url,
            default_country: options.default_country,
            say_voice: options.say_voice,
            language: options.language,
            barge_in: options.barge_in,
            flush_frames: options.flush_frames,
        })
    }

    /// Subscribe to call events
    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events_tx.subscribe()
    }

    fn handle(&self, call_sid: &str) -> Option<Arc<CallHandle>> {
        self.calls.read().get(call_sid).cloned()
    }

    fn insert_record(&self, record: CallRecord) -> Arc<CallHandle> {
        let call_sid = record.call_sid.clone();
        let handle = Arc::new(CallHandle::new(record));
        self.calls.write().insert(call_sid, handle.clone());
        handle
    }

    /// Derive the public media-stream WebSocket URL from the webhook base URL
    fn stream_url(&self) -> Result<String, CallError> {
        let base = self
            .webhook_base_url
            .as_deref()
            .ok_or(CallError::MissingBaseUrl)?;
        let ws_base = base
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        Ok(format!("{}/voice/stream", ws_base.trim_end_matches('/')))
    }

    fn status_callback_url(&self) -> Option<String> {
        self.webhook_base_url
            .as_deref()
            .map(|base| format!("{}/voice/status", base.trim_end_matches('/')))
    }

    fn gather_action_url(&self) -> String {
        match self.webhook_base_url.as_deref() {
            Some(base) => format!("{}/voice/gather", base.trim_end_matches('/')),
            None => "/voice/gather".to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Outbound call placement
    // -----------------------------------------------------------------------

    /// Place a one-shot call that plays `message` and hangs up.
    pub async fn make_call(
        &self,
        to: &str,
        message: &str,
        metadata: HashMap<String, String>,
    ) -> Result<CallSummary, CallError> {
        let to = normalize_phone_number(to, &self.default_country);
        let twiml = TwimlResponse::new()
            .say(message, Some(self.say_voice.as_str()), Some(self.language.as_str()))
            .hangup()
            .build();

        let (call_sid, status) = self
            .twilio
            .create_call(&to, &twiml, self.status_callback_url().as_deref())
            .await?;

        let mut record =
            CallRecord::new_outbound(call_sid, self.twilio.phone_number().to_string(), to);
        record.signaling = SignalingState::parse(&status);
        record.metadata = metadata;
        record.append_assistant(message);

        let summary = record.summary();
        self.insert_record(record);
        Ok(summary)
    }

    /// Place a conversational call whose TwiML opens a media stream back to
    /// this bridge. The greeting is spoken once the stream attaches.
    pub async fn make_conversation_call(
        &self,
        to: &str,
        greeting: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<CallSummary, CallError> {
        let to = normalize_phone_number(to, &self.default_country);
        let twiml = TwimlResponse::new()
            .connect_stream(&self.stream_url()?, "inbound_track")
            .build();

        let (call_sid, status) = self
            .twilio
            .create_call(&to, &twiml, self.status_callback_url().as_deref())
            .await?;

        let mut record =
            CallRecord::new_outbound(call_sid, self.twilio.phone_number().to_string(), to);
        record.signaling = SignalingState::parse(&status);
        record.metadata = metadata;
        record.pending_greeting = greeting;

        let summary = record.summary();
        self.insert_record(record);
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Carrier webhooks
    // -----------------------------------------------------------------------

    /// Handle an inbound call webhook: create the record and answer with
    /// TwiML that opens a media stream.
    pub async fn handle_inbound_call(
        &self,
        params: &HashMap<String, String>,
        greeting: Option<String>,
    ) -> Result<String, CallError> {
        let call_sid = params
            .get("CallSid")
            .filter(|sid| !sid.is_empty())
            .ok_or(CallError::MissingParameter("CallSid"))?;

        if self.handle(call_sid).is_none() {
            let mut record = CallRecord::new_inbound(
                call_sid.clone(),
                params.get("From").cloned().unwrap_or_default(),
                params.get("To").cloned().unwrap_or_default(),
            );
            record.account_sid = params.get("AccountSid").cloned();
            record.signaling = SignalingState::InProgress;
            record.pending_greeting = greeting;
            self.insert_record(record);
            info!(call_sid = %call_sid, "inbound call accepted");
        }

        Ok(TwimlResponse::new()
            .connect_stream(&self.stream_url()?, "inbound_track")
            .build())
    }

    /// Idempotent reconciliation from the carrier's status webhook.
    ///
    /// A record is created on first observation of an unknown call SID, so
    /// every SID seen on a webhook has a record.
    pub async fn handle_status_callback(&self, params: &HashMap<String, String>) {
        let Some(call_sid) = params.get("CallSid").filter(|sid| !sid.is_empty()) else {
            warn!("status callback without CallSid");
            return;
        };
        let status = SignalingState::parse(params.get("CallStatus").map_or("", String::as_str));

        let handle = match self.handle(call_sid) {
            Some(handle) => handle,
            None => {
                let mut record = if params.get("Direction").is_some_and(|d| d.contains("outbound"))
                {
                    CallRecord::new_outbound(
                        call_sid.clone(),
                        params.get("From").cloned().unwrap_or_default(),
                        params.get("To").cloned().unwrap_or_default(),
                    )
                } else {
                    CallRecord::new_inbound(
                        call_sid.clone(),
                        params.get("From").cloned().unwrap_or_default(),
                        params.get("To").cloned().unwrap_or_default(),
                    )
                };
                record.account_sid = params.get("AccountSid").cloned();
                debug!(call_sid = %call_sid, "creating record from status callback");
                self.insert_record(record)
            }
        };

        let terminal = {
            let mut record = handle.record.lock().await;
            if status == SignalingState::InProgress {
                record.mark_answered();
            }
            record.signaling = status;
            if let Some(url) = params.get("RecordingUrl") {
                record.recording_url = Some(url.clone());
            }
            if status.is_terminal() {
                record.mark_ended();
                true
            } else {
                false
            }
        };

        info!(call_sid = %call_sid, status = status.as_str(), "status callback applied");
        if terminal {
            self.release_call_resources(&handle).await;
            let _ = self.events_tx.send(CallEvent::Ended {
                call_sid: call_sid.clone(),
            });
        }
    }

    /// Handle the carrier-recognizer gather path: surface speech and DTMF,
    /// and answer with TwiML that reopens the gather loop.
    pub async fn handle_gather_callback(&self, params: &HashMap<String, String>) -> String {
        if let Some(call_sid) = params.get("CallSid").filter(|sid| !sid.is_empty()) {
            let handle = match self.handle(call_sid) {
                Some(handle) => handle,
                None => {
                    let record = CallRecord::new_inbound(
                        call_sid.clone(),
                        params.get("From").cloned().unwrap_or_default(),
                        params.get("To").cloned().unwrap_or_default(),
                    );
                    self.insert_record(record)
                }
            };

            if let Some(speech) = params.get("SpeechResult").filter(|s| !s.is_empty()) {
                let confidence = params
                    .get("Confidence")
                    .and_then(|c| c.parse::<f32>().ok());
                let from = {
                    let mut record = handle.record.lock().await;
                    record.append_user(speech, confidence);
                    record.remote_party().to_string()
                };
                let _ = self.events_tx.send(CallEvent::Transcription {
                    call_sid: call_sid.clone(),
                    from,
                    text: speech.clone(),
                    confidence: confidence.unwrap_or(1.0),
                });
            }

            if let Some(digits) = params.get("Digits").filter(|d| !d.is_empty()) {
                let _ = self.events_tx.send(CallEvent::Dtmf {
                    call_sid: call_sid.clone(),
                    digits: digits.clone(),
                });
            }
        }

        let options = GatherOptions::speech(self.gather_action_url())
            .with_language(self.language.clone());
        TwimlResponse::new().gather(&options, None).build()
    }

    // -----------------------------------------------------------------------
    // Media stream attachment
    // -----------------------------------------------------------------------

    /// Accept an upgraded media-stream socket and run it for its call.
    pub async fn handle_media_stream<S>(self: Arc<Self>, socket: S)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Sink<Message> + Unpin + Send + 'static,
        <S as Sink<Message>>::Error: std::fmt::Display,
    {
        let (session, mut events) = MediaStreamSession::spawn(socket, self.flush_frames);

        // The first start envelope identifies the call
        let (call_sid, stream_sid) = loop {
            match events.recv().await {
                Some(SessionEvent::Connected {
                    call_sid,
                    stream_sid,
                }) => break (call_sid, stream_sid),
                Some(SessionEvent::Disconnected) | None => return,
                Some(_) => continue,
            }
        };

        self.attach_stream(call_sid, stream_sid, session, events)
            .await;
    }

    async fn attach_stream(
        self: &Arc<Self>,
        call_sid: String,
        stream_sid: String,
        session: SessionHandle,
        session_events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        let Some(handle) = self.handle(&call_sid) else {
            warn!(call_sid = %call_sid, "media stream for unknown call, closing");
            session.close();
            return;
        };

        // At most one stream session per call
        {
            let mut slot = handle.session.lock();
            if slot.is_some() {
                warn!(call_sid = %call_sid, "duplicate media stream, closing the new one");
                session.close();
                return;
            }
            *slot = Some(session.clone());
        }

        {
            let mut record = handle.record.lock().await;
            record.stream_sid = Some(stream_sid);
            record.signaling = SignalingState::InProgress;
            record.mark_answered();
        }

        // Attach STT; failure leaves the call running without transcription
        let (stt_tx, stt_rx) = mpsc::unbounded_channel();
        let stt = match (self.stt_factory)(&self.stt_config) {
            Ok(mut stt) => {
                let tx = stt_tx.clone();
                stt.on_event(Arc::new(move |event| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let _ = tx.send(event);
                    }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
                }));
                match stt.connect().await {
                    Ok(()) => Some(stt),
                    Err(e) => {
                        error!(call_sid = %call_sid, error = %e, "STT connect failed, continuing without transcription");
                        None
                    }
                }
            }
            Err(e) => {
                error!(call_sid = %call_sid, error = %e, "STT setup failed, continuing without transcription");
                None
            }
        };
        *handle.stt.lock().await = stt;

        let pump = tokio::spawn(self.clone().run_call_pump(
            call_sid.clone(),
            session_events,
            stt_rx,
        ));
        handle.tasks.lock().push(pump);

        // Speak the queued greeting, or open the floor to the caller
        let greeting = handle.record.lock().await.pending_greeting.take();
        match greeting {
            Some(greeting) => {
                let manager = self.clone();
                let sid = call_sid.clone();
                let task = tokio::spawn(async move {
                    if let Err(e) = manager.speak(&sid, &greeting).await {
                        warn!(call_sid = %sid, error = %e, "failed to speak greeting");
                    }
                });
                handle.tasks.lock().push(task);
            }
            None => {
                handle.record.lock().await.conversation = ConversationState::Listening;
            }
        }

        info!(call_sid = %call_sid, "media stream attached");
    }

    /// Per-call event pump. Merges session and STT events and enforces
    /// turn-taking until the stream closes.
    async fn run_call_pump(
        self: Arc<Self>,
        call_sid: String,
        mut session_rx: mpsc::UnboundedReceiver<SessionEvent>,
        mut stt_rx: mpsc::UnboundedReceiver<STTEvent>,
    ) {
        let mut stt_done = false;
        loop {
            tokio::select! {
                event = session_rx.recv() => match event {
                    Some(SessionEvent::Audio(pcm)) => self.on_inbound_audio(&call_sid, pcm).await,
                    Some(SessionEvent::SpeakingFinished) => self.on_speaking_finished(&call_sid).await,
                    Some(SessionEvent::Connected { .. }) => {}
                    Some(SessionEvent::Disconnected) | None => {
                        self.on_stream_closed(&call_sid).await;
                        break;
                    }
                },
                event = stt_rx.recv(), if !stt_done => match event {
                    Some(STTEvent::Transcript(result)) => self.on_transcript(&call_sid, result).await,
                    Some(STTEvent::SpeechStarted) => self.on_speech_started(&call_sid).await,
                    Some(STTEvent::Error(e)) => warn!(call_sid = %call_sid, error = %e, "STT error"),
                    Some(STTEvent::Connected) => debug!(call_sid = %call_sid, "STT session up"),
                    Some(STTEvent::Disconnected) => debug!(call_sid = %call_sid, "STT session down"),
                    None => stt_done = true,
                },
            }
        }
        debug!(call_sid = %call_sid, "call pump ended");
    }

    /// Turn-taking gate: only `listening` forwards audio to STT. In every
    /// other state the frame is discarded and the STT buffer cleared so stale
    /// audio cannot surface as a transcript later.
    async fn on_inbound_audio(&self, call_sid: &str, pcm: Vec<u8>) {
        let Some(handle) = self.handle(call_sid) else {
            return;
        };
        let state = handle.record.lock().await.conversation;

        let mut stt = handle.stt.lock().await;
        let Some(stt) = stt.as_mut() else {
            return;
        };

        if state == ConversationState::Listening {
            if let Err(e) = stt.send_audio(pcm).await {
                warn!(call_sid = %call_sid, error = %e, "failed to forward audio to STT");
            }
        } else if let Err(e) = stt.clear_buffer().await {
            debug!(call_sid = %call_sid, error = %e, "failed to clear STT buffer");
        }
    }

    /// The carrier acknowledged our last mark: playback is done, the floor
    /// goes back to the caller.
    async fn on_speaking_finished(&self, call_sid: &str) {
        let Some(handle) = self.handle(call_sid) else {
            return;
        };
        if let Some(stt) = handle.stt.lock().await.as_mut() {
            let _ = stt.clear_buffer().await;
        }
        handle.record.lock().await.conversation = ConversationState::Listening;

        let _ = self.events_tx.send(CallEvent::SpeechEnded {
            call_sid: call_sid.to_string(),
            interrupted: false,
        });
        debug!(call_sid = %call_sid, "playback acknowledged, listening");
    }

    /// A final transcript arrived. Accept it only while listening; anything
    /// else is stale audio from before a turn change.
    async fn on_transcript(&self, call_sid: &str, result: crate::core::stt::STTResult) {
        if !result.is_final || result.transcript.trim().is_empty() {
            return;
        }
        let Some(handle) = self.handle(call_sid) else {
            return;
        };

        let accepted = {
            let mut record = handle.record.lock().await;
            if record.conversation != ConversationState::Listening {
                None
            } else {
                record.conversation = ConversationState::Processing;
                record.append_user(&result.transcript, Some(result.confidence));
                Some(record.remote_party().to_string())
            }
        };

        let Some(from) = accepted else {
            debug!(call_sid = %call_sid, "dropping stale transcript");
            return;
        };

        if let Some(stt) = handle.stt.lock().await.as_mut() {
            let _ = stt.clear_buffer().await;
        }

        info!(call_sid = %call_sid, text = %result.transcript, "final transcript");
        let _ = self.events_tx.send(CallEvent::Transcription {
            call_sid: call_sid.to_string(),
            from,
            text: result.transcript,
            confidence: result.confidence,
        });
    }

    /// Streaming VAD saw the caller start talking. If the bridge is mid-
    /// playback and barge-in is enabled, cut the playback off.
    async fn on_speech_started(&self, call_sid: &str) {
        if !self.barge_in {
            return;
        }
        let Some(handle) = self.handle(call_sid) else {
            return;
        };
        let session = handle.session.lock().clone();
        let Some(session) = session else {
            return;
        };
        if !session.is_speaking() {
            return;
        }

        info!(call_sid = %call_sid, "barge-in: clearing bridge playback");
        if let Err(e) = session.clear_audio() {
            warn!(call_sid = %call_sid, error = %e, "failed to clear playback");
            return;
        }
        handle.record.lock().await.conversation = ConversationState::Listening;
        let _ = self.events_tx.send(CallEvent::SpeechEnded {
            call_sid: call_sid.to_string(),
            interrupted: true,
        });
    }

    /// The media stream went away. Release the session and STT; the record
    /// stays until the signaling webhook closes the call.
    async fn on_stream_closed(&self, call_sid: &str) {
        let Some(handle) = self.handle(call_sid) else {
            return;
        };
        handle.session.lock().take();
        if let Some(mut stt) = handle.stt.lock().await.take() {
            let _ = stt.disconnect().await;
        }
        debug!(call_sid = %call_sid, "media stream released");
    }

    // -----------------------------------------------------------------------
    // Speaking
    // -----------------------------------------------------------------------

    /// Synthesize `text` and play it to the caller, awaiting playback
    /// completion via the mark acknowledgement.
    ///
    /// Falls back to a carrier-side `<Say>` when there is no live stream or
    /// synthesis fails; that path cannot observe playback completion and
    /// transitions straight to `listening`.
    pub async fn speak(&self, call_sid: &str, text: &str) -> Result<(), CallError> {
        let handle = self
            .handle(call_sid)
            .ok_or_else(|| CallError::NotFound(call_sid.to_string()))?;

        {
            let mut record = handle.record.lock().await;
            // Never start a new utterance over one that is still playing
            if record.conversation == ConversationState::Speaking {
                return Err(CallError::AlreadySpeaking);
            }
            record.conversation = ConversationState::Speaking;
            record.append_assistant(text);
        }

        let session = handle.session.lock().clone();
        if let Some(session) = session {
            match self.tts.synthesize_for_twilio(text).await {
                Ok(frames) if !frames.is_empty() => match session.send_audio_frames(frames) {
                    Ok(ack) => {
                        // Resolves on the mark echo; errors when the stream
                        // closes or playback is cut off. Either way the turn
                        // is over and the pump has moved the state on.
                        let _ = ack.await;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(call_sid = %call_sid, error = %e, "stream send failed, falling back to <Say>");
                    }
                },
                Ok(_) => warn!(call_sid = %call_sid, "synthesis produced no audio"),
                Err(e) => {
                    warn!(call_sid = %call_sid, error = %e, "synthesis failed, falling back to <Say>");
                }
            }
        }

        // Carrier-side fallback
        let twiml = TwimlResponse::new()
            .say(text, Some(self.say_voice.as_str()), Some(self.language.as_str()))
            .build();
        let result = self.twilio.update_call(call_sid, &twiml).await;
        {
            let mut record = handle.record.lock().await;
            if record.conversation == ConversationState::Speaking {
                record.conversation = ConversationState::Listening;
            }
        }
        result?;
        Ok(())
    }

    /// Speak, then wait for the caller's next transcription.
    ///
    /// Resolves `None` when no transcription arrives within the timeout
    /// (default 30 s).
    pub async fn speak_and_listen(
        &self,
        call_sid: &str,
        text: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Option<String>, CallError> {
        let mut events = self.events_tx.subscribe();
        self.speak(call_sid, text).await?;

        let deadline = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_SPEAK_AND_LISTEN_TIMEOUT_MS));
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(CallEvent::Transcription {
                        call_sid: sid,
                        text,
                        ..
                    }) if sid == call_sid => return Some(text),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(deadline, wait).await {
            Ok(text) => Ok(text),
            Err(_) => Ok(None),
        }
    }

    /// Reopen the floor to the caller after a turn that produced no reply.
    pub async fn resume_listening(&self, call_sid: &str) {
        if let Some(handle) = self.handle(call_sid) {
            let mut record = handle.record.lock().await;
            if record.conversation == ConversationState::Processing {
                record.conversation = ConversationState::Listening;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// End a call, optionally speaking a goodbye first.
    pub async fn end_call(&self, call_sid: &str, message: Option<&str>) -> Result<(), CallError> {
        let handle = self
            .handle(call_sid)
            .ok_or_else(|| CallError::NotFound(call_sid.to_string()))?;

        if let Some(message) = message {
            if let Err(e) = self.speak(call_sid, message).await {
                warn!(call_sid = %call_sid, error = %e, "failed to speak goodbye");
            }
        }

        if let Err(e) = self.twilio.complete_call(call_sid).await {
            warn!(call_sid = %call_sid, error = %e, "carrier hangup failed");
        }

        {
            let mut record = handle.record.lock().await;
            record.signaling = SignalingState::Completed;
            record.mark_ended();
        }
        self.release_call_resources(&handle).await;

        info!(call_sid = %call_sid, "call ended");
        let _ = self.events_tx.send(CallEvent::Ended {
            call_sid: call_sid.to_string(),
        });
        Ok(())
    }

    /// Close the session, tear down STT, and cancel per-call tasks.
    /// Idempotent; safe to call from both API teardown and webhook teardown.
    async fn release_call_resources(&self, handle: &Arc<CallHandle>) {
        if let Some(session) = handle.session.lock().take() {
            session.close();
        }
        if let Some(mut stt) = handle.stt.lock().await.take() {
            let _ = stt.disconnect().await;
        }
        let tasks = std::mem::take(&mut *handle.tasks.lock());
        for task in tasks {
            task.abort();
        }
    }

    /// Best-effort end of every live call, used at process shutdown.
    pub async fn shutdown(&self) {
        let call_sids: Vec<String> = self.calls.read().keys().cloned().collect();
        for call_sid in call_sids {
            let live = match self.handle(&call_sid) {
                Some(handle) => !handle.record.lock().await.signaling.is_terminal(),
                None => false,
            };
            if live {
                info!(call_sid = %call_sid, "ending call for shutdown");
                if let Err(e) = self.end_call(&call_sid, None).await {
                    warn!(call_sid = %call_sid, error = %e, "failed to end call during shutdown");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_call(&self, call_sid: &str) -> Option<CallSummary> {
        let handle = self.handle(call_sid)?;
        let record = handle.record.lock().await;
        Some(record.summary())
    }

    /// All calls whose signaling state is not terminal.
    pub async fn active_calls(&self) -> Vec<CallSummary> {
        let handles: Vec<Arc<CallHandle>> = self.calls.read().values().cloned().collect();
        let mut summaries = Vec::new();
        for handle in handles {
            let record = handle.record.lock().await;
            if !record.signaling.is_terminal() {
                summaries.push(record.summary());
            }
        }
        summaries
    }

    pub async fn active_call_count(&self) -> usize {
        self.active_calls().await.len()
    }
}
