//! Per-call media stream session.
//!
//! One session owns one carrier WebSocket. Inbound envelopes are parsed and
//! surfaced as [`SessionEvent`]s; outbound audio is framed, marked, and
//! acknowledged through the carrier's `mark` echo. The session is the only
//! component that touches the socket - callers interact through a cloneable
//! [`SessionHandle`].

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use axum::extract::ws::Message;

use super::envelope::{MarkMeta, MediaMeta, StreamEnvelope};
use crate::core::audio::{self, STT_SAMPLE_RATE};

/// Inbound audio is flushed to STT every N media frames (N x 20 ms).
pub const DEFAULT_FLUSH_FRAMES: usize = 10;

/// Events emitted by a media stream session.
#[derive(Debug)]
pub enum SessionEvent {
    /// The carrier sent `start`; the stream is attached to a call.
    Connected {
        call_sid: String,
        stream_sid: String,
    },
    /// A flushed chunk of inbound audio as 16 kHz 16-bit LE PCM.
    Audio(Vec<u8>),
    /// All queued outbound audio has played out at the carrier.
    SpeakingFinished,
    /// The stream ended (carrier `stop`, close frame, or socket error).
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("media stream has not started")]
    NotStarted,
    #[error("media stream closed")]
    Closed,
    #[error("refusing to send empty audio")]
    EmptyAudio,
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Default)]
struct SessionInner {
    stream_sid: Option<String>,
    call_sid: Option<String>,
    pending_marks: HashMap<String, oneshot::Sender<()>>,
    mark_seq: u64,
    is_speaking: bool,
}

enum OutboundFrame {
    Text(String),
    Close,
}

/// Cloneable command surface for a running session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<SessionInner>>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
}

impl SessionHandle {
    pub fn call_sid(&self) -> Option<String> {
        self.inner.lock().call_sid.clone()
    }

    pub fn stream_sid(&self) -> Option<String> {
        self.inner.lock().stream_sid.clone()
    }

    pub fn is_speaking(&self) -> bool {
        self.inner.lock().is_speaking
    }

    fn send_envelope(&self, envelope: &StreamEnvelope) -> Result<(), SessionError> {
        let json = serde_json::to_string(envelope)?;
        self.outbound
            .send(OutboundFrame::Text(json))
            .map_err(|_| SessionError::Closed)
    }

    /// Send a single pre-encoded media payload.
    ///
    /// Dropped with a warning when the stream has not started yet.
    pub fn send_audio(&self, payload_b64: String) {
        let stream_sid = self.inner.lock().stream_sid.clone();
        match stream_sid {
            Some(stream_sid) => {
                let envelope = StreamEnvelope::Media {
                    stream_sid: Some(stream_sid),
                    sequence_number: None,
                    media: MediaMeta::outbound(payload_b64),
                };
                if self.send_envelope(&envelope).is_err() {
                    warn!("dropping outbound audio: media stream closed");
                }
            }
            None => warn!("dropping outbound audio: media stream not started"),
        }
    }

    /// Send a full utterance as mu-law frames followed by a uniquely named
    /// mark.
    ///
    /// The returned receiver resolves when the carrier echoes the mark back,
    /// i.e. when the audio has actually played out. Playback completion is
    /// never timed; it is driven solely by the mark acknowledgement. The
    /// receiver errors instead when the stream closes or the queue is
    /// cleared.
    pub fn send_audio_frames(
        &self,
        frames: Vec<Vec<u8>>,
    ) -> Result<oneshot::Receiver<()>, SessionError> {
        if frames.is_empty() {
            return Err(SessionError::EmptyAudio);
        }

        let (stream_sid, mark_name) = {
            let mut inner = self.inner.lock();
            let stream_sid = inner
                .stream_sid
                .clone()
                .ok_or(SessionError::NotStarted)?;
            inner.is_speaking = true;
            inner.mark_seq += 1;
            let mark_name = format!("utt-{}-{}", inner.mark_seq, Uuid::new_v4().simple());
            (stream_sid, mark_name)
        };

        for frame in &frames {
            let envelope = StreamEnvelope::Media {
                stream_sid: Some(stream_sid.clone()),
                sequence_number: None,
                media: MediaMeta::outbound(BASE64.encode(frame)),
            };
            self.send_envelope(&envelope)?;
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.inner
            .lock()
            .pending_marks
            .insert(mark_name.clone(), ack_tx);

        self.send_envelope(&StreamEnvelope::Mark {
            stream_sid: Some(stream_sid),
            mark: MarkMeta { name: mark_name },
        })?;

        Ok(ack_rx)
    }

    /// Tell the carrier to discard all queued outbound audio immediately.
    ///
    /// Pending mark acknowledgements are cancelled; their receivers resolve
    /// with an error.
    pub fn clear_audio(&self) -> Result<(), SessionError> {
        let stream_sid = self
            .inner
            .lock()
            .stream_sid
            .clone()
            .ok_or(SessionError::NotStarted)?;

        self.send_envelope(&StreamEnvelope::Clear { stream_sid })?;

        let mut inner = self.inner.lock();
        inner.pending_marks.clear();
        inner.is_speaking = false;
        Ok(())
    }

    /// Best-effort close of the underlying socket.
    pub fn close(&self) {
        let _ = self.outbound.send(OutboundFrame::Close);
    }
}

/// Factory for media stream sessions.
pub struct MediaStreamSession;

impl MediaStreamSession {
    /// Spawn a session over the given socket.
    ///
    /// Returns the command handle and the event stream. The session task ends
    /// when the socket closes or the carrier sends `stop`; `Disconnected` is
    /// always the final event.
    pub fn spawn<S>(
        socket: S,
        flush_frames: usize,
    ) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>)
    where
        S: Stream<Item = Result<Message, axum::Error>> + Sink<Message> + Unpin + Send + 'static,
        <S as Sink<Message>>::Error: std::fmt::Display,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(SessionInner::default()));

        let handle = SessionHandle {
            inner: inner.clone(),
            outbound: outbound_tx,
        };

        tokio::spawn(run_session(
            socket,
            inner,
            events_tx,
            outbound_rx,
            flush_frames,
        ));

        (handle, events_rx)
    }
}

async fn run_session<S>(
    socket: S,
    inner: Arc<Mutex<SessionInner>>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    flush_frames: usize,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Sink<Message> + Unpin + Send + 'static,
    <S as Sink<Message>>::Error: std::fmt::Display,
{
    let (mut sink, mut stream) = socket.split();

    // Inbound mu-law accumulates here until the flush threshold.
    let mut mulaw_buffer: Vec<u8> = Vec::new();
    let mut buffered_frames = 0usize;

    loop {
        tokio::select! {
            frame = outbound_rx.recv() => match frame {
                Some(OutboundFrame::Text(json)) => {
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        warn!(error = %e, "failed to write media stream frame");
                        break;
                    }
                }
                Some(OutboundFrame::Close) => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                None => break,
            },
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<StreamEnvelope>(text.as_str()) {
                        Ok(envelope) => {
                            let stopped = handle_envelope(
                                envelope,
                                &inner,
                                &events_tx,
                                &mut mulaw_buffer,
                                &mut buffered_frames,
                                flush_frames,
                            );
                            if stopped {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "unparseable media stream envelope"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "media stream socket error");
                    break;
                }
            },
        }
    }

    // Flush whatever inbound audio remains, then release pending marks so no
    // caller is left awaiting an acknowledgement that can never arrive.
    if !mulaw_buffer.is_empty() {
        let pcm = audio::convert_from_twilio(&mulaw_buffer, STT_SAMPLE_RATE);
        let _ = events_tx.send(SessionEvent::Audio(pcm));
    }
    {
        let mut inner = inner.lock();
        inner.pending_marks.clear();
        inner.is_speaking = false;
    }
    let _ = events_tx.send(SessionEvent::Disconnected);
    debug!("media stream session ended");
}

/// Process one inbound envelope. Returns true when the stream should stop.
fn handle_envelope(
    envelope: StreamEnvelope,
    inner: &Arc<Mutex<SessionInner>>,
    events_tx: &mpsc::UnboundedSender<SessionEvent>,
    mulaw_buffer: &mut Vec<u8>,
    buffered_frames: &mut usize,
    flush_frames: usize,
) -> bool {
    match envelope {
        StreamEnvelope::Connected { .. } => {
            debug!("media stream handshake received");
            false
        }
        StreamEnvelope::Start { start, .. } => {
            {
                let mut inner = inner.lock();
                inner.stream_sid = Some(start.stream_sid.clone());
                inner.call_sid = Some(start.call_sid.clone());
            }
            debug!(call_sid = %start.call_sid, stream_sid = %start.stream_sid, "media stream started");
            let _ = events_tx.send(SessionEvent::Connected {
                call_sid: start.call_sid,
                stream_sid: start.stream_sid,
            });
            false
        }
        StreamEnvelope::Media { media, .. } => {
            match BASE64.decode(media.payload.as_bytes()) {
                Ok(mulaw) => {
                    mulaw_buffer.extend_from_slice(&mulaw);
                    *buffered_frames += 1;
                    if *buffered_frames >= flush_frames {
                        let pcm = audio::convert_from_twilio(mulaw_buffer, STT_SAMPLE_RATE);
                        mulaw_buffer.clear();
                        *buffered_frames = 0;
                        let _ = events_tx.send(SessionEvent::Audio(pcm));
                    }
                }
                Err(e) => warn!(error = %e, "invalid base64 in media payload"),
            }
            false
        }
        StreamEnvelope::Mark { mark, .. } => {
            let finished = {
                let mut inner = inner.lock();
                if let Some(ack) = inner.pending_marks.remove(&mark.name) {
                    let _ = ack.send(());
                } else {
                    debug!(name = %mark.name, "mark echo with no pending resolver");
                }
                if inner.pending_marks.is_empty() && inner.is_speaking {
                    inner.is_speaking = false;
                    true
                } else {
                    false
                }
            };
            if finished {
                let _ = events_tx.send(SessionEvent::SpeakingFinished);
            }
            false
        }
        StreamEnvelope::Stop { .. } => {
            debug!("media stream stop received");
            true
        }
        StreamEnvelope::Clear { .. } => {
            debug!("unexpected inbound clear envelope");
            false
        }
    }
}
