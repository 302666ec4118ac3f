//! In-memory socket pair for exercising media stream sessions without a
//! network. Test support only.

use futures::channel::mpsc::{UnboundedReceiver, UnboundedSender, unbounded};
use futures::{Sink, Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::ws::Message;

use super::envelope::StreamEnvelope;

/// The session-facing half: a Stream + Sink of WebSocket messages, matching
/// the surface of an upgraded carrier socket.
pub struct DuplexSocket {
    incoming: UnboundedReceiver<Result<Message, axum::Error>>,
    outgoing: UnboundedSender<Message>,
}

/// The carrier-facing half used by tests to drive the session.
pub struct RemoteEnd {
    to_session: UnboundedSender<Result<Message, axum::Error>>,
    from_session: tokio::sync::Mutex<UnboundedReceiver<Message>>,
}

impl DuplexSocket {
    pub fn pair() -> (DuplexSocket, RemoteEnd) {
        let (to_session, incoming) = unbounded();
        let (outgoing, from_session) = unbounded();
        (
            DuplexSocket { incoming, outgoing },
            RemoteEnd {
                to_session,
                from_session: tokio::sync::Mutex::new(from_session),
            },
        )
    }
}

impl Stream for DuplexSocket {
    type Item = Result<Message, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.incoming).poll_next(cx)
    }
}

impl Sink<Message> for DuplexSocket {
    type Error = futures::channel::mpsc::SendError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing).poll_ready(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        Pin::new(&mut self.outgoing).start_send(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.outgoing).poll_close(cx)
    }
}

impl RemoteEnd {
    /// Deliver a text frame to the session as if the carrier sent it.
    pub fn send_text(&self, text: String) {
        let _ = self.to_session.unbounded_send(Ok(Message::Text(text.into())));
    }

    /// Deliver a close frame to the session.
    pub fn close(&self) {
        let _ = self.to_session.unbounded_send(Ok(Message::Close(None)));
    }

    /// Receive the next outbound envelope the session produced.
    ///
    /// Panics after one second so a missing frame fails the test quickly.
    pub async fn recv_envelope(&self) -> StreamEnvelope {
        let mut rx = self.from_session.lock().await;
        loop {
            let message = tokio::time::timeout(Duration::from_secs(1), rx.next())
                .await
                .expect("timed out waiting for outbound frame")
                .expect("session closed its outbound channel");
            if let Message::Text(text) = message {
                return serde_json::from_str(text.as_str()).expect("invalid outbound envelope");
            }
        }
    }

    /// Receive the next raw outbound message.
    pub async fn recv_message(&self) -> Option<Message> {
        let mut rx = self.from_session.lock().await;
        tokio::time::timeout(Duration::from_secs(1), rx.next())
            .await
            .ok()
            .flatten()
    }
}
