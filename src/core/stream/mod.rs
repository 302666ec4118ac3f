pub mod envelope;
pub mod session;
#[doc(hidden)]
pub mod testing;

pub use envelope::{MediaFormat, MediaMeta, MarkMeta, StartMeta, StopMeta, StreamEnvelope};
pub use session::{
    DEFAULT_FLUSH_FRAMES, MediaStreamSession, SessionError, SessionEvent, SessionHandle,
};
