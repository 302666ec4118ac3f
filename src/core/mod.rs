pub mod audio;
pub mod call;
pub mod stream;
pub mod stt;
pub mod tts;

// Re-export commonly used types for convenience
pub use call::{CallError, CallEvent, CallManager, CallManagerOptions, CallSummary};
pub use stream::{MediaStreamSession, SessionEvent, SessionHandle, StreamEnvelope};
pub use stt::{BaseSTT, STTConfig, STTError, STTEvent, STTResult, create_stt_provider};
pub use tts::{BaseTTS, TTSConfig, TTSError, create_tts_provider};
