pub mod manager;
pub mod record;

pub use manager::{
    CallError, CallEvent, CallManager, CallManagerOptions, FALLBACK_APOLOGY, SttFactory,
};
pub use record::{
    CallDirection, CallRecord, CallSummary, ConversationState, SignalingState, TranscriptEntry,
    TranscriptRole,
};
