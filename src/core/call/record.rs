//! Per-call state: identity, lifecycle timeline, transcript and the
//! turn-taking conversation state machine.

use serde::Serialize;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Carrier-visible call status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Queued,
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Busy,
    Failed,
    NoAnswer,
    Canceled,
}

impl SignalingState {
    /// Map a carrier status string onto the closed set. Matching is
    /// case-insensitive; unknown strings default to `Initiated`.
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "queued" => Self::Queued,
            "initiated" => Self::Initiated,
            "ringing" => Self::Ringing,
            "in-progress" | "answered" => Self::InProgress,
            "completed" => Self::Completed,
            "busy" => Self::Busy,
            "failed" => Self::Failed,
            "no-answer" => Self::NoAnswer,
            "canceled" => Self::Canceled,
            _ => Self::Initiated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Initiated => "initiated",
            Self::Ringing => "ringing",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Busy => "busy",
            Self::Failed => "failed",
            Self::NoAnswer => "no-answer",
            Self::Canceled => "canceled",
        }
    }

    /// Terminal states release the call's resources
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Busy | Self::Failed | Self::NoAnswer | Self::Canceled
        )
    }
}

/// Internal turn-taking state. At any moment exactly one party holds the
/// audio floor; this state decides whose frames matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Idle,
    Speaking,
    Listening,
    Processing,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Speaking => "speaking",
            Self::Listening => "listening",
            Self::Processing => "processing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

/// One immutable transcript line
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub role: TranscriptRole,
    pub text: String,
    pub timestamp: SystemTime,
    pub confidence: Option<f32>,
}

/// Complete per-call state, owned by the call manager
#[derive(Debug)]
pub struct CallRecord {
    pub call_sid: String,
    pub account_sid: Option<String>,
    pub stream_sid: Option<String>,
    pub direction: CallDirection,
    /// Caller address (E.164)
    pub from: String,
    /// Callee address (E.164)
    pub to: String,
    pub created_at: SystemTime,
    pub answered_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    pub transcript: Vec<TranscriptEntry>,
    /// Arbitrary key-value metadata; keys starting with `_` are reserved
    pub metadata: HashMap<String, String>,
    pub signaling: SignalingState,
    pub conversation: ConversationState,
    /// Greeting to speak once the media stream attaches
    pub pending_greeting: Option<String>,
    pub recording_url: Option<String>,
}

impl CallRecord {
    pub fn new_outbound(call_sid: String, from: String, to: String) -> Self {
        Self::new(call_sid, CallDirection::Outbound, from, to)
    }

    pub fn new_inbound(call_sid: String, from: String, to: String) -> Self {
        Self::new(call_sid, CallDirection::Inbound, from, to)
    }

    fn new(call_sid: String, direction: CallDirection, from: String, to: String) -> Self {
        Self {
            call_sid,
            account_sid: None,
            stream_sid: None,
            direction,
            from,
            to,
            created_at: SystemTime::now(),
            answered_at: None,
            ended_at: None,
            transcript: Vec::new(),
            metadata: HashMap::new(),
            signaling: SignalingState::Initiated,
            conversation: ConversationState::Idle,
            pending_greeting: None,
            recording_url: None,
        }
    }

    /// The party on the far side of the bridge: the caller for inbound
    /// calls, the callee for outbound ones.
    pub fn remote_party(&self) -> &str {
        match self.direction {
            CallDirection::Inbound => &self.from,
            CallDirection::Outbound => &self.to,
        }
    }

    /// Record the answer time once; later calls are no-ops.
    pub fn mark_answered(&mut self) {
        if self.answered_at.is_none() {
            self.answered_at = Some(SystemTime::now());
        }
    }

    /// Record the end time once; later calls are no-ops, which keeps
    /// duplicate terminal status callbacks idempotent.
    pub fn mark_ended(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(SystemTime::now());
        }
    }

    /// Whole-second call duration: `max(0, ended - answered)`. Live answered
    /// calls report the duration so far.
    pub fn duration_secs(&self) -> u64 {
        let Some(answered) = self.answered_at else {
            return 0;
        };
        let end = self.ended_at.unwrap_or_else(SystemTime::now);
        end.duration_since(answered)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    pub fn append_user(&mut self, text: &str, confidence: Option<f32>) {
        self.transcript.push(TranscriptEntry {
            role: TranscriptRole::User,
            text: text.to_string(),
            timestamp: SystemTime::now(),
            confidence,
        });
    }

    pub fn append_assistant(&mut self, text: &str) {
        self.transcript.push(TranscriptEntry {
            role: TranscriptRole::Assistant,
            text: text.to_string(),
            timestamp: SystemTime::now(),
            confidence: None,
        });
    }

    pub fn summary(&self) -> CallSummary {
        CallSummary {
            call_sid: self.call_sid.clone(),
            account_sid: self.account_sid.clone(),
            stream_sid: self.stream_sid.clone(),
            direction: self.direction.as_str(),
            from: self.from.clone(),
            to: self.to.clone(),
            state: self.signaling.as_str(),
            conversation_state: self.conversation.as_str(),
            duration: self.duration_secs(),
            created_at: unix_secs(self.created_at),
            answered_at: self.answered_at.map(unix_secs),
            ended_at: self.ended_at.map(unix_secs),
            transcript: self
                .transcript
                .iter()
                .map(|entry| TranscriptEntryView {
                    role: entry.role,
                    text: entry.text.clone(),
                    timestamp: unix_secs(entry.timestamp),
                    confidence: entry.confidence,
                })
                .collect(),
            metadata: self.metadata.clone(),
            recording_url: self.recording_url.clone(),
        }
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// JSON view of a call record for the REST API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_sid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_sid: Option<String>,
    pub direction: &'static str,
    pub from: String,
    pub to: String,
    pub state: &'static str,
    pub conversation_state: &'static str,
    pub duration: u64,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answered_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub transcript: Vec<TranscriptEntryView>,
    pub metadata: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntryView {
    pub role: TranscriptRole,
    pub text: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_closed_set() {
        assert_eq!(SignalingState::parse("queued"), SignalingState::Queued);
        assert_eq!(SignalingState::parse("RINGING"), SignalingState::Ringing);
        assert_eq!(
            SignalingState::parse("In-Progress"),
            SignalingState::InProgress
        );
        assert_eq!(
            SignalingState::parse("no-answer"),
            SignalingState::NoAnswer
        );
        assert_eq!(SignalingState::parse("canceled"), SignalingState::Canceled);
        // Unknown strings default to initiated
        assert_eq!(
            SignalingState::parse("warming-up"),
            SignalingState::Initiated
        );
        assert_eq!(SignalingState::parse(""), SignalingState::Initiated);
    }

    #[test]
    fn test_terminal_states() {
        for state in [
            SignalingState::Completed,
            SignalingState::Busy,
            SignalingState::Failed,
            SignalingState::NoAnswer,
            SignalingState::Canceled,
        ] {
            assert!(state.is_terminal());
        }
        for state in [
            SignalingState::Queued,
            SignalingState::Initiated,
            SignalingState::Ringing,
            SignalingState::InProgress,
        ] {
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn test_mark_answered_and_ended_are_idempotent() {
        let mut record =
            CallRecord::new_outbound("CA1".to_string(), "+1000".to_string(), "+1001".to_string());

        record.mark_answered();
        let answered = record.answered_at;
        record.mark_answered();
        assert_eq!(record.answered_at, answered);

        record.mark_ended();
        let ended = record.ended_at;
        let duration = record.duration_secs();
        record.mark_ended();
        assert_eq!(record.ended_at, ended);
        assert_eq!(record.duration_secs(), duration);
    }

    #[test]
    fn test_duration_zero_before_answer() {
        let record =
            CallRecord::new_outbound("CA1".to_string(), "+1000".to_string(), "+1001".to_string());
        assert_eq!(record.duration_secs(), 0);
    }

    #[test]
    fn test_remote_party_depends_on_direction() {
        let inbound =
            CallRecord::new_inbound("CA1".to_string(), "+1000".to_string(), "+1001".to_string());
        assert_eq!(inbound.remote_party(), "+1000");

        let outbound =
            CallRecord::new_outbound("CA2".to_string(), "+1000".to_string(), "+1001".to_string());
        assert_eq!(outbound.remote_party(), "+1001");
    }

    #[test]
    fn test_transcript_appends_in_order() {
        let mut record =
            CallRecord::new_inbound("CA1".to_string(), "+1000".to_string(), "+1001".to_string());
        record.append_assistant("Hi, how can I help?");
        record.append_user("hello", Some(0.95));

        assert_eq!(record.transcript.len(), 2);
        assert_eq!(record.transcript[0].role, TranscriptRole::Assistant);
        assert_eq!(record.transcript[1].role, TranscriptRole::User);
        assert_eq!(record.transcript[1].confidence, Some(0.95));
    }

    #[test]
    fn test_summary_serialization() {
        let mut record =
            CallRecord::new_inbound("CA1".to_string(), "+1000".to_string(), "+1001".to_string());
        record.append_user("hello", Some(0.9));
        let json = serde_json::to_value(record.summary()).unwrap();

        assert_eq!(json["callSid"], "CA1");
        assert_eq!(json["direction"], "inbound");
        assert_eq!(json["state"], "initiated");
        assert_eq!(json["conversationState"], "idle");
        assert_eq!(json["transcript"][0]["role"], "user");
        assert!(json.get("streamSid").is_none());
    }
}
