//! Wire envelopes for the carrier's media-stream WebSocket protocol.
//!
//! Every frame is a JSON object tagged by `event`. Inbound the bridge sees
//! `connected`, `start`, `media`, `stop` and `mark`; outbound it produces
//! `media`, `mark` and `clear`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StreamEnvelope {
    Connected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        protocol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        #[serde(
            rename = "sequenceNumber",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        sequence_number: Option<String>,
        start: StartMeta,
    },
    Media {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        #[serde(
            rename = "sequenceNumber",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        sequence_number: Option<String>,
        media: MediaMeta,
    },
    Stop {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop: Option<StopMeta>,
    },
    Mark {
        #[serde(rename = "streamSid", default, skip_serializing_if = "Option::is_none")]
        stream_sid: Option<String>,
        mark: MarkMeta,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Payload of the `start` envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(rename = "accountSid", default, skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    #[serde(default)]
    pub tracks: Vec<String>,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
    #[serde(rename = "mediaFormat", default, skip_serializing_if = "Option::is_none")]
    pub media_format: Option<MediaFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u16,
}

/// Payload of a `media` envelope. `payload` is base64-encoded mu-law.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub payload: String,
}

impl MediaMeta {
    pub fn outbound(payload: String) -> Self {
        Self {
            track: None,
            chunk: None,
            timestamp: None,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkMeta {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopMeta {
    #[serde(rename = "accountSid", default, skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,
    #[serde(rename = "callSid", default, skip_serializing_if = "Option::is_none")]
    pub call_sid: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_envelope() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1",
            "start": {
                "streamSid": "MZ1",
                "accountSid": "AC0",
                "callSid": "CA1",
                "tracks": ["inbound"],
                "customParameters": {"greeting": "hi"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            }
        }"#;
        let envelope: StreamEnvelope = serde_json::from_str(raw).unwrap();
        match envelope {
            StreamEnvelope::Start { start, .. } => {
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.call_sid, "CA1");
                assert_eq!(start.account_sid.as_deref(), Some("AC0"));
                assert_eq!(start.tracks, vec!["inbound"]);
                let format = start.media_format.unwrap();
                assert_eq!(format.sample_rate, 8000);
                assert_eq!(format.channels, 1);
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_media_envelope() {
        let raw = r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","chunk":"2","timestamp":"40","payload":"//8="}}"#;
        let envelope: StreamEnvelope = serde_json::from_str(raw).unwrap();
        match envelope {
            StreamEnvelope::Media { media, .. } => assert_eq!(media.payload, "//8="),
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_mark_and_stop() {
        let mark: StreamEnvelope =
            serde_json::from_str(r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"m-1"}}"#)
                .unwrap();
        assert!(matches!(
            mark,
            StreamEnvelope::Mark { mark: MarkMeta { ref name }, .. } if name == "m-1"
        ));

        let stop: StreamEnvelope = serde_json::from_str(
            r#"{"event":"stop","streamSid":"MZ1","stop":{"accountSid":"AC0","callSid":"CA1"}}"#,
        )
        .unwrap();
        assert!(matches!(stop, StreamEnvelope::Stop { .. }));
    }

    #[test]
    fn test_serialize_outbound_media() {
        let envelope = StreamEnvelope::Media {
            stream_sid: Some("MZ1".to_string()),
            sequence_number: None,
            media: MediaMeta::outbound("AAAA".to_string()),
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ1");
        assert_eq!(json["media"]["payload"], "AAAA");
        assert!(json["media"].get("track").is_none());
        assert!(json.get("sequenceNumber").is_none());
    }

    #[test]
    fn test_serialize_clear() {
        let envelope = StreamEnvelope::Clear {
            stream_sid: "MZ1".to_string(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"event":"clear","streamSid":"MZ1"}"#);
    }
}
