use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::StatusReport;

/// Envelope exchanged with the controller: `{"type": ..., "data": ...}`.
///
/// `cmd` is the only frame the controller sends; `status` and `msg` are the
/// two frames the daemon emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Frame {
    Cmd(CommandPayload),
    Status(StatusReport),
    Msg(ChatMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandPayload {
    pub cmd: String,
}

/// A chat line scraped from the server console, timestamped at forward time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl ChatMessage {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cmd_frame_deserialization() {
        let frame = Frame::Cmd(CommandPayload {
            cmd: "say hello".to_string(),
        });
        let deserialized: Frame = serde_json::from_str(
            r#"{
            "type": "cmd",
            "data": {
                "cmd": "say hello"
            }
        }"#,
        )
        .unwrap();
        assert_eq!(frame, deserialized);
    }

    #[test]
    fn msg_frame_serialization() {
        let frame = Frame::Msg(ChatMessage {
            timestamp: DateTime::parse_from_rfc3339("2024-05-01T12:01:00Z")
                .unwrap()
                .with_timezone(&Utc),
            message: "<alice> hi".to_string(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "msg");
        assert_eq!(value["data"]["message"], "<alice> hi");
        // timestamp round-trips as RFC 3339 text
        let back: Frame = serde_json::from_value(value).unwrap();
        assert_eq!(frame, back);
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        assert!(serde_json::from_str::<Frame>(r#"{"type":"ping","data":{}}"#).is_err());
    }
}
