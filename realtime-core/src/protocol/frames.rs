// Frame types exchanged with the backend

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Application-level envelope used for event demultiplexing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Extract an envelope from an already parsed JSON value.
    ///
    /// Only objects whose `event` field is a string qualify.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let event = object.get("event")?.as_str()?;
        Some(Self {
            event: event.to_string(),
            data: object.get("data").cloned().unwrap_or(Value::Null),
        })
    }
}

/// Heartbeat ping frame: `{"type":"ping","t":<epoch-ms>}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingFrame {
    #[serde(rename = "type")]
    kind: PingKind,
    pub t: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum PingKind {
    Ping,
}

impl PingFrame {
    pub fn at(epoch_ms: i64) -> Self {
        Self {
            kind: PingKind::Ping,
            t: epoch_ms,
        }
    }

    pub fn now() -> Self {
        Self::at(chrono::Utc::now().timestamp_millis())
    }

    pub fn to_frame(&self) -> String {
        format!(r#"{{"type":"ping","t":{}}}"#, self.t)
    }
}

/// Something the caller wants transmitted
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// Already serialized; sent as-is
    Text(String),
    /// Structured payload; serialized to a JSON text frame
    Json(Value),
}

impl OutboundMessage {
    /// Render as a wire frame
    pub fn into_frame(self) -> String {
        match self {
            OutboundMessage::Text(text) => text,
            OutboundMessage::Json(value) => value.to_string(),
        }
    }
}

impl From<&str> for OutboundMessage {
    fn from(value: &str) -> Self {
        OutboundMessage::Text(value.to_string())
    }
}

impl From<String> for OutboundMessage {
    fn from(value: String) -> Self {
        OutboundMessage::Text(value)
    }
}

impl From<Value> for OutboundMessage {
    fn from(value: Value) -> Self {
        OutboundMessage::Json(value)
    }
}

impl From<Envelope> for OutboundMessage {
    fn from(value: Envelope) -> Self {
        OutboundMessage::Json(serde_json::json!({
            "event": value.event,
            "data": value.data,
        }))
    }
}

/// Payload of the built-in `message` event
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Frame exactly as received
    pub raw: String,
    /// Parsed JSON, when the frame is valid JSON
    pub json: Option<Value>,
    pub is_mock: bool,
}

impl InboundMessage {
    pub fn parse(raw: String, is_mock: bool) -> Self {
        let json = serde_json::from_str::<Value>(&raw).ok();
        Self { raw, json, is_mock }
    }

    /// Envelope carried by this frame, if any
    pub fn envelope(&self) -> Option<Envelope> {
        self.json.as_ref().and_then(Envelope::from_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ping_frame_format() {
        let frame = PingFrame::at(1_700_000_000_000).to_frame();
        assert_eq!(frame, r#"{"type":"ping","t":1700000000000}"#);

        let parsed: PingFrame = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed.t, 1_700_000_000_000);
    }

    #[test]
    fn test_envelope_detection() {
        let msg = InboundMessage::parse(r#"{"event":"match:found","data":{"id":7}}"#.into(), false);
        let envelope = msg.envelope().expect("envelope");
        assert_eq!(envelope.event, "match:found");
        assert_eq!(envelope.data, json!({"id": 7}));

        let msg = InboundMessage::parse(r#"{"event":42,"data":1}"#.into(), false);
        assert!(msg.envelope().is_none());

        let msg = InboundMessage::parse("not json".into(), true);
        assert!(msg.json.is_none());
        assert!(msg.envelope().is_none());
    }

    #[test]
    fn test_outbound_text_is_untouched() {
        let frame = OutboundMessage::from("  raw  ").into_frame();
        assert_eq!(frame, "  raw  ");
    }

    #[test]
    fn test_outbound_envelope_serializes() {
        let frame = OutboundMessage::from(Envelope::new("queue:join", json!({"mode": "ranked"})))
            .into_frame();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value, json!({"event": "queue:join", "data": {"mode": "ranked"}}));
    }
}
