use crate::event::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON message: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("frame has no string \"type\" field")]
    MissingType,
}

/// Frames a client sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    Subscribe {
        #[serde(default)]
        events: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        events: Vec<String>,
    },
    Ping,
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        time: Option<i64>,
    },
    GetHistory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
}

/// An inbound message as the hub sees it: either a frame it knows, or an
/// arbitrary `{type, ...}` object passed through to producer-specific
/// handling. Only non-JSON input is an error.
#[derive(Debug, Clone)]
pub enum Inbound {
    Frame(ClientFrame),
    Custom { kind: String, payload: Value },
}

impl Inbound {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();
        match serde_json::from_value::<ClientFrame>(value.clone()) {
            Ok(frame) => Ok(Inbound::Frame(frame)),
            Err(_) => Ok(Inbound::Custom {
                kind,
                payload: value,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedData {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "serverTime")]
    pub server_time: DateTime<Utc>,
    #[serde(rename = "availableEvents")]
    pub available_events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscribedData {
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PongData {
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub message: String,
}

/// Control frames the hub sends to a client. Domain events travel next to
/// these as bare [`Event`] objects, see [`Outbound`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    Connected { data: ConnectedData },
    Subscribed { data: SubscribedData },
    Pong { data: PongData },
    History { data: Vec<Event> },
    Error { data: ErrorData },
    Ping,
}

/// An outbound message as the client sees it.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(ServerFrame),
    Event(Event),
}

impl Outbound {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("type").and_then(Value::as_str).is_none() {
            return Err(ProtocolError::MissingType);
        }
        if let Ok(frame) = serde_json::from_value::<ServerFrame>(value.clone()) {
            return Ok(Outbound::Frame(frame));
        }
        Ok(Outbound::Event(serde_json::from_value(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn parses_subscribe_frame() {
        let inbound = Inbound::parse(r#"{"type":"subscribe","events":["task","lead:added"]}"#)
            .expect("parse");
        match inbound {
            Inbound::Frame(ClientFrame::Subscribe { events }) => {
                assert_eq!(events, vec!["task", "lead:added"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_get_history_with_and_without_limit() {
        match Inbound::parse(r#"{"type":"getHistory","limit":2}"#).expect("parse") {
            Inbound::Frame(ClientFrame::GetHistory { limit }) => assert_eq!(limit, Some(2)),
            other => panic!("unexpected: {other:?}"),
        }
        match Inbound::parse(r#"{"type":"getHistory"}"#).expect("parse") {
            Inbound::Frame(ClientFrame::GetHistory { limit }) => assert_eq!(limit, None),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_custom_passthrough() {
        let inbound = Inbound::parse(r#"{"type":"request_agent_status","agent_id":"a1"}"#)
            .expect("parse");
        match inbound {
            Inbound::Custom { kind, payload } => {
                assert_eq!(kind, "request_agent_status");
                assert_eq!(payload["agent_id"], "a1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn garbage_is_a_protocol_error() {
        assert!(Inbound::parse("not json at all").is_err());
        assert!(matches!(
            Inbound::parse(r#"{"no_type":1}"#),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn server_frame_wire_tags() {
        let frame = ServerFrame::Error {
            data: ErrorData {
                message: "invalid JSON message".to_string(),
            },
        };
        let text = serde_json::to_string(&frame).expect("serialize");
        assert!(text.contains(r#""type":"error""#));

        let ping = serde_json::to_string(&ServerFrame::Ping).expect("serialize");
        assert_eq!(ping, r#"{"type":"ping"}"#);
    }

    #[test]
    fn outbound_distinguishes_frames_from_events() {
        match Outbound::parse(r#"{"type":"pong","data":{"time":12}}"#).expect("parse") {
            Outbound::Frame(ServerFrame::Pong { data }) => assert_eq!(data.time, 12),
            other => panic!("unexpected: {other:?}"),
        }
        match Outbound::parse(r#"{"type":"task:completed","data":{"taskId":"T1"}}"#)
            .expect("parse")
        {
            Outbound::Event(event) => {
                assert_eq!(event.kind, EventKind::TaskCompleted);
                assert_eq!(event.data["taskId"], "T1");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn client_count_notifications_parse_as_events() {
        match Outbound::parse(r#"{"type":"client:connected","data":{"clientCount":3}}"#)
            .expect("parse")
        {
            Outbound::Event(event) => {
                assert_eq!(event.kind, EventKind::ClientConnected);
                assert_eq!(event.data["clientCount"], 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
