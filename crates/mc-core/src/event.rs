use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Namespaced event type, `category:action` on the wire.
///
/// The known kinds are a closed set; anything else a producer publishes is
/// carried through as [`EventKind::Custom`] without the hub caring about it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    AgentStatusChange,
    AgentActivity,
    LeadAdded,
    LeadUpdated,
    LeadScored,
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskAssigned,
    TokenUsage,
    TokenThreshold,
    SystemAlert,
    SystemStatus,
    FileChange,
    ClientConnected,
    ClientDisconnected,
    Custom(String),
}

const KNOWN_TYPES: [&str; 16] = [
    "agent:statusChange",
    "agent:activity",
    "lead:added",
    "lead:updated",
    "lead:scored",
    "task:created",
    "task:updated",
    "task:completed",
    "task:assigned",
    "token:usage",
    "token:threshold",
    "system:alert",
    "system:status",
    "file:change",
    "client:connected",
    "client:disconnected",
];

impl EventKind {
    /// Wire strings of every known event type, advertised in the welcome frame.
    pub fn known_types() -> &'static [&'static str] {
        &KNOWN_TYPES
    }

    pub fn parse(input: &str) -> Self {
        match input {
            "agent:statusChange" => EventKind::AgentStatusChange,
            "agent:activity" => EventKind::AgentActivity,
            "lead:added" => EventKind::LeadAdded,
            "lead:updated" => EventKind::LeadUpdated,
            "lead:scored" => EventKind::LeadScored,
            "task:created" => EventKind::TaskCreated,
            "task:updated" => EventKind::TaskUpdated,
            "task:completed" => EventKind::TaskCompleted,
            "task:assigned" => EventKind::TaskAssigned,
            "token:usage" => EventKind::TokenUsage,
            "token:threshold" => EventKind::TokenThreshold,
            "system:alert" => EventKind::SystemAlert,
            "system:status" => EventKind::SystemStatus,
            "file:change" => EventKind::FileChange,
            "client:connected" => EventKind::ClientConnected,
            "client:disconnected" => EventKind::ClientDisconnected,
            other => EventKind::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AgentStatusChange => "agent:statusChange",
            EventKind::AgentActivity => "agent:activity",
            EventKind::LeadAdded => "lead:added",
            EventKind::LeadUpdated => "lead:updated",
            EventKind::LeadScored => "lead:scored",
            EventKind::TaskCreated => "task:created",
            EventKind::TaskUpdated => "task:updated",
            EventKind::TaskCompleted => "task:completed",
            EventKind::TaskAssigned => "task:assigned",
            EventKind::TokenUsage => "token:usage",
            EventKind::TokenThreshold => "token:threshold",
            EventKind::SystemAlert => "system:alert",
            EventKind::SystemStatus => "system:status",
            EventKind::FileChange => "file:change",
            EventKind::ClientConnected => "client:connected",
            EventKind::ClientDisconnected => "client:disconnected",
            EventKind::Custom(other) => other,
        }
    }

    /// Segment before the first colon. Types with more than one colon still
    /// categorize on the first segment only.
    pub fn category(&self) -> &str {
        let full = self.as_str();
        full.split(':').next().unwrap_or(full)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(EventKind::parse(&raw))
    }
}

/// A domain fact to be broadcast. The payload is opaque to the hub; the
/// timestamp is assigned once at publish and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }
}
