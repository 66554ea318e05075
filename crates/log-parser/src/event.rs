use serde::{Deserialize, Serialize};

/// The kinds of events a worker's NDJSON stdout stream can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    System,
    Assistant,
    User,
    Result,
    ToolUse,
    ToolResult,
    Error,
}

/// A single decoded unit from a worker's stdout. This is the only shape
/// the rest of the system ever sees from worker output — callers never
/// touch raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_error: bool,
    pub timestamp: i64,
}

/// Health derived from the most recently observed event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSignal {
    pub state: HealthState,
    pub is_healthy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Idle,
    Working,
    Errored,
    Unknown,
}

/// The raw wire shape on worker stdout, before it is folded into `Event`.
/// Mirrors the `type`/`subtype` tagging the worker binary actually emits.
#[derive(Debug, Deserialize)]
pub(crate) struct RawLine {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub is_error: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawMessage {
    #[serde(default)]
    pub content: Option<Vec<RawContentPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum RawContentPart {
    Text { text: String },
    #[serde(other)]
    Other,
}
