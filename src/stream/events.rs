//! Typed agent events and payload validation.
//!
//! Raw frames carry a JSON payload whose shape depends on the event type.
//! Validation turns a frame into one member of a closed set of typed events;
//! anything malformed, unknown, or schema-violating is dropped so a bad
//! producer can never wedge the stream.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use super::sse::RawFrame;

/// Canonical agent session statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Failed,
}

impl AgentStatus {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "starting" => Some(Self::Starting),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Author of a message event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Events sent by the agent over the stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StatusChanged {
        status: AgentStatus,
    },
    Thinking {
        content: String,
    },
    Message {
        id: String,
        content: String,
        role: MessageRole,
    },
    ToolCall {
        id: String,
        tool_name: String,
        arguments: Map<String, Value>,
    },
    ToolResult {
        tool_call_id: String,
        success: bool,
        duration_ms: f64,
        result: Value,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
    Metrics {
        loop_count: u64,
        tokens_used: u64,
        tool_calls: u64,
        uptime_seconds: f64,
    },
    Heartbeat {
        timestamp: String,
    },
}

static NEXT_STREAM_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// A validated event plus its process-unique id and arrival time.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl StreamEvent {
    /// Wrap a validated event, assigning the next process-unique id.
    pub fn new(event: AgentEvent) -> Self {
        Self {
            id: NEXT_STREAM_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Validate a raw frame into a typed event.
///
/// The payload must decode to a JSON object. Its `type` field, when present,
/// names the event type; otherwise the frame's event name does. The legacy
/// `status` type is canonicalized to `status_changed`. Unknown types and
/// schema violations yield `None`.
pub fn validate_frame(frame: &RawFrame) -> Option<AgentEvent> {
    let payload: Value = serde_json::from_str(&frame.data).ok()?;
    let payload = payload.as_object()?;

    let event_type = payload
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(frame.event_name.as_str());
    let event_type = if event_type == "status" {
        "status_changed"
    } else {
        event_type
    };

    match event_type {
        "status_changed" => {
            let status = AgentStatus::parse(payload.get("status")?.as_str()?)?;
            Some(AgentEvent::StatusChanged { status })
        }
        "thinking" => Some(AgentEvent::Thinking {
            content: string_field(payload, "content")?,
        }),
        "message" => Some(AgentEvent::Message {
            id: non_empty_field(payload, "id")?,
            content: string_field(payload, "content")?,
            role: MessageRole::parse(payload.get("role")?.as_str()?)?,
        }),
        "tool_call" => Some(AgentEvent::ToolCall {
            id: non_empty_field(payload, "id")?,
            tool_name: non_empty_field(payload, "tool_name")?,
            arguments: payload.get("arguments")?.as_object()?.clone(),
        }),
        "tool_result" => Some(AgentEvent::ToolResult {
            tool_call_id: non_empty_field(payload, "tool_call_id")?,
            success: payload.get("success")?.as_bool()?,
            duration_ms: finite_number(payload, "duration_ms")?,
            // Any value is fine, but the key must be present.
            result: payload.get("result")?.clone(),
        }),
        "log" => Some(AgentEvent::Log {
            level: LogLevel::parse(payload.get("level")?.as_str()?)?,
            message: string_field(payload, "message")?,
        }),
        "error" => Some(AgentEvent::Error {
            code: non_empty_field(payload, "code")?,
            message: string_field(payload, "message")?,
            recoverable: payload.get("recoverable")?.as_bool()?,
        }),
        "metrics" => Some(AgentEvent::Metrics {
            loop_count: finite_number(payload, "loop_count")? as u64,
            tokens_used: finite_number(payload, "tokens_used")? as u64,
            tool_calls: finite_number(payload, "tool_calls")? as u64,
            uptime_seconds: finite_number(payload, "uptime_seconds")?,
        }),
        "heartbeat" => Some(AgentEvent::Heartbeat {
            timestamp: string_field(payload, "timestamp")?,
        }),
        _ => None,
    }
}

fn string_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload.get(key)?.as_str().map(str::to_string)
}

fn non_empty_field(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload
        .get(key)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn finite_number(payload: &Map<String, Value>, key: &str) -> Option<f64> {
    payload.get(key)?.as_f64().filter(|n| n.is_finite())
}
