//! Bounded buffers and derived consumer-visible state.

use std::collections::VecDeque;

use serde::Serialize;

use super::events::{AgentEvent, AgentStatus, LogLevel, StreamEvent};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
    Failed,
}

/// Last-known agent metrics, zeroed until first report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub loop_count: u64,
    pub tokens_used: u64,
    pub tool_calls: u64,
    pub uptime_seconds: f64,
}

/// Fixed-capacity FIFO buffer; pushing past capacity drops the oldest entry.
#[derive(Debug)]
pub struct EventBuffer {
    items: VecDeque<StreamEvent>,
    capacity: usize,
}

impl EventBuffer {
    /// Create an empty buffer with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append an event, evicting the oldest one at capacity.
    pub fn push(&mut self, event: StreamEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamEvent> {
        self.items.iter()
    }

    /// Copy the buffered events, oldest first.
    pub fn to_vec(&self) -> Vec<StreamEvent> {
        self.items.iter().cloned().collect()
    }
}

/// Timer adjustment required after applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingTimer {
    Unchanged,
    /// Start (or restart) the typing expiry timer.
    Arm,
    /// Cancel any pending typing expiry timer.
    Cancel,
}

/// Consumer-visible projection of the stream.
///
/// Written only by the client actor; consumers take read-only snapshots.
#[derive(Debug)]
pub struct StreamState {
    pub connection: ConnectionState,
    pub last_error: Option<String>,
    pub events: EventBuffer,
    pub messages: EventBuffer,
    pub agent_status: Option<AgentStatus>,
    pub metrics: MetricsSnapshot,
    pub typing: bool,
    pub last_heartbeat: Option<String>,
}

/// Point-in-time copy of the derived state, without the buffers.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSnapshot {
    pub connection: ConnectionState,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub last_error: Option<String>,
    pub agent_status: Option<AgentStatus>,
    pub metrics: MetricsSnapshot,
    pub typing: bool,
    pub last_heartbeat: Option<String>,
}

impl StreamState {
    pub fn new(max_events: usize, max_messages: usize) -> Self {
        Self {
            connection: ConnectionState::Idle,
            last_error: None,
            events: EventBuffer::new(max_events),
            messages: EventBuffer::new(max_messages),
            agent_status: None,
            metrics: MetricsSnapshot::default(),
            typing: false,
            last_heartbeat: None,
        }
    }

    /// Record one validated event and update every derived field.
    ///
    /// Returns how the typing expiry timer should be adjusted; the timer
    /// itself lives with the actor that owns this state.
    pub fn apply(&mut self, event: &StreamEvent) -> TypingTimer {
        let mut timer = TypingTimer::Unchanged;

        match &event.event {
            AgentEvent::StatusChanged { status } => {
                self.agent_status = Some(*status);
                self.typing = false;
                timer = TypingTimer::Cancel;
            }
            AgentEvent::Thinking { .. } => {
                self.typing = true;
                timer = TypingTimer::Arm;
            }
            AgentEvent::Message { .. } | AgentEvent::Error { .. } => {
                self.typing = false;
                timer = TypingTimer::Cancel;
            }
            AgentEvent::Metrics {
                loop_count,
                tokens_used,
                tool_calls,
                uptime_seconds,
            } => {
                self.metrics = MetricsSnapshot {
                    loop_count: *loop_count,
                    tokens_used: *tokens_used,
                    tool_calls: *tool_calls,
                    uptime_seconds: *uptime_seconds,
                };
            }
            AgentEvent::Heartbeat { timestamp } => {
                self.last_heartbeat = Some(timestamp.clone());
            }
            _ => {}
        }

        self.events.push(event.clone());
        if is_display_relevant(&event.event) {
            self.messages.push(event.clone());
        }

        timer
    }

    /// Drop buffered events and derived agent state.
    ///
    /// Connection fields are untouched.
    pub fn clear_events(&mut self) {
        self.events.clear();
        self.messages.clear();
        self.agent_status = None;
        self.metrics = MetricsSnapshot::default();
        self.typing = false;
        self.last_heartbeat = None;
    }

    /// Reset everything for a new logical session.
    pub fn reset_session(&mut self) {
        self.clear_events();
        self.last_error = None;
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            connection: self.connection,
            is_connected: matches!(self.connection, ConnectionState::Connected),
            is_connecting: matches!(
                self.connection,
                ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
            ),
            last_error: self.last_error.clone(),
            agent_status: self.agent_status,
            metrics: self.metrics,
            typing: self.typing,
            last_heartbeat: self.last_heartbeat.clone(),
        }
    }
}

/// Whether an event belongs in the display buffer.
///
/// Debug-level logs and bookkeeping events (heartbeat, metrics, status) are
/// kept out of the display subset.
fn is_display_relevant(event: &AgentEvent) -> bool {
    match event {
        AgentEvent::Message { .. }
        | AgentEvent::Thinking { .. }
        | AgentEvent::ToolCall { .. }
        | AgentEvent::ToolResult { .. }
        | AgentEvent::Error { .. } => true,
        AgentEvent::Log { level, .. } => *level != LogLevel::Debug,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::events::MessageRole;

    fn thinking() -> StreamEvent {
        StreamEvent::new(AgentEvent::Thinking {
            content: "hm".to_string(),
        })
    }

    fn message(id: &str) -> StreamEvent {
        StreamEvent::new(AgentEvent::Message {
            id: id.to_string(),
            content: "hi".to_string(),
            role: MessageRole::Assistant,
        })
    }

    fn log(level: LogLevel) -> StreamEvent {
        StreamEvent::new(AgentEvent::Log {
            level,
            message: "m".to_string(),
        })
    }

    #[test]
    fn test_buffer_caps_at_capacity_keeping_newest() {
        let mut buffer = EventBuffer::new(5);
        let mut ids = Vec::new();
        for _ in 0..8 {
            let event = thinking();
            ids.push(event.id);
            buffer.push(event);
        }
        assert_eq!(buffer.len(), 5);
        let kept: Vec<u64> = buffer.iter().map(|e| e.id).collect();
        assert_eq!(kept, ids[3..].to_vec());
    }

    #[test]
    fn test_display_buffer_excludes_debug_logs() {
        let mut state = StreamState::new(10, 10);
        state.apply(&log(LogLevel::Debug));
        state.apply(&log(LogLevel::Info));
        assert_eq!(state.events.len(), 2);
        assert_eq!(state.messages.len(), 1);
    }

    #[test]
    fn test_heartbeat_and_metrics_stay_out_of_display() {
        let mut state = StreamState::new(10, 10);
        state.apply(&StreamEvent::new(AgentEvent::Heartbeat {
            timestamp: "2026-08-06T00:00:00Z".to_string(),
        }));
        state.apply(&StreamEvent::new(AgentEvent::Metrics {
            loop_count: 1,
            tokens_used: 2,
            tool_calls: 3,
            uptime_seconds: 4.0,
        }));
        assert_eq!(state.events.len(), 2);
        assert!(state.messages.is_empty());
        assert_eq!(state.metrics.tokens_used, 2);
        assert_eq!(
            state.last_heartbeat.as_deref(),
            Some("2026-08-06T00:00:00Z")
        );
    }

    #[test]
    fn test_status_projection_retained_until_replaced() {
        let mut state = StreamState::new(10, 10);
        state.apply(&StreamEvent::new(AgentEvent::StatusChanged {
            status: AgentStatus::Starting,
        }));
        assert_eq!(state.agent_status, Some(AgentStatus::Starting));
        state.apply(&message("m1"));
        assert_eq!(state.agent_status, Some(AgentStatus::Starting));
        state.apply(&StreamEvent::new(AgentEvent::StatusChanged {
            status: AgentStatus::Running,
        }));
        assert_eq!(state.agent_status, Some(AgentStatus::Running));
    }

    #[test]
    fn test_thinking_arms_typing_and_message_cancels_it() {
        let mut state = StreamState::new(10, 10);
        assert_eq!(state.apply(&thinking()), TypingTimer::Arm);
        assert!(state.typing);

        assert_eq!(state.apply(&message("m1")), TypingTimer::Cancel);
        assert!(!state.typing);
    }

    #[test]
    fn test_status_change_cancels_typing() {
        let mut state = StreamState::new(10, 10);
        state.apply(&thinking());
        let timer = state.apply(&StreamEvent::new(AgentEvent::StatusChanged {
            status: AgentStatus::Paused,
        }));
        assert_eq!(timer, TypingTimer::Cancel);
        assert!(!state.typing);
    }

    #[test]
    fn test_tool_events_leave_typing_untouched() {
        let mut state = StreamState::new(10, 10);
        state.apply(&thinking());
        let timer = state.apply(&StreamEvent::new(AgentEvent::ToolCall {
            id: "t1".to_string(),
            tool_name: "bash".to_string(),
            arguments: serde_json::Map::new(),
        }));
        assert_eq!(timer, TypingTimer::Unchanged);
        assert!(state.typing);
    }

    #[test]
    fn test_clear_events_keeps_connection_fields() {
        let mut state = StreamState::new(10, 10);
        state.connection = ConnectionState::Connected;
        state.last_error = Some("old".to_string());
        state.apply(&message("m1"));
        state.clear_events();
        assert!(state.events.is_empty());
        assert!(state.messages.is_empty());
        assert_eq!(state.agent_status, None);
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.last_error.as_deref(), Some("old"));
    }

    #[test]
    fn test_reset_session_clears_error() {
        let mut state = StreamState::new(10, 10);
        state.last_error = Some("old".to_string());
        state.reset_session();
        assert!(state.last_error.is_none());
    }

    #[test]
    fn test_snapshot_flags() {
        let mut state = StreamState::new(10, 10);
        state.connection = ConnectionState::Reconnecting { attempt: 2 };
        let snapshot = state.snapshot();
        assert!(!snapshot.is_connected);
        assert!(snapshot.is_connecting);

        state.connection = ConnectionState::Connected;
        let snapshot = state.snapshot();
        assert!(snapshot.is_connected);
        assert!(!snapshot.is_connecting);
    }
}
