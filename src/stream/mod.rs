//! Live agent event stream: parsing, validation, lifecycle, derived state.
//!
//! This module provides the client for the long-lived, server-to-client
//! event feed of a running agent session. Transport bytes flow one way:
//! frame parser -> event validator -> lifecycle manager -> bounded buffers
//! and derived state visible to consumers.

pub mod client;
pub mod events;
pub mod sse;
pub mod state;

pub use client::{EventCallback, StreamClient};
pub use events::{AgentEvent, AgentStatus, LogLevel, MessageRole, StreamEvent};
pub use sse::{FrameParser, RawFrame};
pub use state::{ConnectionState, EventBuffer, MetricsSnapshot, StreamSnapshot};
