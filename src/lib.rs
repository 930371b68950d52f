//! Live event stream client for AI agent sessions.
//!
//! This library opens a long-lived event feed for a running agent session,
//! authenticates it, parses the wire format incrementally, validates event
//! payloads, recovers from transient failures with bounded exponential
//! backoff, and projects the feed into bounded, consumer-safe derived state.

pub mod auth;
pub mod config;
pub mod error;
pub mod stream;

pub use config::StreamConfig;
pub use error::{StreamError, StreamResult};
pub use stream::{
    AgentEvent, AgentStatus, ConnectionState, MetricsSnapshot, StreamClient, StreamEvent,
    StreamSnapshot,
};
