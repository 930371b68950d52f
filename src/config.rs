use serde::{Deserialize, Serialize};

/// Stream client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Base URL of the agent API (e.g. "http://localhost:8017").
    pub base_url: String,

    /// Long-lived API key, if the caller has one.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Allow presenting the long-lived API key on the stream endpoint.
    #[serde(default)]
    pub allow_api_key_stream: bool,

    /// Automatically reconnect after a dropped connection.
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// Maximum number of reconnection attempts before giving up.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay for exponential backoff (milliseconds).
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Maximum backoff delay (milliseconds).
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Capacity of the full event buffer.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    /// Capacity of the display message buffer.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// How long the typing indicator stays on without a follow-up (milliseconds).
    #[serde(default = "default_typing_timeout_ms")]
    pub typing_timeout_ms: u64,
}

impl StreamConfig {
    /// Create a configuration with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            allow_api_key_stream: false,
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_events: default_max_events(),
            max_messages: default_max_messages(),
            typing_timeout_ms: default_typing_timeout_ms(),
        }
    }
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_events() -> usize {
    1000
}

fn default_max_messages() -> usize {
    200
}

fn default_typing_timeout_ms() -> u64 {
    5_000
}
