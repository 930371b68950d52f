//! Stream client error types.

use thiserror::Error;

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while opening or consuming an agent event stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP request failed at the transport level.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Stream endpoint returned a non-success status.
    #[error("stream endpoint returned HTTP {status}")]
    Http { status: u16 },

    /// Every credential candidate was rejected with 401/403.
    #[error("authentication failed: all credential candidates rejected")]
    AuthRejected,

    /// Token-issuing endpoint failed.
    #[error("failed to fetch stream token: {0}")]
    TokenFetch(String),

    /// Reconnect attempts exhausted.
    #[error("failed to connect after {attempts} attempts")]
    AttemptsExhausted { attempts: u32 },
}
