//! Connection lifecycle manager for the agent event stream.
//!
//! A single tokio task owns the connection, the frame parser, and all
//! buffers. Handle methods send commands to the task; consumers read
//! point-in-time snapshots of the derived state. Token fetch and credential
//! probing run in a cancellable sub-task whose result is tagged with the
//! attempt generation, so a completion superseded by a newer `connect()` or
//! `disconnect()` is discarded instead of mutating state.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use reqwest::StatusCode;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::{negotiate, AuthCandidate, TokenClient};
use crate::config::StreamConfig;
use crate::error::StreamError;

use super::events::{validate_frame, AgentEvent, StreamEvent};
use super::sse::FrameParser;
use super::state::{ConnectionState, StreamSnapshot, StreamState, TypingTimer};

/// Callback invoked by the actor for every validated event.
pub type EventCallback = Box<dyn Fn(&StreamEvent) + Send + Sync>;

type EventCallbackCell = std::sync::RwLock<Option<EventCallback>>;

type BodyStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

enum Command {
    Connect { session_id: String },
    Disconnect,
    ClearEvents,
    NetworkLost,
    NetworkRestored,
}

enum ProbeOutcome {
    /// A candidate was accepted; the response body is the stream.
    Connected(reqwest::Response),
    /// Every candidate was rejected with 401/403 (or none existed).
    Auth,
    /// Transport-level failure; eligible for backoff retry.
    Transport(StreamError),
}

struct ProbeReport {
    generation: u64,
    outcome: ProbeOutcome,
}

/// Handle to a running stream client.
///
/// Dropping the handle stops the actor.
pub struct StreamClient {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<StreamState>>,
    on_event: Arc<EventCallbackCell>,
    task: JoinHandle<()>,
}

impl StreamClient {
    /// Spawn a client actor for the given configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(config: StreamConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        let tokens = TokenClient::new(config.base_url.clone(), config.api_key.clone());

        let state = Arc::new(RwLock::new(StreamState::new(
            config.max_events,
            config.max_messages,
        )));
        let on_event: Arc<EventCallbackCell> = Arc::new(std::sync::RwLock::new(None));

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            config,
            http,
            tokens,
            state: state.clone(),
            on_event: on_event.clone(),
            cmd_rx,
            probe_tx,
            probe_rx,
            session_id: None,
            generation: 0,
            attempts: 0,
            ever_connected: false,
            want_stream: false,
            network_down: false,
            cancel: CancellationToken::new(),
            parser: FrameParser::new(),
            body: None,
            reconnect_at: None,
            typing_deadline: None,
        };

        let task = tokio::spawn(actor.run());

        Self {
            cmd_tx,
            state,
            on_event,
            task,
        }
    }

    /// Open (or re-open) the stream for a session.
    ///
    /// Connecting to a different session than before clears buffers and
    /// derived state and resets the attempt budget.
    pub fn connect(&self, session_id: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Connect {
            session_id: session_id.into(),
        });
    }

    /// Close the stream and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// Drop buffered events and derived agent state.
    pub fn clear_events(&self) {
        let _ = self.cmd_tx.send(Command::ClearEvents);
    }

    /// Signal that the machine lost network connectivity.
    ///
    /// Tears the active connection down without consuming a reconnect
    /// attempt.
    pub fn network_lost(&self) {
        let _ = self.cmd_tx.send(Command::NetworkLost);
    }

    /// Signal that network connectivity is back.
    ///
    /// Reconnects immediately if the stream is still wanted.
    pub fn network_restored(&self) {
        let _ = self.cmd_tx.send(Command::NetworkRestored);
    }

    /// Replace the event callback.
    ///
    /// The actor reads the cell at dispatch time, so swapping the callback
    /// never disturbs the active connection.
    pub fn set_on_event(&self, callback: Option<EventCallback>) {
        *self
            .on_event
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = callback;
    }

    /// Point-in-time copy of the derived state.
    pub async fn snapshot(&self) -> StreamSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.read().await.connection == ConnectionState::Connected
    }

    pub async fn is_connecting(&self) -> bool {
        matches!(
            self.state.read().await.connection,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.connection
    }

    pub async fn last_error(&self) -> Option<String> {
        self.state.read().await.last_error.clone()
    }

    /// The bounded full event log, oldest first.
    pub async fn events(&self) -> Vec<StreamEvent> {
        self.state.read().await.events.to_vec()
    }

    /// The bounded display-relevant subset, oldest first.
    pub async fn messages(&self) -> Vec<StreamEvent> {
        self.state.read().await.messages.to_vec()
    }

    /// Stop the actor and wait for it to finish.
    pub async fn shutdown(self) {
        drop(self.cmd_tx);
        let _ = self.task.await;
    }
}

struct Actor {
    config: StreamConfig,
    http: reqwest::Client,
    tokens: TokenClient,
    state: Arc<RwLock<StreamState>>,
    on_event: Arc<EventCallbackCell>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    probe_tx: mpsc::UnboundedSender<ProbeReport>,
    probe_rx: mpsc::UnboundedReceiver<ProbeReport>,

    session_id: Option<String>,
    /// Attempt token; bumped by every connect/disconnect and every retry.
    generation: u64,
    /// Consecutive failed attempts since the last successful connection.
    attempts: u32,
    ever_connected: bool,
    want_stream: bool,
    network_down: bool,
    cancel: CancellationToken,
    parser: FrameParser,
    body: Option<BodyStream>,
    reconnect_at: Option<Instant>,
    typing_deadline: Option<Instant>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(report) = self.probe_rx.recv() => {
                    self.handle_probe_report(report).await;
                }
                chunk = next_chunk(&mut self.body) => {
                    self.handle_chunk(chunk).await;
                }
                _ = sleep_until_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.begin_attempt().await;
                }
                _ = sleep_until_opt(self.typing_deadline) => {
                    self.typing_deadline = None;
                    debug!("Typing indicator expired");
                    self.state.write().await.typing = false;
                }
            }
        }

        // Handle dropped: abort anything still in flight.
        self.cancel.cancel();
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { session_id } => self.connect(session_id).await,
            Command::Disconnect => self.disconnect().await,
            Command::ClearEvents => {
                self.typing_deadline = None;
                self.state.write().await.clear_events();
            }
            Command::NetworkLost => self.network_lost().await,
            Command::NetworkRestored => self.network_restored().await,
        }
    }

    async fn connect(&mut self, session_id: String) {
        if self.session_id.as_deref() != Some(session_id.as_str()) {
            // New logical session: fresh attempt budget, no stale partial
            // frames, no leftover derived state.
            self.attempts = 0;
            self.ever_connected = false;
            self.parser.reset();
            self.typing_deadline = None;
            self.state.write().await.reset_session();
            self.session_id = Some(session_id);
        }
        self.want_stream = true;
        self.begin_attempt().await;
    }

    async fn disconnect(&mut self) {
        self.want_stream = false;
        self.generation += 1;
        self.cancel.cancel();
        self.body = None;
        self.reconnect_at = None;
        self.typing_deadline = None;
        self.parser.reset();

        let mut state = self.state.write().await;
        if state.connection != ConnectionState::Disconnected {
            info!("Agent event stream disconnected");
        }
        state.connection = ConnectionState::Disconnected;
        state.typing = false;
    }

    async fn network_lost(&mut self) {
        // Tear down immediately; this does not count as a failed attempt.
        self.network_down = true;
        self.generation += 1;
        self.cancel.cancel();
        self.body = None;
        self.reconnect_at = None;

        if self.want_stream {
            warn!("Network lost, holding agent stream until connectivity returns");
            let mut state = self.state.write().await;
            state.connection = ConnectionState::Reconnecting {
                attempt: self.attempts,
            };
        }
    }

    async fn network_restored(&mut self) {
        self.network_down = false;
        if self.want_stream && self.body.is_none() {
            info!("Network restored, reconnecting agent stream");
            self.begin_attempt().await;
        }
    }

    /// Start one connection attempt, superseding anything in flight.
    async fn begin_attempt(&mut self) {
        let Some(session_id) = self.session_id.clone() else {
            return;
        };

        self.generation += 1;
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.body = None;
        self.reconnect_at = None;

        self.state.write().await.connection = ConnectionState::Connecting;

        debug!(
            "Opening agent event stream for session {} (attempt {})",
            session_id,
            self.attempts + 1
        );

        let generation = self.generation;
        let cancel = self.cancel.clone();
        let http = self.http.clone();
        let tokens = self.tokens.clone();
        let probe_tx = self.probe_tx.clone();
        let base_url = self.config.base_url.clone();
        let api_key = self.config.api_key.clone();
        let allow_api_key_stream = self.config.allow_api_key_stream;

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = probe_stream(
                    http,
                    tokens,
                    base_url,
                    api_key,
                    allow_api_key_stream,
                    session_id,
                ) => outcome,
            };
            let _ = probe_tx.send(ProbeReport {
                generation,
                outcome,
            });
        });
    }

    async fn handle_probe_report(&mut self, report: ProbeReport) {
        if report.generation != self.generation {
            debug!(
                "Discarding stale connection attempt result (generation {})",
                report.generation
            );
            return;
        }

        match report.outcome {
            ProbeOutcome::Connected(response) => {
                self.attempts = 0;
                self.ever_connected = true;
                self.parser.reset();
                self.body = Some(Box::pin(response.bytes_stream()));

                let mut state = self.state.write().await;
                state.connection = ConnectionState::Connected;
                state.last_error = None;
                info!(
                    "Connected to agent event stream for session {:?}",
                    self.session_id
                );
            }
            ProbeOutcome::Auth => {
                // Not retryable with the same credentials; wait for the
                // caller to connect() again.
                self.want_stream = false;
                self.body = None;

                let message = StreamError::AuthRejected.to_string();
                error!(
                    "Agent stream auth failed for session {:?}",
                    self.session_id
                );
                let mut state = self.state.write().await;
                state.connection = ConnectionState::Failed;
                set_error(&mut state, message);
            }
            ProbeOutcome::Transport(err) => {
                self.handle_stream_failure(err.to_string()).await;
            }
        }
    }

    async fn handle_chunk(&mut self, chunk: Option<reqwest::Result<Bytes>>) {
        match chunk {
            Some(Ok(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                for frame in self.parser.feed(&text) {
                    match validate_frame(&frame) {
                        Some(event) => self.dispatch(event).await,
                        None => {
                            debug!("Dropping unrecognized frame: event={}", frame.event_name)
                        }
                    }
                }
            }
            Some(Err(e)) => {
                self.handle_stream_failure(format!("stream read error: {e}"))
                    .await;
            }
            None => {
                self.handle_stream_failure("stream closed by server".to_string())
                    .await;
            }
        }
    }

    async fn dispatch(&mut self, event: AgentEvent) {
        let stream_event = StreamEvent::new(event);

        let timer = self.state.write().await.apply(&stream_event);
        match timer {
            TypingTimer::Arm => {
                self.typing_deadline =
                    Some(Instant::now() + Duration::from_millis(self.config.typing_timeout_ms));
            }
            TypingTimer::Cancel => self.typing_deadline = None,
            TypingTimer::Unchanged => {}
        }

        let callback = self
            .on_event
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(callback) = callback.as_ref() {
            callback(&stream_event);
        }
    }

    /// React to a dropped connection or failed attempt.
    async fn handle_stream_failure(&mut self, reason: String) {
        self.body = None;
        self.typing_deadline = None;

        if !self.want_stream {
            return;
        }

        warn!(
            "Agent stream for session {:?} failed: {}",
            self.session_id, reason
        );

        if self.network_down {
            // Wait for the restoration signal instead of burning attempts.
            let mut state = self.state.write().await;
            state.typing = false;
            state.connection = ConnectionState::Reconnecting {
                attempt: self.attempts,
            };
            return;
        }

        let can_retry =
            self.config.auto_reconnect && self.attempts < self.config.max_reconnect_attempts;

        if can_retry {
            self.attempts += 1;
            let delay = backoff_delay(
                self.config.base_backoff_ms,
                self.config.max_backoff_ms,
                self.attempts,
            );
            let message = if self.ever_connected {
                "connection lost, reconnecting".to_string()
            } else {
                "waiting for agent to start".to_string()
            };

            debug!(
                "Scheduling reconnect attempt {} in {}ms",
                self.attempts, delay
            );
            {
                let mut state = self.state.write().await;
                state.typing = false;
                state.connection = ConnectionState::Reconnecting {
                    attempt: self.attempts,
                };
                set_error(&mut state, message);
            }
            self.reconnect_at = Some(Instant::now() + Duration::from_millis(delay));
        } else {
            let message = if self.config.auto_reconnect {
                StreamError::AttemptsExhausted {
                    attempts: self.attempts,
                }
                .to_string()
            } else {
                reason
            };
            error!(
                "Agent stream for session {:?} is terminally failed: {}",
                self.session_id, message
            );
            let mut state = self.state.write().await;
            state.typing = false;
            state.connection = ConnectionState::Failed;
            set_error(&mut state, message);
        }
    }
}

/// Record a user-visible error, skipping consecutive duplicates.
fn set_error(state: &mut StreamState, message: String) {
    if state.last_error.as_deref() == Some(message.as_str()) {
        return;
    }
    info!("Agent stream: {}", message);
    state.last_error = Some(message);
}

async fn next_chunk(body: &mut Option<BodyStream>) -> Option<reqwest::Result<Bytes>> {
    match body.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Fetch a stream token, negotiate candidates, and probe them in order.
///
/// A 401/403 advances to the next candidate; any other response (success or
/// failure) stops the search. Exhausting every candidate on 401/403 is an
/// authentication failure, distinct from a transport failure.
async fn probe_stream(
    http: reqwest::Client,
    tokens: TokenClient,
    base_url: String,
    api_key: Option<String>,
    allow_api_key_stream: bool,
    session_id: String,
) -> ProbeOutcome {
    let stream_token = match tokens.fetch_stream_token(&session_id).await {
        Ok(token) => Some(token),
        Err(e) => {
            debug!("Stream token fetch failed for session {}: {}", session_id, e);
            None
        }
    };

    let candidates = negotiate(
        stream_token.as_deref(),
        api_key.as_deref(),
        allow_api_key_stream,
    );
    if candidates.is_empty() {
        debug!("No usable credentials for session {}", session_id);
        return ProbeOutcome::Auth;
    }

    let url = format!(
        "{}/api/sessions/{}/events",
        base_url.trim_end_matches('/'),
        urlencoding::encode(&session_id)
    );

    for candidate in &candidates {
        match probe_candidate(&http, &url, candidate).await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!("Accepted: {}", candidate.description);
                    return ProbeOutcome::Connected(response);
                }
                if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                    debug!("Rejected ({}): {}", status.as_u16(), candidate.description);
                    continue;
                }
                return ProbeOutcome::Transport(StreamError::Http {
                    status: status.as_u16(),
                });
            }
            Err(e) => return ProbeOutcome::Transport(StreamError::Transport(e)),
        }
    }

    ProbeOutcome::Auth
}

async fn probe_candidate(
    http: &reqwest::Client,
    url: &str,
    candidate: &AuthCandidate,
) -> reqwest::Result<reqwest::Response> {
    let mut request = http.get(url).header("Accept", "text/event-stream");
    for (name, value) in &candidate.headers {
        request = request.header(name.as_str(), value.as_str());
    }
    if !candidate.query.is_empty() {
        request = request.query(&candidate.query);
    }
    request.send().await
}

/// Deterministic exponential backoff, floored at the base and capped.
fn backoff_raw(base_ms: u64, cap_ms: u64, attempt: u32) -> u64 {
    let base = base_ms.max(1) as f64;
    let exp = 2.0_f64.powi(attempt.min(16) as i32);
    ((base * exp) as u64).clamp(base_ms, cap_ms)
}

/// Backoff delay with up to +/-10% jitter.
fn backoff_delay(base_ms: u64, cap_ms: u64, attempt: u32) -> u64 {
    let raw = backoff_raw(base_ms, cap_ms, attempt);
    let jitter = raw as f64 * 0.1 * (rand::random::<f64>() * 2.0 - 1.0);
    ((raw as f64 + jitter) as u64).clamp(base_ms, cap_ms + cap_ms / 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_raw_non_decreasing_and_capped() {
        let mut previous = 0;
        for attempt in 1..=5 {
            let delay = backoff_raw(100, 1000, attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay >= 100);
            assert!(delay <= 1000);
            previous = delay;
        }
        assert_eq!(backoff_raw(100, 1000, 1), 200);
        assert_eq!(backoff_raw(100, 1000, 3), 800);
        assert_eq!(backoff_raw(100, 1000, 5), 1000);
    }

    #[test]
    fn test_backoff_raw_survives_huge_attempt_numbers() {
        assert_eq!(backoff_raw(100, 1000, u32::MAX), 1000);
    }

    #[test]
    fn test_backoff_jitter_stays_within_bounds() {
        for attempt in 1..=8 {
            for _ in 0..100 {
                let delay = backoff_delay(100, 1000, attempt);
                assert!(delay >= 100, "attempt {attempt} went below base");
                assert!(delay <= 1100, "attempt {attempt} exceeded cap + jitter");
            }
        }
    }
}
