//! Stream-token client.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{StreamError, StreamResult};

/// Client for the session-scoped stream-token endpoint.
#[derive(Debug, Clone)]
pub struct TokenClient {
    /// HTTP client.
    client: Client,
    /// Base URL of the agent API.
    base_url: String,
    /// Long-lived API key used to authenticate the token request.
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamTokenResponse {
    token: String,
}

impl TokenClient {
    /// Create a new token client.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Fetch a short-lived stream token for a session.
    pub async fn fetch_stream_token(&self, session_id: &str) -> StreamResult<String> {
        let url = format!(
            "{}/api/sessions/{}/stream-token",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(session_id)
        );

        let mut request = self.client.post(&url);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| StreamError::TokenFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::TokenFetch(format!(
                "HTTP {}",
                status.as_u16()
            )));
        }

        let body: StreamTokenResponse = response
            .json()
            .await
            .map_err(|e| StreamError::TokenFetch(e.to_string()))?;

        Ok(body.token)
    }
}
