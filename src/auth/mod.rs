//! Credential negotiation for the stream endpoint.
//!
//! The stream endpoint accepts either a short-lived, session-scoped stream
//! token or (behind a feature flag) the long-lived API key. Each way of
//! presenting credentials is an [`AuthCandidate`]; the lifecycle manager
//! tries them in order until one is not rejected.

pub mod token;

pub use token::TokenClient;

use std::collections::HashSet;

/// One way of presenting credentials when opening the stream.
///
/// Candidates are tried in order; a 401/403 response advances to the next
/// one, any other response stops the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCandidate {
    /// Headers to set on the stream request.
    pub headers: Vec<(String, String)>,
    /// Query parameters to append to the stream URL.
    pub query: Vec<(String, String)>,
    /// Human-readable description for logging.
    pub description: String,
}

impl AuthCandidate {
    /// Canonical signature used for deduplication.
    ///
    /// Two candidates with the same header and query entries (in any order)
    /// present identical credentials.
    fn signature(&self) -> String {
        let mut headers: Vec<String> = self
            .headers
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        headers.sort();

        let mut query: Vec<String> = self
            .query
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        query.sort();

        format!("h:{}|q:{}", headers.join(","), query.join(","))
    }
}

/// Build the ordered, deduplicated list of credential candidates.
///
/// Stream-token candidates always precede API-key candidates, and among the
/// token candidates the header presentation precedes the query one. The
/// API-key candidate is appended only when `allow_api_key_stream` is set, or
/// when no usable token exists at all.
pub fn negotiate(
    stream_token: Option<&str>,
    api_key: Option<&str>,
    allow_api_key_stream: bool,
) -> Vec<AuthCandidate> {
    let token = stream_token.map(str::trim).filter(|t| !t.is_empty());
    let key = api_key.map(str::trim).filter(|k| !k.is_empty());

    let mut candidates = Vec::new();

    if let Some(token) = token {
        candidates.push(AuthCandidate {
            headers: vec![("Authorization".to_string(), format!("Bearer {token}"))],
            query: Vec::new(),
            description: "stream token via Authorization header".to_string(),
        });
        // Some transports cannot set request headers; offer the token as a
        // query parameter as well.
        candidates.push(AuthCandidate {
            headers: Vec::new(),
            query: vec![("api_key".to_string(), token.to_string())],
            description: "stream token via api_key query parameter".to_string(),
        });
    }

    if let Some(key) = key {
        if allow_api_key_stream || token.is_none() {
            candidates.push(AuthCandidate {
                headers: Vec::new(),
                query: vec![("api_key".to_string(), key.to_string())],
                description: "API key via api_key query parameter".to_string(),
            });
        }
    }

    let mut seen = HashSet::new();
    candidates.retain(|candidate| seen.insert(candidate.signature()));
    candidates
}
