//! Scorecard service client.
//!
//! One GET per repository identifier, decoded into a [`ScorecardResult`].
//! The client never retries and always runs with an explicit timeout.

use crate::error::FetchError;
use crate::models::ScorecardResult;
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::ACCEPT;
use std::time::Duration;
use tracing::debug;

/// Default scorecard API base.
pub const DEFAULT_ENDPOINT: &str = "https://api.securityscorecards.dev/projects";

/// Source of scorecards for the fetch coordinator.
///
/// Implemented by [`ScorecardClient`] for real lookups and by scripted
/// doubles in tests.
pub trait ScorecardSource: Send + Sync {
    /// Fetch the scorecard for a scheme-less identifier such as
    /// `github.com/owner/repo`.
    fn fetch<'a>(&'a self, identifier: &'a str)
        -> BoxFuture<'a, Result<ScorecardResult, FetchError>>;
}

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL; the identifier is appended as a path suffix.
    pub endpoint: String,
    /// Per-request timeout covering connect, headers and body.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
            user_agent: format!("scorecrawl/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// HTTP client for the scorecard service.
#[derive(Debug, Clone)]
pub struct ScorecardClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ScorecardClient {
    /// Create a client. Fails only if the TLS backend cannot be initialized.
    pub fn new(config: &ClientConfig) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// Request URL for an identifier.
    pub fn url_for(&self, identifier: &str) -> String {
        format!("{}/{}", self.endpoint, identifier.trim_start_matches('/'))
    }

    /// Fetch and decode one scorecard.
    pub async fn fetch_scorecard(&self, identifier: &str) -> Result<ScorecardResult, FetchError> {
        let url = self.url_for(identifier);
        debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                identifier: identifier.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                identifier: identifier.to_string(),
                status,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                identifier: identifier.to_string(),
                source,
            })?;

        serde_json::from_slice::<ScorecardResult>(&body).map_err(|e| FetchError::Decode {
            identifier: identifier.to_string(),
            reason: e.to_string(),
        })
    }
}

impl ScorecardSource for ScorecardClient {
    fn fetch<'a>(
        &'a self,
        identifier: &'a str,
    ) -> BoxFuture<'a, Result<ScorecardResult, FetchError>> {
        self.fetch_scorecard(identifier).boxed()
    }
}
