//! HTTP poll client
//!
//! Issues `GET <controller>/api/endpoints/<id>/status` and decodes the status
//! envelope. The request timeout tracks the poll cadence, so the client is
//! rebuilt whenever the cadence changes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use ep_core::config::AgentConfig;
use ep_core::protocol::{AGENT_PLATFORM_HEADER, EDGE_ID_HEADER};
use ep_core::{canonical_platform, ContainerPlatform, EdgeId, PollError, PollResponse};

/// Source of controller status responses
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetch and decode one status response
    async fn fetch(&self) -> Result<PollResponse, PollError>;

    /// Current request timeout
    fn timeout(&self) -> Duration;

    /// Rebuild the transport with a new request timeout
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PollError>;
}

/// Status poll client backed by `reqwest`
pub struct PollClient {
    http: reqwest::Client,
    status_url: String,
    edge_id: EdgeId,
    platform: ContainerPlatform,
    insecure: bool,
    timeout: Duration,
}

impl PollClient {
    /// Create a client for the endpoint described by `config`.
    ///
    /// The initial timeout is the configured poll frequency.
    pub fn new(config: &AgentConfig) -> Result<Self, PollError> {
        let timeout = config.poll_frequency;
        let http = build_http_client(timeout, config.insecure_poll)?;

        Ok(Self {
            http,
            status_url: format!(
                "{}/api/endpoints/{}/status",
                config.controller_url(),
                config.endpoint_id
            ),
            edge_id: config.edge_id(),
            platform: config.container_platform,
            insecure: config.insecure_poll,
            timeout,
        })
    }

    /// URL polled on every cycle
    pub fn status_url(&self) -> &str {
        &self.status_url
    }
}

#[async_trait]
impl StatusSource for PollClient {
    async fn fetch(&self) -> Result<PollResponse, PollError> {
        let platform = canonical_platform(self.platform).wire_value();
        tracing::debug!(header = platform, "Sending agent platform header");

        let response = self
            .http
            .get(&self.status_url)
            .header(EDGE_ID_HEADER, self.edge_id.as_str())
            .header(AGENT_PLATFORM_HEADER, platform.to_string())
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            tracing::debug!(
                response_code = response.status().as_u16(),
                "Poll request failure"
            );
            return Err(PollError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let decoded: PollResponse = serde_json::from_slice(&body)?;
        Ok(decoded)
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), PollError> {
        self.http = build_http_client(timeout, self.insecure)?;
        self.timeout = timeout;
        Ok(())
    }
}

fn build_http_client(timeout: Duration, insecure: bool) -> Result<reqwest::Client, PollError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(PollError::Client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AgentConfig {
        AgentConfig {
            edge_id: "edge".to_string(),
            endpoint_id: "12".to_string(),
            controller_url: "https://controller:9443/".to_string(),
            poll_frequency: Duration::from_secs(5),
            ..AgentConfig::default()
        }
    }

    #[test]
    fn test_status_url() {
        let client = PollClient::new(&config()).unwrap();
        assert_eq!(
            client.status_url(),
            "https://controller:9443/api/endpoints/12/status"
        );
    }

    #[test]
    fn test_initial_timeout_is_poll_frequency() {
        let client = PollClient::new(&config()).unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_set_timeout_rebuilds_client() {
        let mut client = PollClient::new(&AgentConfig {
            insecure_poll: true,
            ..config()
        })
        .unwrap();
        client.set_timeout(Duration::from_secs(30)).unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(30));
    }
}
