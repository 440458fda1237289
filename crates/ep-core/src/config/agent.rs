//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::{ContainerPlatform, EdgeId};

/// Longest accepted poll interval, from configuration or the controller
pub const MAX_POLL_FREQUENCY: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the edge poll agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address of the local API the reverse tunnel forwards to
    pub api_server_addr: String,

    /// Edge identifier, sent on every poll and used as the credential key
    pub edge_id: String,

    /// Endpoint identifier assigned by the controller
    pub endpoint_id: String,

    /// Controller base URL, e.g. `https://controller.example.com:9443`
    pub controller_url: String,

    /// Initial check-in interval
    #[serde(with = "duration_secs")]
    pub poll_frequency: Duration,

    /// Idle time after which an open tunnel is closed
    #[serde(with = "duration_secs")]
    pub inactivity_timeout: Duration,

    /// Skip TLS certificate validation when polling
    pub insecure_poll: bool,

    /// Whether this agent manages a reverse tunnel at all
    pub tunnel_capability: bool,

    /// Tunnel server address
    pub tunnel_server_addr: String,

    /// Expected tunnel server fingerprint
    pub tunnel_server_fingerprint: String,

    /// Platform reported to the controller
    pub container_platform: ContainerPlatform,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            api_server_addr: "0.0.0.0:9001".to_string(),
            edge_id: String::new(),
            endpoint_id: String::new(),
            controller_url: "http://localhost:9000".to_string(),
            poll_frequency: Duration::from_secs(5),
            inactivity_timeout: Duration::from_secs(300),
            insecure_poll: false,
            tunnel_capability: true,
            tunnel_server_addr: "localhost:8000".to_string(),
            tunnel_server_fingerprint: String::new(),
            container_platform: ContainerPlatform::Docker,
        }
    }
}

impl AgentConfig {
    /// Get the edge identifier
    pub fn edge_id(&self) -> EdgeId {
        EdgeId::new(self.edge_id.clone())
    }

    /// Controller URL without a trailing slash
    pub fn controller_url(&self) -> &str {
        self.controller_url.trim_end_matches('/')
    }

    /// Check that the configuration can drive a poll service
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.edge_id.is_empty() {
            return Err(ConfigError::MissingField("edge_id".to_string()));
        }
        if self.endpoint_id.is_empty() {
            return Err(ConfigError::MissingField("endpoint_id".to_string()));
        }
        if self.controller_url.is_empty() {
            return Err(ConfigError::MissingField("controller_url".to_string()));
        }
        if self.poll_frequency.is_zero() {
            return Err(ConfigError::Invalid(
                "poll_frequency must be greater than zero".to_string(),
            ));
        }
        if self.poll_frequency > MAX_POLL_FREQUENCY {
            return Err(ConfigError::Invalid(format!(
                "poll_frequency must not exceed {}s",
                MAX_POLL_FREQUENCY.as_secs()
            )));
        }
        if self.inactivity_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "inactivity_timeout must be greater than zero".to_string(),
            ));
        }
        if self.tunnel_capability && self.tunnel_server_addr.is_empty() {
            return Err(ConfigError::MissingField("tunnel_server_addr".to_string()));
        }
        Ok(())
    }
}
