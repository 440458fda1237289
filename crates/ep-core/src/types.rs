//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of this edge agent, shared with the controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub String);

impl EdgeId {
    /// Create a new edge ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key material used to decrypt tunnel credentials
    pub fn as_key(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for EdgeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EdgeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Container platform the agent runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerPlatform {
    /// Docker engine
    Docker,
    /// Kubernetes cluster
    Kubernetes,
    /// Podman engine
    Podman,
}

impl ContainerPlatform {
    /// Integer value sent to the controller
    pub const fn wire_value(self) -> u8 {
        match self {
            ContainerPlatform::Docker => 1,
            ContainerPlatform::Kubernetes => 2,
            ContainerPlatform::Podman => 3,
        }
    }
}

impl Default for ContainerPlatform {
    fn default() -> Self {
        ContainerPlatform::Docker
    }
}

impl fmt::Display for ContainerPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerPlatform::Docker => write!(f, "docker"),
            ContainerPlatform::Kubernetes => write!(f, "kubernetes"),
            ContainerPlatform::Podman => write!(f, "podman"),
        }
    }
}

/// Map a platform to the value the controller understands.
///
/// The controller treats anything that is not Docker as Kubernetes, so Podman
/// agents report themselves as Docker.
pub const fn canonical_platform(platform: ContainerPlatform) -> ContainerPlatform {
    match platform {
        ContainerPlatform::Docker => ContainerPlatform::Docker,
        ContainerPlatform::Kubernetes => ContainerPlatform::Kubernetes,
        ContainerPlatform::Podman => ContainerPlatform::Docker,
    }
}

/// Observed state of the reverse tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// No tunnel is established
    Closed,
    /// The tunnel is established
    Open,
}

impl TunnelState {
    /// Build from the transport's is-open answer
    pub fn from_open(open: bool) -> Self {
        if open {
            TunnelState::Open
        } else {
            TunnelState::Closed
        }
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Closed => write!(f, "closed"),
            TunnelState::Open => write!(f, "open"),
        }
    }
}
