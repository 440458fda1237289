//! Tunnel open/close decisions
//!
//! Reacts to the status returned by each poll:
//!
//! - `REQUIRED` while closed: decode and decrypt the credentials, open the
//!   tunnel, then seed the reaper's activity timestamp.
//! - `IDLE` while open: close the tunnel. A failed close is only logged; the
//!   next status or reaper check sees the tunnel still open and tries again.
//! - Anything else: nothing.
//!
//! Tunnel existence is always read from the transport, never cached.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;

use ep_core::config::AgentConfig;
use ep_core::traits::{CredentialDecryptor, TunnelClient, TunnelConfig};
use ep_core::{CycleStep, EdgeId, PollStatus, TunnelError, TunnelState};

use crate::reaper::ActivitySignal;

/// Immutable tunnel settings captured at construction
#[derive(Debug, Clone)]
pub struct TunnelIdentity {
    /// Edge identifier, also the credential key
    pub edge_id: EdgeId,
    /// Tunnel server address
    pub server_addr: String,
    /// Tunnel server fingerprint
    pub server_fingerprint: String,
    /// Local API address the tunnel forwards to
    pub local_addr: String,
}

impl TunnelIdentity {
    /// Extract tunnel settings from the agent configuration
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            edge_id: config.edge_id(),
            server_addr: config.tunnel_server_addr.clone(),
            server_fingerprint: config.tunnel_server_fingerprint.clone(),
            local_addr: config.api_server_addr.clone(),
        }
    }
}

/// Transition taken for one status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelAction {
    /// No transition
    None,
    /// A tunnel was opened
    Opened,
    /// A close was requested (it may have failed and been logged)
    CloseRequested,
}

/// Owns the tunnel state machine
pub struct TunnelLifecycle {
    tunnel: Arc<dyn TunnelClient>,
    decryptor: Arc<dyn CredentialDecryptor>,
    identity: TunnelIdentity,
    activity: ActivitySignal,
}

impl TunnelLifecycle {
    /// Create a lifecycle controller over a transport
    pub fn new(
        tunnel: Arc<dyn TunnelClient>,
        decryptor: Arc<dyn CredentialDecryptor>,
        identity: TunnelIdentity,
        activity: ActivitySignal,
    ) -> Self {
        Self {
            tunnel,
            decryptor,
            identity,
            activity,
        }
    }

    /// Current tunnel state, read live from the transport
    pub fn state(&self) -> TunnelState {
        TunnelState::from_open(self.tunnel.is_open())
    }

    /// Apply the transition implied by `status`
    pub async fn react(
        &self,
        status: &PollStatus,
        credentials: &str,
        remote_port: i64,
    ) -> Result<TunnelAction, TunnelError> {
        match (status, self.state()) {
            (PollStatus::Idle, TunnelState::Open) => {
                tracing::debug!(%status, "Idle status detected, shutting down tunnel");
                let result = self.tunnel.close().await.map_err(TunnelError::Close);
                CycleStep::TunnelClose.handle(result)?;
                Ok(TunnelAction::CloseRequested)
            }
            (PollStatus::Required, TunnelState::Closed) => {
                tracing::debug!("Required status detected, creating reverse tunnel");
                let decoded = self.decode_credentials(credentials);
                let Some(credentials) = CycleStep::Credentials.handle(decoded)? else {
                    return Ok(TunnelAction::None);
                };
                let opened = self.open(credentials, remote_port).await;
                match CycleStep::TunnelOpen.handle(opened)? {
                    Some(()) => Ok(TunnelAction::Opened),
                    None => Ok(TunnelAction::None),
                }
            }
            _ => Ok(TunnelAction::None),
        }
    }

    async fn open(&self, credentials: String, remote_port: i64) -> Result<(), TunnelError> {
        let remote_port =
            u16::try_from(remote_port).map_err(|_| TunnelError::InvalidPort(remote_port))?;

        let config = TunnelConfig {
            server_addr: self.identity.server_addr.clone(),
            server_fingerprint: self.identity.server_fingerprint.clone(),
            credentials,
            remote_port: remote_port.to_string(),
            local_addr: self.identity.local_addr.clone(),
        };

        self.tunnel.open(config).await.map_err(|e| {
            tracing::error!(error = %e, "Unable to create tunnel");
            TunnelError::Open(e)
        })?;

        tracing::info!(remote_port, "Reverse tunnel established");
        self.activity.reset();
        Ok(())
    }

    fn decode_credentials(&self, encoded: &str) -> Result<String, TunnelError> {
        let ciphertext = STANDARD_NO_PAD.decode(encoded)?;
        let plaintext = self
            .decryptor
            .decrypt(&ciphertext, self.identity.edge_id.as_key())
            .map_err(TunnelError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| TunnelError::CredentialText)
    }
}
