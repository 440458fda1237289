//! Reverse tunnel traits

use async_trait::async_trait;

/// Parameters handed to the transport when opening a tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Tunnel server address
    pub server_addr: String,
    /// Expected tunnel server fingerprint
    pub server_fingerprint: String,
    /// Decrypted credentials
    pub credentials: String,
    /// Port to expose on the tunnel server
    pub remote_port: String,
    /// Local service the tunnel forwards to
    pub local_addr: String,
}

/// Reverse tunnel transport.
///
/// Its [`is_open`](TunnelClient::is_open) answer is the only source of truth
/// for tunnel existence; callers never cache it.
#[async_trait]
pub trait TunnelClient: Send + Sync {
    /// Whether a tunnel is currently established
    fn is_open(&self) -> bool;

    /// Establish the tunnel
    async fn open(&self, config: TunnelConfig) -> anyhow::Result<()>;

    /// Tear the tunnel down
    async fn close(&self) -> anyhow::Result<()>;
}

/// Authenticated decryption of tunnel credentials
pub trait CredentialDecryptor: Send + Sync {
    /// Decrypt `ciphertext` with a key derived from `key`
    fn decrypt(&self, ciphertext: &[u8], key: &[u8]) -> anyhow::Result<Vec<u8>>;
}
