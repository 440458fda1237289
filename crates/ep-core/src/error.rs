//! Core error types for the edge poll agent

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for a poll cycle
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Poll transport error
    #[error("Poll error: {0}")]
    Poll(#[from] PollError),

    /// Reverse tunnel error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Response dispatch error
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors raised while talking to the controller
#[derive(Error, Debug)]
pub enum PollError {
    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request could not be sent or its body could not be read
    #[error("Poll request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The controller answered with something other than 200
    #[error("Short poll request failed with status {0}")]
    Status(u16),

    /// The poll interval cannot drive a ticker
    #[error("Invalid poll interval: {0}s")]
    InvalidInterval(f64),

    /// The response body was not a valid status envelope
    #[error("Invalid poll response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Errors raised by the tunnel lifecycle
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Credentials were not valid unpadded base64
    #[error("Invalid credentials encoding: {0}")]
    CredentialEncoding(#[from] base64::DecodeError),

    /// Credentials could not be decrypted with the edge key
    #[error("Unable to decrypt credentials: {0}")]
    Decrypt(#[source] anyhow::Error),

    /// Decrypted credentials were not UTF-8
    #[error("Decrypted credentials are not valid UTF-8")]
    CredentialText,

    /// The controller asked for a port that does not fit in 16 bits
    #[error("Remote port {0} is out of range")]
    InvalidPort(i64),

    /// The transport refused to open the tunnel
    #[error("Unable to create tunnel: {0}")]
    Open(#[source] anyhow::Error),

    /// The transport failed to close the tunnel
    #[error("Unable to shutdown tunnel: {0}")]
    Close(#[source] anyhow::Error),
}

/// Errors raised while handing response contents to collaborators
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Schedule management failed
    #[error("Schedule management failed: {0}")]
    Schedule(#[source] anyhow::Error),

    /// Poll cadence could not be applied
    #[error("Unable to apply poll interval of {interval_secs}s: {source}")]
    Cadence {
        interval_secs: f64,
        #[source]
        source: PollError,
    },

    /// Stack reconciliation failed
    #[error("Stack management failed: {0}")]
    StackReconcile(#[source] anyhow::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
