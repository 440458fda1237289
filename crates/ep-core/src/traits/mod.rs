//! Collaborator trait definitions

mod collaborators;
mod tunnel;

pub use collaborators::{LogCollector, Scheduler, StackReconciler};
pub use tunnel::{CredentialDecryptor, TunnelClient, TunnelConfig};
