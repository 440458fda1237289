//! Reverse tunnel lifecycle

mod lifecycle;

pub use lifecycle::{TunnelAction, TunnelIdentity, TunnelLifecycle};
