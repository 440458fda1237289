//! ep-core: Core abstractions and configuration for the edge poll agent
//!
//! This crate provides the controller wire types, the collaborator traits the
//! agent drives, the per-step error policy and the configuration structures.

pub mod config;
pub mod error;
pub mod policy;
pub mod protocol;
pub mod traits;
pub mod types;

pub use error::{ConfigError, DispatchError, EdgeError, PollError, TunnelError};
pub use policy::{CycleStep, ErrorPolicy};
pub use protocol::{PollResponse, PollStatus, Schedule, StackStatus};
pub use types::{canonical_platform, ContainerPlatform, EdgeId, TunnelState};
