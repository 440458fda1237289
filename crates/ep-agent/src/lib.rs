//! ep-agent: Edge poll agent
//!
//! The agent periodically checks in with the controller, opens a reverse
//! tunnel back to it on demand, closes that tunnel once it goes idle and
//! hands schedules, log requests and stack targets to the subsystems that
//! act on them.

pub mod collaborators;
pub mod dispatch;
pub mod poll;
pub mod reaper;
pub mod service;
pub mod test_support;
pub mod tunnel;

pub use dispatch::{CadenceControl, ResponseDispatcher};
pub use poll::{PollClient, StatusSource};
pub use reaper::{ActivityReaper, ActivitySignal, TUNNEL_ACTIVITY_CHECK_INTERVAL};
pub use service::{Collaborators, PollService, PollServiceHandle, TunnelTransport};
pub use tunnel::{TunnelAction, TunnelIdentity, TunnelLifecycle};
